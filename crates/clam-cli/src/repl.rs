//! REPL – Read-Eval-Print Loop for the CLAM shell.
//!
//! Plain text is a conversation turn. Slash-commands:
//!   /knowledge                   – show the rendered knowledge document
//!   /buffer                      – list buffered candidate facts
//!   /facts [n]                   – list the n most recent semantic facts
//!   /triples                     – list every assertion with its id
//!   /assert s | p | o            – add an assertion by hand
//!   /forget <stm|ltm|graph> <id> – delete one item from one store
//!   /reset [seed]                – wipe all memory, optionally reseeding
//!   /seed                        – load the seed file
//!   /status                      – store counts and settings
//!   /help                        – show this list
//!   /quit | /exit                – leave

use colored::Colorize;
use std::io::Write;

use clam_runtime::MemorySystem;
use clam_types::{AGENT_ENTITY, StoreKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const DEFAULT_FACT_LIMIT: usize = 20;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Knowledge,
    Buffer,
    Facts(usize),
    Triples,
    Assert { subject: String, predicate: String, object: String },
    Forget { store: StoreKind, id: String },
    Reset { seed: bool },
    Seed,
    Status,
    Help,
    Quit,
    /// A slash-command that could not be understood, with the reason.
    Invalid(String),
}

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Chat(line.to_string()));
        };
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        Some(match name {
            "knowledge" => Command::Knowledge,
            "buffer" => Command::Buffer,
            "facts" if args.is_empty() => Command::Facts(DEFAULT_FACT_LIMIT),
            "facts" => match args.parse() {
                Ok(n) => Command::Facts(n),
                Err(_) => Command::Invalid(format!("'{args}' is not a number")),
            },
            "triples" => Command::Triples,
            "assert" => parse_assert(args),
            "forget" => parse_forget(args),
            "reset" => match args {
                "" => Command::Reset { seed: false },
                "seed" => Command::Reset { seed: true },
                other => Command::Invalid(format!("unknown option '{other}' (try /reset seed)")),
            },
            "seed" => Command::Seed,
            "status" => Command::Status,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => Command::Invalid(format!("unknown command '/{other}'")),
        })
    }
}

fn parse_assert(args: &str) -> Command {
    let parts: Vec<&str> = args.split('|').map(str::trim).collect();
    match parts.as_slice() {
        [s, p, o] if !s.is_empty() && !p.is_empty() && !o.is_empty() => Command::Assert {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
        },
        _ => Command::Invalid("usage: /assert subject | predicate | object".to_string()),
    }
}

fn parse_forget(args: &str) -> Command {
    let mut words = args.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(store), Some(id), None) => match store.parse() {
            Ok(store) => Command::Forget {
                store,
                id: id.to_string(),
            },
            Err(e) => Command::Invalid(e.to_string()),
        },
        _ => Command::Invalid("usage: /forget <stm|ltm|graph> <id>".to_string()),
    }
}

/// Read commands until EOF, `/quit`, or `shutdown` turning `true`.
pub async fn run(system: &MemorySystem, mut shutdown: watch::Receiver<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", "you>".bold().cyan());
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if command == Command::Quit {
            println!("{}", "Goodbye.".green());
            break;
        }
        execute(system, command).await;
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn execute(system: &MemorySystem, command: Command) {
    match command {
        Command::Chat(message) => match system.chat(&message).await {
            Ok(reply) => println!("{} {}", format!("{AGENT_ENTITY}>").bold().green(), reply.text),
            Err(e) => println!("{}: {}", "No reply".red(), e),
        },
        Command::Knowledge => match system.knowledge_document().await {
            Ok(doc) if doc.is_empty() => println!("{}", system.no_facts_text().dimmed()),
            Ok(doc) => println!("{doc}"),
            Err(e) => println!("{}: {}", "Knowledge error".red(), e),
        },
        Command::Buffer => match system.buffered_facts().await {
            Ok(facts) if facts.is_empty() => println!("{}", "  (buffer empty)".dimmed()),
            Ok(facts) => {
                for f in facts {
                    println!("  [{}] {} {}", f.confidence_score.to_string().yellow(), f.description, f.id.dimmed());
                }
            }
            Err(e) => println!("{}: {}", "Buffer error".red(), e),
        },
        Command::Facts(limit) => match system.semantic_facts(limit).await {
            Ok(facts) if facts.is_empty() => println!("{}", "  (no semantic facts)".dimmed()),
            Ok(facts) => {
                for f in facts {
                    println!("  • {} {}", f.description, f.id.dimmed());
                }
            }
            Err(e) => println!("{}: {}", "Vector store error".red(), e),
        },
        Command::Triples => match system.triples().await {
            Ok(triples) if triples.is_empty() => println!("{}", "  (no assertions)".dimmed()),
            Ok(triples) => {
                for t in triples {
                    println!("  {} {}", t.to_string().bold(), t.id.dimmed());
                }
            }
            Err(e) => println!("{}: {}", "Triple store error".red(), e),
        },
        Command::Assert {
            subject,
            predicate,
            object,
        } => match system.assert_triple(&subject, &predicate, &object).await {
            Ok(a) => println!("{} {} {}", "✓ Added".green(), a.to_string().bold(), a.id.dimmed()),
            Err(e) => println!("{}: {}", "Assert failed".red(), e),
        },
        Command::Forget { store, id } => match system.forget(store, &id).await {
            Ok(()) => println!("{} {} from {}", "✓ Forgot".green(), id, store),
            Err(e) => println!("{}: {}", "Forget failed".red(), e),
        },
        Command::Reset { seed } => {
            let result = if seed {
                system.reset_and_seed().await
            } else {
                system.reset().await.map(|()| 0)
            };
            match result {
                Ok(seeded) if seed => println!("{} ({} seed truths loaded)", "✓ Memory wiped".green(), seeded),
                Ok(_) => println!("{}", "✓ Memory wiped".green()),
                Err(e) => println!("{}: {}", "Reset failed".red(), e),
            }
        }
        Command::Seed => match system.load_seed().await {
            Ok(n) => println!("{} {} seed truths", "✓ Loaded".green(), n),
            Err(e) => println!("{}: {}", "Seed failed".red(), e),
        },
        Command::Status => {
            let snap = system.snapshot().await;
            let cfg = system.config();
            println!("{}", "Status".bold().underline());
            println!("  Buffered facts : {}", snap.scratch_count.to_string().yellow());
            println!("  Semantic facts : {}", snap.semantic_count.to_string().yellow());
            println!("  Assertions     : {}", snap.triple_count.to_string().yellow());
            println!("  Model          : {} ({})", cfg.model.bold(), cfg.language);
            println!(
                "  Promotion at   : {}  decay after {} min below {}",
                cfg.policy.promotion_threshold, cfg.policy.decay_minutes, cfg.policy.min_score
            );
            println!("  Critic         : {}", if cfg.critic_enabled { "on".green() } else { "off".dimmed() });
        }
        Command::Help => print_help(),
        Command::Quit => {}
        Command::Invalid(reason) => println!(
            "{} {}. Type {} for available commands.",
            "Error:".red(),
            reason.yellow(),
            "/help".bold()
        ),
    }
}

fn print_help() {
    println!();
    println!("{}", "CLAM Commands".bold().underline());
    println!("  {}  – talk to the agent", "<text>".bold().cyan());
    println!("  {}  – show the knowledge document", "/knowledge".bold().cyan());
    println!("  {}  – list buffered candidate facts", "/buffer".bold().cyan());
    println!("  {}  – list recent semantic facts", "/facts [n]".bold().cyan());
    println!("  {}  – list assertions with their ids", "/triples".bold().cyan());
    println!("  {}  – add an assertion", "/assert s | p | o".bold().cyan());
    println!("  {}  – delete one item", "/forget <stm|ltm|graph> <id>".bold().cyan());
    println!("  {}  – wipe all memory", "/reset [seed]".bold().cyan());
    println!("  {}  – load the seed file", "/seed".bold().cyan());
    println!("  {}  – store counts and settings", "/status".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_chat_turn() {
        assert_eq!(Command::parse("  hello there "), Some(Command::Chat("hello there".into())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn simple_commands() {
        assert_eq!(Command::parse("/knowledge"), Some(Command::Knowledge));
        assert_eq!(Command::parse("/facts"), Some(Command::Facts(DEFAULT_FACT_LIMIT)));
        assert_eq!(Command::parse("/facts 5"), Some(Command::Facts(5)));
        assert_eq!(Command::parse("/reset seed"), Some(Command::Reset { seed: true }));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
    }

    #[test]
    fn assert_splits_on_pipes() {
        assert_eq!(
            Command::parse("/assert Utente | vive_a | Torino"),
            Some(Command::Assert {
                subject: "Utente".into(),
                predicate: "vive_a".into(),
                object: "Torino".into(),
            })
        );
        assert!(matches!(Command::parse("/assert Utente | vive_a"), Some(Command::Invalid(_))));
    }

    #[test]
    fn forget_needs_a_known_store() {
        assert_eq!(
            Command::parse("/forget graph abc-123"),
            Some(Command::Forget {
                store: StoreKind::Graph,
                id: "abc-123".into(),
            })
        );
        assert!(matches!(Command::parse("/forget cache abc"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/forget stm"), Some(Command::Invalid(_))));
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert!(matches!(Command::parse("/dance"), Some(Command::Invalid(r)) if r.contains("/dance")));
        assert!(matches!(Command::parse("/facts many"), Some(Command::Invalid(_))));
    }
}
