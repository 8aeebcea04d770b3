//! `clam-cli` – CLAM Command Line Interface
//!
//! 1. Checks for `~/.clam/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Probes the Ollama instance for the chat and embedding models.
//! 3. Opens the memory system, starts the background coordinator and drops
//!    the user into an **interactive REPL**.
//! 4. Intercepts **Ctrl-C** to stop the coordinator and exit.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, warn};

use clam_runtime::MemorySystem;

fn main() {
    let _tracing = clam_runtime::init_tracing("clam");

    print_banner();

    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    probe_ollama(&cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start the async runtime");
            std::process::exit(1);
        }
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (stop, shutdown) = watch::channel(false);
    let stop = Arc::new(stop);
    let stop_on_ctrlc = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_on_ctrlc.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    let system_config = cfg.to_system_config(&config::clam_home());
    if cfg.seed_file.is_none()
        && let Some(seed) = &system_config.seed_file
        && let Err(e) = config::install_bundled_seed(seed)
    {
        warn!(error = %e, "bundled seed truths not installed");
    }
    runtime.block_on(async {
        let system = match MemorySystem::open(system_config).await {
            Ok(system) => system,
            Err(e) => {
                println!("{}: {}", "Cannot open memory".red(), e);
                return;
            }
        };
        let coordinator = system.spawn_coordinator(shutdown.clone());

        println!();
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
        repl::run(&system, shutdown).await;

        stop.send_replace(true);
        if let Err(e) = coordinator.await {
            warn!(error = %e, "coordinator task ended abnormally");
        }
    });
    // Stdin reads run on a blocking thread that cannot be interrupted.
    runtime.shutdown_timeout(Duration::from_secs(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        CLAM First-Run Wizard         ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up CLAM.\n");

    let mut cfg = config::Config::default();

    println!("  Which language should CLAM speak?");
    println!("    1) English  (default)");
    println!("    2) Italiano");
    cfg.language = match prompt_line("  Enter choice [1]: ", "1").as_str() {
        "2" | "it" => "it".to_string(),
        _ => "en".to_string(),
    };

    cfg.ollama_url = prompt_line(&format!("  Ollama URL [{}]: ", cfg.ollama_url), &cfg.ollama_url);
    cfg.active_model = prompt_line(&format!("  Chat model [{}]: ", cfg.active_model), &cfg.active_model);
    cfg.embedding_model = prompt_line(
        &format!("  Embedding model [{}]: ", cfg.embedding_model),
        &cfg.embedding_model,
    );

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Ollama probe
// ─────────────────────────────────────────────────────────────────────────────

fn probe_ollama(cfg: &config::Config) {
    print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            for wanted in [&cfg.active_model, &cfg.embedding_model] {
                if !ollama::has_model(&models, wanted) {
                    println!(
                        "  {} {} is not pulled. Run `{}`.",
                        "⚠".yellow(),
                        wanted.bold(),
                        format!("ollama pull {wanted}").bold()
                    );
                }
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}`; replies stay empty until it is up.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ________    ___    __  ___"#.bold().cyan());
    println!("{}", r#"  / ____/ /   /   |  /  |/  /"#.bold().cyan());
    println!("{}", r#" / /   / /   / /| | / /|_/ / "#.bold().cyan());
    println!("{}", r#"/ /___/ /___/ ___ |/ /  / /  "#.bold().cyan());
    println!("{}", r#"\____/_____/_/  |_/_/  /_/   "#.bold().cyan());
    println!();
    println!("  {} {}", "CLAM".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  A conversational agent that remembers");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Read one line from stdin. Returns `default` on Enter or a read error.
fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
