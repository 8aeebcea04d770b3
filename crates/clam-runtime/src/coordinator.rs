//! [`Coordinator`] – the periodic background tick.
//!
//! Every tick first counts the stores and publishes a [`MemorySnapshot`] on a
//! `watch` channel. Then, unless a foreground turn is in flight, it runs the
//! critic scan (when enabled) followed by one consolidation cycle. Stage
//! errors are logged and the loop carries on; only the shutdown signal ends
//! it.

use std::sync::Arc;
use std::time::Duration;

use clam_types::MemorySnapshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::consolidation::{ConsolidationCycle, CycleReport};
use crate::critic::{CriticEngine, CriticReport};
use crate::gate::ForegroundGate;
use crate::stores::MemoryStores;

/// Default time between two ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(15);

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub snapshot: MemorySnapshot,
    /// `true` if a foreground turn kept the model-dependent stages from running.
    pub skipped_for_foreground: bool,
    pub critic: Option<CriticReport>,
    pub cycle: Option<CycleReport>,
}

pub struct Coordinator {
    stores: MemoryStores,
    consolidation: ConsolidationCycle,
    critic: Option<CriticEngine>,
    gate: ForegroundGate,
    interval: Duration,
    snapshots: watch::Sender<MemorySnapshot>,
}

impl Coordinator {
    pub fn new(stores: MemoryStores, consolidation: ConsolidationCycle, gate: ForegroundGate) -> Self {
        let (snapshots, _) = watch::channel(MemorySnapshot::default());
        Self {
            stores,
            consolidation,
            critic: None,
            gate,
            interval: DEFAULT_TICK_INTERVAL,
            snapshots,
        }
    }

    /// Run `critic` before consolidation on every tick.
    pub fn with_critic(mut self, critic: CriticEngine) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn critic_enabled(&self) -> bool {
        self.critic.is_some()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<MemorySnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn tick(&self) -> TickReport {
        let snapshot = self.stores.snapshot().await;
        debug!(
            scratch = snapshot.scratch_count,
            semantic = snapshot.semantic_count,
            triples = snapshot.triple_count,
            "memory snapshot"
        );
        self.snapshots.send_replace(snapshot.clone());

        let mut report = TickReport {
            snapshot,
            ..TickReport::default()
        };
        if self.gate.is_active() {
            debug!("foreground turn in flight, background stages skipped");
            report.skipped_for_foreground = true;
            return report;
        }

        if let Some(critic) = &self.critic {
            match critic.scan().await {
                Ok(r) => report.critic = Some(r),
                Err(e) => error!(error = %e, "critic scan failed"),
            }
        }

        match self.consolidation.cycle().await {
            Ok(r) => report.cycle = Some(r),
            Err(e) => error!(error = %e, "consolidation cycle failed"),
        }
        report
    }

    /// Tick every interval until `shutdown` turns `true` or its sender is
    /// dropped. A tick in progress is abandoned on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs_f64(),
            critic = self.critic_enabled(),
            "coordinator started"
        );

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = async {
                    ticker.tick().await;
                    self.tick().await
                } => {}
            }
        }
        info!("coordinator stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::ConsolidationPolicy;
    use crate::testing::{FlakyEmbedder, ScriptedModel, memory_stores, memory_stores_with};
    use clam_knowledge::locales::BuiltinLocales;
    use clam_types::CandidateFact;

    fn coordinator(stores: &MemoryStores, gate: ForegroundGate) -> Coordinator {
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());
        Coordinator::new(stores.clone(), cycle, gate)
    }

    async fn buffered(stores: &MemoryStores, score: i64) -> CandidateFact {
        let mut fact = CandidateFact::new("collects stamps", "perception");
        fact.confidence_score = score;
        stores.scratch.add(&fact).await.unwrap();
        fact
    }

    #[tokio::test]
    async fn tick_consolidates_and_publishes_snapshot() {
        let stores = memory_stores().await;
        let fact = buffered(&stores, 3).await;
        let coordinator = coordinator(&stores, ForegroundGate::new());
        let rx = coordinator.subscribe();

        let report = coordinator.tick().await;
        assert_eq!(report.snapshot.scratch_count, 1);
        assert_eq!(report.cycle.unwrap().promoted, vec![fact.id]);
        assert!(report.critic.is_none());
        assert_eq!(rx.borrow().scratch_count, 1);
        assert!(rx.borrow().taken_at.is_some());

        // The next snapshot sees the promotion.
        let report = coordinator.tick().await;
        assert_eq!(report.snapshot.scratch_count, 0);
        assert_eq!(report.snapshot.semantic_count, 1);
    }

    #[tokio::test]
    async fn foreground_turn_skips_model_stages_but_not_telemetry() {
        let stores = memory_stores().await;
        buffered(&stores, 3).await;
        let gate = ForegroundGate::new();
        let model = ScriptedModel::new(["APPROVED"]);
        let critic = CriticEngine::new(model.clone(), Arc::new(BuiltinLocales), stores.scratch.clone(), gate.clone());
        let coordinator = coordinator(&stores, gate.clone()).with_critic(critic);

        let turn = gate.enter();
        let report = coordinator.tick().await;
        assert!(report.skipped_for_foreground);
        assert!(report.cycle.is_none());
        assert_eq!(report.snapshot.scratch_count, 1);
        assert!(model.calls().is_empty());

        drop(turn);
        let report = coordinator.tick().await;
        assert!(!report.skipped_for_foreground);
        assert_eq!(report.cycle.unwrap().promoted.len(), 1);
    }

    #[tokio::test]
    async fn critic_runs_before_consolidation() {
        let stores = memory_stores().await;
        let fact = buffered(&stores, 2).await;
        let gate = ForegroundGate::new();
        let critic = CriticEngine::new(
            ScriptedModel::new(["APPROVED"]),
            Arc::new(BuiltinLocales),
            stores.scratch.clone(),
            gate.clone(),
        );
        let coordinator = coordinator(&stores, gate).with_critic(critic);
        assert!(coordinator.critic_enabled());

        let report = coordinator.tick().await;
        assert_eq!(report.critic.unwrap().approved, 1);
        assert_eq!(report.cycle.unwrap().promoted, vec![fact.id]);
    }

    #[tokio::test]
    async fn failing_store_does_not_stop_later_ticks() {
        let stores = memory_stores_with(FlakyEmbedder::failing_first(1)).await;
        let fact = buffered(&stores, 3).await;
        let coordinator = coordinator(&stores, ForegroundGate::new());

        let first = coordinator.tick().await.cycle.unwrap();
        assert_eq!(first.failures, 1);
        assert!(first.promoted.is_empty());
        assert_eq!(stores.scratch.len().await.unwrap(), 1);

        let second = coordinator.tick().await.cycle.unwrap();
        assert_eq!(second.failures, 0);
        assert_eq!(second.promoted, vec![fact.id]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let stores = memory_stores().await;
        buffered(&stores, 3).await;
        let coordinator = Arc::new(coordinator(&stores, ForegroundGate::new()).with_interval(Duration::from_millis(10)));
        let mut snapshots = coordinator.subscribe();
        let (stop, shutdown) = watch::channel(false);

        let handle = coordinator.clone().spawn(shutdown);
        tokio::time::timeout(Duration::from_secs(5), snapshots.changed())
            .await
            .unwrap()
            .unwrap();

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
