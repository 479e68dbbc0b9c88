//! Scheduler module for running probes and feeding the evaluation pipeline.

use crate::db::{Store, Target};
use crate::evaluation::{ContentCheck, EvalError, EvaluationOutcome, Evaluator};
use crate::probe::{run_probe, HttpProber, ProbeConfig};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_PROBE_INTERVAL: f64 = 60.0;
const DEFAULT_TIMEOUT: f64 = 10.0;

/// The main scheduler: one probe loop per monitored target.
pub struct Scheduler {
    store: Arc<Store>,
    evaluator: Arc<Evaluator>,
    prober: HttpProber,
    stop_chans: Arc<RwLock<HashMap<i64, tokio::sync::broadcast::Sender<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, evaluator: Arc<Evaluator>, prober: HttpProber) -> Self {
        Self {
            store,
            evaluator,
            prober,
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the scheduler and begin monitoring all enabled targets.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let targets: Vec<Target> = self
            .store
            .get_targets()?
            .into_iter()
            .filter(|t| t.enabled)
            .collect();

        tracing::info!("Starting scheduler with {} targets", targets.len());

        for target in targets {
            self.add_target(target).await;
        }

        Ok(())
    }

    /// Add a target to be monitored.
    pub async fn add_target(&self, target: Target) {
        let mut stop_chans = self.stop_chans.write().await;

        if stop_chans.contains_key(&target.id) {
            return; // Already running
        }

        let (stop_tx, stop_rx) = tokio::sync::broadcast::channel(1);
        stop_chans.insert(target.id, stop_tx.clone());
        drop(stop_chans);

        tracing::info!("Scheduler: Adding target {} ({})", target.name, target.url);

        let target_id = target.id;
        let stop_chans = self.stop_chans.clone();
        let evaluator = self.evaluator.clone();
        let prober = self.prober.clone();

        tokio::spawn(async move {
            run_probe_loop(target, prober, evaluator, stop_rx).await;

            // Clean up when done, unless the target was re-added meanwhile
            let mut chans = stop_chans.write().await;
            if chans
                .get(&target_id)
                .is_some_and(|current| current.same_channel(&stop_tx))
            {
                chans.remove(&target_id);
            }
        });
    }

    /// Remove a target from monitoring.
    pub async fn remove_target(&self, id: i64) {
        let mut stop_chans = self.stop_chans.write().await;

        if let Some(stop_tx) = stop_chans.remove(&id) {
            let _ = stop_tx.send(());
            self.evaluator.forget_target(id);
            tracing::info!("Scheduler: Removed target {}", id);
        }
    }

    /// Stop every probe loop.
    pub async fn stop_all(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        for (_, stop_tx) in stop_chans.drain() {
            let _ = stop_tx.send(());
        }
        tracing::info!("Scheduler: All probe loops stopped");
    }

    /// Number of targets with a running probe loop.
    pub async fn active_targets(&self) -> usize {
        self.stop_chans.read().await.len()
    }
}

/// Probe interval and timeout for a target, falling back to defaults.
fn loop_timings(target: &Target) -> (Duration, Duration) {
    let probe_interval = if target.probe_interval <= 0.0 {
        DEFAULT_PROBE_INTERVAL
    } else {
        target.probe_interval
    };

    let timeout = if target.timeout <= 0.0 {
        DEFAULT_TIMEOUT
    } else {
        target.timeout
    };

    (
        Duration::from_secs_f64(probe_interval),
        Duration::from_secs_f64(timeout),
    )
}

/// Run the probe loop for a single target.
///
/// Each evaluation finishes before the next probe starts, so a target never
/// has two evaluations in flight from this loop.
async fn run_probe_loop(
    target: Target,
    prober: HttpProber,
    evaluator: Arc<Evaluator>,
    mut stop_rx: tokio::sync::broadcast::Receiver<()>,
) {
    let (interval_duration, timeout_duration) = loop_timings(&target);
    let config = ProbeConfig::new(&target.url, timeout_duration);

    let mut interval = tokio::time::interval(interval_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let result = run_probe(&prober, &config).await;

                let evaluator = evaluator.clone();
                let target_id = target.id;
                let joined = tokio::task::spawn_blocking(move || {
                    evaluator.evaluate(target_id, &result)
                })
                .await;

                match joined {
                    Ok(outcome) => log_outcome(&target, outcome),
                    Err(e) => tracing::error!("Evaluation task for {} panicked: {}", target.name, e),
                }
            }
        }
    }
}

fn log_outcome(target: &Target, outcome: Result<EvaluationOutcome, EvalError>) {
    match outcome {
        Ok(EvaluationOutcome::Skipped { reason, .. }) => {
            tracing::warn!("Evaluation for {} skipped: {}", target.name, reason);
        }
        Ok(EvaluationOutcome::Evaluated {
            availability,
            content,
            ..
        }) => {
            let change = match &content {
                ContentCheck::Captured(s) => s.change_level.as_str(),
                ContentCheck::Failed { .. } => "unknown",
                ContentCheck::NotAttempted => "-",
            };
            tracing::debug!(
                "{}: {} via {} in {:.1}ms, change {}",
                target.name,
                availability.state,
                availability.last_outcome,
                availability.last_latency_ms,
                change
            );
        }
        Err(e) => {
            tracing::error!("Evaluation failed for {}: {}", target.name, e);
        }
    }
}
