use crate::clock::Clock;
use crate::config::span;
use crate::core::settlement::{Settlement, SettlementStatus};
use crate::error::{PipelineError, Result};
use crate::store::Store;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// How verification of a SETTLING settlement is retried.
///
/// The default retries on every tick forever. A capped settlement stays
/// SETTLING once the cap is hit; nothing moves it to FAILED.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_verification_attempts: Option<u32>,
    /// Minimum time between two verification attempts of one settlement.
    pub backoff_secs: u64,
}

impl RetryPolicy {
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_verification_attempts
            .map_or(false, |max| attempts >= max)
    }

    pub fn backoff(&self) -> Result<ChronoDuration> {
        span(
            "settlement.retry.backoff_secs",
            self.backoff_secs,
            i64::try_from(self.backoff_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds),
        )
    }

    /// A backoff that cannot be added to the last attempt never expires.
    pub fn is_backing_off(&self, settlement: &Settlement, now: DateTime<Utc>) -> bool {
        match settlement.last_attempt_at {
            Some(last) if self.backoff_secs > 0 => self
                .backoff()
                .ok()
                .and_then(|backoff| last.checked_add_signed(backoff))
                .map_or(true, |until| now < until),
            _ => false,
        }
    }
}

/// Confirms that a SETTLING settlement has reached finality.
pub trait SettlementVerifier: Send + Sync {
    fn verify(&self, settlement: &Settlement) -> bool;
}

impl<F> SettlementVerifier for F
where
    F: Fn(&Settlement) -> bool + Send + Sync,
{
    fn verify(&self, settlement: &Settlement) -> bool {
        self(settlement)
    }
}

/// Succeeds independently on each call with a fixed probability.
pub struct RandomVerifier {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomVerifier {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(probability: f64, seed: u64) -> Self {
        Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl SettlementVerifier for RandomVerifier {
    fn verify(&self, _settlement: &Settlement) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen::<f64>() < self.probability
    }
}

/// What one scan did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scanned: usize,
    /// PENDING -> SETTLING.
    pub initiated: usize,
    /// SETTLING -> SETTLED.
    pub settled: usize,
    pub verification_failures: usize,
    pub not_due: usize,
    pub failed_skipped: usize,
    pub exhausted: usize,
    pub backing_off: usize,
}

/// Periodic settlement state machine.
///
/// Each tick scans every unsettled settlement once: due PENDING records move
/// to SETTLING, SETTLING records are verified and move to SETTLED on
/// success. A record moved to SETTLING is not verified until the next tick.
pub struct SettlementProcessor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn SettlementVerifier>,
    interval: Duration,
    retry: RetryPolicy,
}

impl SettlementProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SettlementVerifier>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            verifier,
            interval,
            retry,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one scan. A store failure aborts the scan; records already
    /// updated keep their new state.
    pub fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let pending = self.store.list_pending_settlements()?;
        let mut report = TickReport {
            scanned: pending.len(),
            ..Default::default()
        };
        debug!("settlement tick at {}: {} unsettled", now, pending.len());

        for mut settlement in pending {
            match settlement.status {
                SettlementStatus::Failed => {
                    info!(
                        "settlement {} is FAILED ({}), skipping",
                        settlement.id,
                        settlement.failure_reason.as_deref().unwrap_or("no reason")
                    );
                    report.failed_skipped += 1;
                }
                SettlementStatus::Settled => {}
                SettlementStatus::Pending => {
                    if !settlement.is_due(now) {
                        report.not_due += 1;
                        continue;
                    }
                    self.store.update_settlement_status(
                        settlement.id,
                        SettlementStatus::Settling,
                        now,
                    )?;
                    info!("settlement {} initiated (SETTLING)", settlement.id);
                    report.initiated += 1;
                }
                SettlementStatus::Settling => {
                    if self.retry.is_exhausted(settlement.verification_attempts) {
                        error!(
                            "settlement {} still unverified after {} attempts, left SETTLING",
                            settlement.id, settlement.verification_attempts
                        );
                        report.exhausted += 1;
                        continue;
                    }
                    if self.retry.is_backing_off(&settlement, now) {
                        report.backing_off += 1;
                        continue;
                    }

                    settlement.verification_attempts = settlement.verification_attempts.saturating_add(1);
                    settlement.last_attempt_at = Some(now);
                    settlement.updated_at = now;
                    if self.verifier.verify(&settlement) {
                        settlement.status = SettlementStatus::Settled;
                        self.store.update_settlement(&settlement)?;
                        info!(
                            "settlement {} SETTLED: {} {} to {}",
                            settlement.id,
                            settlement.final_amount,
                            settlement.currency,
                            settlement.settlement_account
                        );
                        report.settled += 1;
                    } else {
                        self.store.update_settlement(&settlement)?;
                        warn!(
                            "settlement {} verification failed (attempt {}), retrying next tick",
                            settlement.id, settlement.verification_attempts
                        );
                        report.verification_failures += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run the loop until `shutdown` turns true or its sender is dropped.
    ///
    /// The first scan happens one interval after the call. A scan in progress
    /// always finishes before shutdown is observed.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "settlement processor started, interval {}s",
                self.interval.as_secs()
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("settlement processor received shutdown signal");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match self.tick() {
                            Ok(report) => debug!("settlement tick: {:?}", report),
                            Err(e) => error!("settlement tick failed: {}", e),
                        }
                    }
                }
            }
            info!("settlement processor stopped");
        })
    }

    /// Spawn the loop with its own shutdown channel.
    pub fn start(self: Arc<Self>) -> SettlementProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = self.spawn(shutdown_rx);
        SettlementProcessorHandle { shutdown_tx, task }
    }
}

pub struct SettlementProcessorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SettlementProcessorHandle {
    /// Signal shutdown and wait up to `grace` for the loop to exit. The task
    /// is aborted on timeout.
    pub async fn shutdown(mut self, grace: Duration) -> Result<()> {
        // A closed channel means the loop has already exited.
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("settlement processor task ended abnormally: {}", e);
                Err(PipelineError::ProcessorTask(e.to_string()))
            }
            Err(_) => {
                self.task.abort();
                error!(
                    "settlement processor did not stop within {}s, aborted",
                    grace.as_secs()
                );
                Err(PipelineError::Shutdown {
                    grace_secs: grace.as_secs(),
                })
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
