//! Expiry sweeper.
//!
//! Periodically deletes messages whose time-to-live has passed. Each cycle
//! takes one snapshot of the current time, counts expired records under a
//! read lock, and only takes the write lock for the batch delete when there
//! is something to remove. A batch that cannot be persisted is left in place
//! and the cycle reports nothing, so the published report always matches
//! what was actually deleted.

use crate::error::StoreError;
use crate::store::MessageStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Sweeper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Time between cycles
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on a single cycle
    #[serde(default = "default_cycle_timeout", with = "humantime_serde")]
    pub cycle_timeout: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_cycle_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            cycle_timeout: default_cycle_timeout(),
        }
    }
}

/// Where the sweeper is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPhase {
    Idle,
    Scanning,
    Deleting,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records with `expires_at <= cutoff` were removed
    pub cutoff: DateTime<Utc>,
    pub removed: usize,
}

/// Background deleter of expired messages.
pub struct ExpirySweeper {
    store: Arc<MessageStore>,
    config: SweepConfig,
    phase: RwLock<SweepPhase>,
    last_report: RwLock<Option<SweepReport>>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<MessageStore>, config: SweepConfig) -> Self {
        Self {
            store,
            config,
            phase: RwLock::new(SweepPhase::Idle),
            last_report: RwLock::new(None),
        }
    }

    async fn enter(&self, phase: SweepPhase) {
        *self.phase.write().await = phase;
    }

    /// Run one cycle: scan, then delete the expired batch.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let cutoff = self.store.now();

        self.enter(SweepPhase::Scanning).await;
        let expired = self.store.count_expired(cutoff).await;

        let removed = if expired == 0 {
            Ok(0)
        } else {
            self.enter(SweepPhase::Deleting).await;
            self.store.purge_expired(cutoff).await
        };
        self.enter(SweepPhase::Idle).await;
        let removed = removed?;

        let report = SweepReport { cutoff, removed };
        *self.last_report.write().await = Some(report);
        Ok(report)
    }

    /// Run one cycle bounded by the configured cycle timeout.
    async fn bounded_cycle(&self) -> Result<SweepReport, StoreError> {
        match timeout(self.config.cycle_timeout, self.sweep_once()).await {
            Ok(result) => result,
            Err(_) => {
                self.enter(SweepPhase::Idle).await;
                Err(StoreError::Timeout)
            }
        }
    }

    /// Run the sweeper until `shutdown` fires or its sender is dropped.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Starting expiry sweeper, interval: {:?}, cycle timeout: {:?}",
            self.config.interval, self.config.cycle_timeout
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.bounded_cycle().await {
                        Ok(report) if report.removed > 0 => {
                            info!("Sweep cycle removed {} expired messages", report.removed);
                        }
                        Ok(_) => debug!("No expired messages this cycle"),
                        Err(StoreError::Timeout) => {
                            warn!("Sweep cycle exceeded {:?}, retrying next cycle", self.config.cycle_timeout);
                        }
                        Err(e) => error!("Sweep cycle failed, retrying next cycle: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Expiry sweeper received shutdown signal, stopping");
                    break;
                }
            }
        }
    }

    pub async fn phase(&self) -> SweepPhase {
        *self.phase.read().await
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        *self.last_report.read().await
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

/// Stops a spawned sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop after its current cycle.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Expiry sweeper already stopped");
        }
    }
}

/// Spawn the sweeper as a background task.
///
/// Dropping every [`SweeperHandle`] also stops the task.
pub fn spawn_sweeper(sweeper: Arc<ExpirySweeper>) -> (tokio::task::JoinHandle<()>, SweeperHandle) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    (task, SweeperHandle { shutdown_tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration as ChronoDuration;

    fn setup() -> (Arc<MessageStore>, ManualClock) {
        let clock = ManualClock::default();
        let store = Arc::new(MessageStore::with_clock(Arc::new(clock.clone())));
        (store, clock)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (store, clock) = setup();
        store.put("+15550001111", "+15550002222", b"a".to_vec(), 1).await.unwrap();
        let keep = store.put("+15550001111", "+15550002222", b"b".to_vec(), 60).await.unwrap();

        let sweeper = ExpirySweeper::new(store.clone(), SweepConfig::default());

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.removed, 0);

        clock.advance(ChronoDuration::seconds(2));
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.cutoff, clock.now());

        assert!(store.contains(keep.id).await);
        assert_eq!(sweeper.last_report().await, Some(report));
        assert_eq!(sweeper.phase().await, SweepPhase::Idle);
    }

    #[tokio::test]
    async fn test_message_past_ttl_is_gone_after_cycle() {
        let (store, clock) = setup();
        let receipt = store
            .put("+15550001111", "+15550002222", b"ttl one".to_vec(), 1)
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(store.clone(), SweepConfig::default());

        // Two sweep intervals later
        clock.advance(ChronoDuration::seconds(15));
        sweeper.sweep_once().await.unwrap();

        assert!(!store.contains(receipt.id).await);
        assert!(store.take_for_recipient("+15550002222").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cycle_that_cannot_persist_removes_and_reports_nothing() {
        use crate::types::{PayloadPolicy, StoreLimits};
        use vault::{SealingKey, Snapshots};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.vault");
        let clock = ManualClock::default();
        let store = Arc::new(
            MessageStore::open(
                Snapshots::sealed(&path, SealingKey::generate()),
                PayloadPolicy::Opaque,
                StoreLimits::default(),
                Arc::new(clock.clone()),
            )
            .await
            .unwrap(),
        );
        store.put("+15550001111", "+15550002222", b"x".to_vec(), 1).await.unwrap();
        clock.advance(ChronoDuration::seconds(2));

        let sweeper = ExpirySweeper::new(store.clone(), SweepConfig::default());

        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(matches!(sweeper.sweep_once().await, Err(StoreError::Vault(_))));
        assert_eq!(store.len().await, 1);
        assert_eq!(sweeper.last_report().await, None);
        assert_eq!(sweeper.phase().await, SweepPhase::Idle);

        std::fs::remove_dir(&blocker).unwrap();
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(sweeper.last_report().await, Some(report));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_background_sweeper_runs_and_stops() {
        let (store, clock) = setup();
        store.put("+15550001111", "+15550002222", b"x".to_vec(), 1).await.unwrap();
        clock.advance(ChronoDuration::seconds(2));

        let config = SweepConfig {
            interval: Duration::from_millis(20),
            cycle_timeout: Duration::from_secs(1),
        };
        let sweeper = Arc::new(ExpirySweeper::new(store.clone(), config));
        let (task, handle) = spawn_sweeper(sweeper.clone());

        for _ in 0..50 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(store.is_empty().await);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_sweeper() {
        let (store, _) = setup();
        let config = SweepConfig {
            interval: Duration::from_millis(10),
            cycle_timeout: Duration::from_secs(1),
        };
        let (task, handle) = spawn_sweeper(Arc::new(ExpirySweeper::new(store, config)));

        drop(handle);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
