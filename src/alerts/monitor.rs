//! Scheduled overcrowding monitor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::config::{AlertEvent, AlertPolicy, MAX_PERIOD};
use super::notifier::{DispatchError, Dispatcher};
use crate::storage::{SampleStore, StoreError};

/// Whether any cycle or test send is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Executing,
}

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No location breached the threshold
    Quiet,
    /// One batched notification went out
    Notified { locations: usize },
    QueryFailed,
    DispatchFailed,
}

/// Samples the store on a fixed cadence and sends one batched notification
/// per cycle for every location over the threshold.
///
/// Holds no state between cycles: a location that stays overcrowded is
/// reported again on every cycle.
pub struct OvercrowdingMonitor {
    store: Arc<dyn SampleStore>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: AlertPolicy,
    /// Cycles and test sends currently running
    in_flight: AtomicUsize,
}

impl OvercrowdingMonitor {
    pub fn new(
        store: Arc<dyn SampleStore>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            store,
            dispatcher,
            policy,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn state(&self) -> MonitorState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            MonitorState::Executing
        } else {
            MonitorState::Idle
        }
    }

    /// Run one detect-and-notify cycle now
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with the window anchored at `now`.
    ///
    /// Never returns an error: failures are logged and end the cycle.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleOutcome {
        let _guard = ExecutingGuard::enter(&self.in_flight);

        match self.detect_and_notify(now).await {
            Ok(0) => {
                tracing::debug!(threshold = self.policy.threshold, "No overcrowded locations");
                CycleOutcome::Quiet
            }
            Ok(locations) => CycleOutcome::Notified { locations },
            Err(MonitorError::Query(e)) => {
                tracing::error!(
                    threshold = self.policy.threshold,
                    window_minutes = self.policy.window_minutes(),
                    error = %e,
                    "Overcrowding query failed"
                );
                CycleOutcome::QueryFailed
            }
            Err(MonitorError::Dispatch(e)) => {
                tracing::error!(
                    dispatcher = self.dispatcher.kind(),
                    recipients = ?self.policy.recipients,
                    error = %e,
                    "Failed to send overcrowding alert"
                );
                CycleOutcome::DispatchFailed
            }
        }
    }

    async fn detect_and_notify(&self, now: DateTime<Utc>) -> Result<usize, MonitorError> {
        let events = self.detect(now).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let notification = self.policy.overcrowding_notification(&events);
        self.dispatcher.send(&notification).await?;

        tracing::info!(
            locations = events.len(),
            dispatcher = self.dispatcher.kind(),
            "Overcrowding alert dispatched"
        );
        Ok(events.len())
    }

    /// Breaches inside the window ending at `now`, without notifying anyone
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<Vec<AlertEvent>, MonitorError> {
        let readings = self
            .store
            .overcrowded_since(self.policy.cutoff(now), self.policy.threshold)
            .await?;

        Ok(readings
            .into_iter()
            .map(|r| AlertEvent::from_reading(r, now))
            .collect())
    }

    /// Current breaches, for dashboards
    pub async fn snapshot(&self) -> Result<Vec<AlertEvent>, MonitorError> {
        self.detect(Utc::now()).await
    }

    /// Send the canned delivery-check message, skipping detection entirely
    pub async fn send_test(&self) -> Result<(), MonitorError> {
        let _guard = ExecutingGuard::enter(&self.in_flight);
        let notification = self.policy.test_notification();
        self.dispatcher.send(&notification).await?;
        tracing::info!(dispatcher = self.dispatcher.kind(), "Test notification sent");
        Ok(())
    }

    /// Spawn the periodic task. The first cycle runs one cadence after start.
    ///
    /// Cycles run inline in the ticker loop and late ticks are skipped, so
    /// an overrunning cycle never overlaps the next one.
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let cadence = self.policy.cadence.min(MAX_PERIOD);

        let task = tokio::spawn(async move {
            let now = Instant::now();
            let first = now.checked_add(cadence).unwrap_or(now);
            let mut ticker = interval_at(first, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                cadence_secs = cadence.as_secs(),
                threshold = self.policy.threshold,
                window_minutes = self.policy.window_minutes(),
                "Overcrowding monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Overcrowding monitor shutting down");
                        break;
                    }
                }
            }
        });

        MonitorHandle { shutdown_tx, task }
    }
}

/// Owns the running monitor task. Dropping the handle also stops the task.
pub struct MonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop after the in-flight cycle (if any) completes
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Overcrowding monitor task ended abnormally");
        }
    }

    /// Cancel immediately, abandoning any in-flight cycle
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Counts one in-flight operation until dropped, however it ends
struct ExecutingGuard<'a>(&'a AtomicUsize);

impl<'a> ExecutingGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cycle errors. Both end the cycle; neither is retried.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Query error: {0}")]
    Query(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
