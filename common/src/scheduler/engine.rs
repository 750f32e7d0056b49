// Scan scheduler engine: the detect → dispatch → sleep loop

use crate::config::{self, CadenceMode};
use crate::db::EndpointStore;
use crate::errors::SchedulerError;
use crate::models::CycleSummary;
use crate::queue::QueueTransport;
use crate::scheduler::clock::Clock;
use crate::scheduler::detector::StalenessDetector;
use crate::scheduler::dispatcher::Dispatcher;
use crate::telemetry;
use futures::{future, stream, FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Configuration for the scan scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between cycles
    pub poll_interval: Duration,
    /// Endpoints last scanned longer ago than this are due
    pub staleness_threshold: chrono::Duration,
    /// Upper bound on candidates selected per cycle
    pub max_candidates_per_cycle: Option<i64>,
    /// Publishes in flight at once; 1 means strictly sequential
    pub dispatch_concurrency: usize,
    pub cadence: CadenceMode,
    /// Stop after this many cycles; `None` runs until shutdown
    pub max_cycles: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            staleness_threshold: chrono::Duration::hours(24),
            max_candidates_per_cycle: None,
            dispatch_concurrency: 1,
            cadence: CadenceMode::FixedDelay,
            max_cycles: None,
        }
    }
}

impl From<&config::SchedulerConfig> for SchedulerConfig {
    fn from(settings: &config::SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            staleness_threshold: chrono::Duration::try_hours(settings.staleness_threshold_hours)
                .unwrap_or(chrono::Duration::MAX),
            max_candidates_per_cycle: settings.max_candidates_per_cycle,
            dispatch_concurrency: settings.dispatch_concurrency.max(1),
            cadence: settings.cadence,
            max_cycles: settings.max_cycles,
        }
    }
}

/// Requests a running scheduler to stop.
///
/// The loop notices between cycles (an in-progress sleep is cut short) and
/// between dispatch calls. A publish already handed to the transport runs to
/// completion.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Main scan scheduler implementation.
///
/// Holds no memory of previous cycles: every cycle re-reads staleness from
/// the store, so an endpoint whose publish failed is simply selected again.
pub struct ScanScheduler {
    config: SchedulerConfig,
    store: Arc<dyn EndpointStore>,
    detector: StalenessDetector,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ScanScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn EndpointStore>,
        transport: Arc<dyn QueueTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let detector = StalenessDetector::new(
            store.clone(),
            clock.clone(),
            config.staleness_threshold,
            config.max_candidates_per_cycle,
        );
        let dispatcher = Dispatcher::new(transport, clock.clone());

        Self {
            config,
            store,
            detector,
            dispatcher,
            clock,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Verify the store, then run cycles until shutdown or the cycle limit.
    ///
    /// Returns the number of cycles run. Fails only when the startup check
    /// cannot reach the store, in which case no cycle is attempted. Once the
    /// check has passed the store is closed on every exit path, including a
    /// panic escaping a cycle.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<u64, SchedulerError> {
        info!(
            poll_interval_seconds = self.config.poll_interval.as_secs(),
            staleness_threshold_hours = self.config.staleness_threshold.num_hours(),
            dispatch_concurrency = self.config.dispatch_concurrency,
            cadence = ?self.config.cadence,
            "Scan scheduler starting"
        );

        if let Err(e) = self.store.health_check().await {
            return Err(SchedulerError::StartupCheck(e));
        }
        info!("Store connection established");

        let outcome = AssertUnwindSafe(self.run_loop()).catch_unwind().await;

        self.store.close().await;
        info!("Store connection closed");

        match outcome {
            Ok(cycles) => {
                info!(cycles, "Scan scheduler stopped");
                Ok(cycles)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_loop(&self) -> u64 {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut completed: u64 = 0;

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, leaving scheduler loop");
                break;
            }

            let started = self.clock.now();
            self.run_cycle().await;
            completed += 1;

            if self.config.max_cycles.is_some_and(|max| completed >= max) {
                info!(cycles = completed, "Cycle limit reached");
                break;
            }

            if self.shutdown_requested() {
                info!("Shutdown requested during cycle, leaving scheduler loop");
                break;
            }

            let pause = self.pause_after(started);
            info!(
                pause_seconds = pause.as_secs_f64(),
                "Waiting {} seconds until next check...",
                pause.as_secs()
            );

            tokio::select! {
                _ = self.clock.sleep(pause) => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Shutdown requested during sleep, leaving scheduler loop");
                    break;
                }
            }
        }

        completed
    }

    /// Time to wait before the next cycle, given when the last one began
    fn pause_after(&self, cycle_started: chrono::DateTime<chrono::Utc>) -> Duration {
        match self.config.cadence {
            CadenceMode::FixedDelay => self.config.poll_interval,
            CadenceMode::FixedRate => {
                let elapsed = (self.clock.now() - cycle_started)
                    .to_std()
                    .unwrap_or_default();
                self.config.poll_interval.saturating_sub(elapsed)
            }
        }
    }

    /// Run one detect-then-dispatch cycle.
    ///
    /// Never fails: a store error is logged and reported as a zero summary
    /// with `store_failed` set, publish errors are counted as skipped.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let started = self.clock.now();
        info!(at = %started.to_rfc3339(), "Checking for endpoints to scan");

        let candidates = match self.detector.fetch_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Error fetching endpoints needing scan, cycle aborted");
                telemetry::record_cycle_store_failure();
                return CycleSummary::store_failure();
            }
        };

        let found = candidates.len();
        info!(found, "Found {} endpoints needing scan", found);

        let mut summary = CycleSummary {
            found,
            ..CycleSummary::default()
        };

        // buffered() yields results in candidate order whatever the concurrency
        let mut outcomes = stream::iter(candidates.iter())
            .take_while(|_| future::ready(!self.shutdown_requested()))
            .map(|candidate| self.dispatcher.dispatch(candidate))
            .buffered(self.config.dispatch_concurrency.max(1))
            .boxed();

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(_) => summary.queued += 1,
                Err(_) => summary.skipped += 1,
            }
        }

        summary.not_attempted = found - summary.queued - summary.skipped;
        if summary.not_attempted > 0 {
            warn!(
                not_attempted = summary.not_attempted,
                "Shutdown requested mid-cycle, remaining endpoints left for a later run"
            );
        }

        info!(
            queued = summary.queued,
            skipped = summary.skipped,
            "Summary - Queued: {}, Skipped: {}",
            summary.queued,
            summary.skipped
        );

        let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
        telemetry::record_cycle(&summary, elapsed.as_secs_f64());

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects (level, message) of every event emitted while installed
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(tracing::Level, String)>>>);

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    impl CapturedEvents {
        fn at(&self, level: tracing::Level) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    struct FixedStore {
        reachable: bool,
    }

    #[async_trait::async_trait]
    impl EndpointStore for FixedStore {
        async fn health_check(&self) -> Result<(), crate::errors::StoreError> {
            if self.reachable {
                Ok(())
            } else {
                Err(crate::errors::StoreError::Unavailable("refused".to_string()))
            }
        }

        async fn list_stale_endpoints(
            &self,
            _now: chrono::DateTime<chrono::Utc>,
            _threshold: chrono::Duration,
            _limit: Option<i64>,
        ) -> Result<Vec<crate::models::ScanCandidate>, crate::errors::StoreError> {
            Ok(Vec::new())
        }

        async fn close(&self) {}
    }

    fn scheduler_with(store: FixedStore, max_cycles: Option<u64>) -> ScanScheduler {
        ScanScheduler::new(
            SchedulerConfig {
                max_cycles,
                ..SchedulerConfig::default()
            },
            Arc::new(store),
            Arc::new(crate::queue::transport::MockQueueTransport::new()),
            Arc::new(crate::scheduler::clock::ManualClock::new(chrono::Utc::now())),
        )
    }

    #[tokio::test]
    async fn test_startup_failure_is_left_to_caller_to_report() {
        let events = CapturedEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let result = scheduler_with(FixedStore { reachable: false }, Some(1))
            .start()
            .await;

        assert!(matches!(result, Err(SchedulerError::StartupCheck(_))));
        assert!(events.at(tracing::Level::ERROR).is_empty());
    }

    #[tokio::test]
    async fn test_wait_between_cycles_logged_at_info() {
        let events = CapturedEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        scheduler_with(FixedStore { reachable: true }, Some(2))
            .start()
            .await
            .unwrap();

        let waits: Vec<String> = events
            .at(tracing::Level::INFO)
            .into_iter()
            .filter(|m| m.contains("until next check"))
            .collect();
        assert_eq!(waits, vec!["Waiting 120 seconds until next check...".to_string()]);
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.staleness_threshold, chrono::Duration::hours(24));
        assert_eq!(config.dispatch_concurrency, 1);
        assert_eq!(config.cadence, CadenceMode::FixedDelay);
        assert!(config.max_cycles.is_none());
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let mut settings = config::Settings::default().scheduler;
        settings.poll_interval_seconds = 30;
        settings.staleness_threshold_hours = 6;
        settings.dispatch_concurrency = 0;
        settings.max_cycles = Some(3);

        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.staleness_threshold, chrono::Duration::hours(6));
        assert_eq!(config.dispatch_concurrency, 1);
        assert_eq!(config.max_cycles, Some(3));
    }

    struct PanickingStore {
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl EndpointStore for PanickingStore {
        async fn health_check(&self) -> Result<(), crate::errors::StoreError> {
            Ok(())
        }

        async fn list_stale_endpoints(
            &self,
            _now: chrono::DateTime<chrono::Utc>,
            _threshold: chrono::Duration,
            _limit: Option<i64>,
        ) -> Result<Vec<crate::models::ScanCandidate>, crate::errors::StoreError> {
            panic!("driver bug");
        }

        async fn close(&self) {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_store_closed_when_cycle_panics() {
        let store = Arc::new(PanickingStore {
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        let scheduler = ScanScheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            Arc::new(crate::queue::transport::MockQueueTransport::new()),
            Arc::new(crate::scheduler::clock::ManualClock::new(chrono::Utc::now())),
        );

        let outcome = AssertUnwindSafe(scheduler.start()).catch_unwind().await;

        assert!(outcome.is_err());
        assert!(store.closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_out_of_range_threshold_does_not_panic() {
        let mut settings = config::Settings::default().scheduler;
        settings.staleness_threshold_hours = i64::MAX;

        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.staleness_threshold, chrono::Duration::MAX);
    }

    #[test]
    fn test_shutdown_handle_is_shared() {
        let (tx, _rx) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        let other = handle.clone();
        assert!(!other.is_shutdown());
        handle.shutdown();
        assert!(other.is_shutdown());
    }
}
