//! The alert loop.
//!
//! One task owns the [`SampleMerger`] and reacts to feed readings, the periodic
//! re-evaluation timer, threshold changes and operator requests. Deliveries run
//! as separate tasks so a slow provider never holds up sample processing.

use crate::debounce::Debouncer;
use crate::feed::Subscription;
use crate::ingest::{LatestReadings, Sample, SampleMerger};
use crate::notify::{AlertMode, DeliveryReport, Dispatcher};
use crate::settings::SettingsStore;
use crate::telemetry::SensorReading;
use crate::thresholds::{evaluate, ThresholdConfig, Violation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("alert pipeline is shut down")]
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub mode: AlertMode,
    pub violations_count: usize,
    pub violations: Vec<Violation>,
    pub reports: Vec<DeliveryReport>,
    pub created_at: DateTime<Utc>,
}

/// Most recent alerts, newest first.
#[derive(Debug)]
pub struct AlertHistory {
    limit: usize,
    entries: Mutex<VecDeque<AlertRecord>>,
}

impl AlertHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, VecDeque<AlertRecord>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, record: AlertRecord) {
        let mut entries = self.entries();
        entries.push_front(record);
        entries.truncate(self.limit);
    }

    pub fn snapshot(&self) -> Vec<AlertRecord> {
        self.entries().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct PipelineDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub debouncer: Arc<Debouncer>,
    pub readings: mpsc::Receiver<SensorReading>,
    pub subscription: Option<Subscription>,
    pub window_size: usize,
    pub history_limit: usize,
}

enum Command {
    ManualAlert(oneshot::Sender<AlertRecord>),
    Latest(oneshot::Sender<LatestReadings>),
    Samples(oneshot::Sender<Vec<Sample>>),
}

#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
    history: Arc<AlertHistory>,
    debouncer: Arc<Debouncer>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)
    }

    /// Evaluates the latest readings and notifies every channel regardless of
    /// the cooldown. Resolves once every channel has answered.
    pub async fn manual_alert(&self) -> Result<AlertRecord, PipelineError> {
        self.request(Command::ManualAlert).await
    }

    pub async fn latest(&self) -> Result<LatestReadings, PipelineError> {
        self.request(Command::Latest).await
    }

    pub async fn samples(&self) -> Result<Vec<Sample>, PipelineError> {
        self.request(Command::Samples).await
    }

    pub fn history(&self) -> Vec<AlertRecord> {
        self.history.snapshot()
    }

    pub fn last_dispatch_at(&self) -> Option<DateTime<Utc>> {
        self.debouncer.last_dispatch_at()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stops the loop, the feed subscription and the timer, and waits for
    /// in-flight deliveries to settle.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.commands.closed().await;
    }
}

pub struct AlertPipeline;

impl AlertPipeline {
    pub fn spawn(deps: PipelineDeps) -> PipelineHandle {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let history = Arc::new(AlertHistory::new(deps.history_limit));
        let cancel = CancellationToken::new();
        let thresholds_rx = deps.settings.watch_thresholds();
        let thresholds = *thresholds_rx.borrow();

        let runtime = Runtime {
            merger: SampleMerger::new(deps.window_size),
            clock: PipelineClock::new(),
            next_check: Instant::now() + thresholds.alert_interval(),
            thresholds,
            job: DispatchJob {
                settings: deps.settings,
                dispatcher: deps.dispatcher,
                history: history.clone(),
            },
            debouncer: deps.debouncer.clone(),
            inflight: JoinSet::new(),
        };

        tokio::spawn(runtime.run(
            commands_rx,
            deps.readings,
            thresholds_rx,
            deps.subscription,
            cancel.clone(),
        ));

        PipelineHandle {
            commands: commands_tx,
            history,
            debouncer: deps.debouncer,
            cancel,
        }
    }
}

#[derive(Clone)]
struct DispatchJob {
    settings: Arc<dyn SettingsStore>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<AlertHistory>,
}

impl DispatchJob {
    async fn run(
        self,
        mode: AlertMode,
        violations: Vec<Violation>,
        latest: LatestReadings,
    ) -> AlertRecord {
        let channels = self.settings.channels().await;
        let created_at = Utc::now();
        let reports = if channels.is_empty() {
            tracing::warn!(mode = %mode, "no delivery channel configured; alert not sent");
            Vec::new()
        } else {
            self.dispatcher
                .dispatch(mode, &violations, &latest, &channels, created_at)
                .await
        };

        let record = AlertRecord {
            id: Uuid::new_v4(),
            mode,
            violations_count: violations.len(),
            violations,
            reports,
            created_at,
        };
        let delivered = record
            .reports
            .iter()
            .filter(|r| r.outcome.is_delivered())
            .count();
        tracing::info!(
            alert_id = %record.id,
            mode = %mode,
            violations = record.violations_count,
            channels = record.reports.len(),
            delivered,
            "alert dispatch finished"
        );
        self.history.push(record.clone());
        record
    }
}

/// Wall-clock time derived from the runtime's monotonic clock, so cooldown
/// arithmetic and timer deadlines never disagree.
struct PipelineClock {
    anchor: Instant,
    anchor_utc: DateTime<Utc>,
}

impl PipelineClock {
    fn new() -> Self {
        Self {
            anchor: Instant::now(),
            anchor_utc: Utc::now(),
        }
    }

    fn at(&self, instant: Instant) -> DateTime<Utc> {
        let elapsed = instant.saturating_duration_since(self.anchor);
        self.anchor_utc
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

struct Runtime {
    merger: SampleMerger,
    clock: PipelineClock,
    thresholds: ThresholdConfig,
    /// When the next re-evaluation runs without new readings.
    next_check: Instant,
    job: DispatchJob,
    debouncer: Arc<Debouncer>,
    inflight: JoinSet<()>,
}

impl Runtime {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut readings: mpsc::Receiver<SensorReading>,
        mut thresholds_rx: watch::Receiver<ThresholdConfig>,
        subscription: Option<Subscription>,
        cancel: CancellationToken,
    ) {
        let recheck = sleep_until(self.next_check);
        tokio::pin!(recheck);
        let mut feed_open = true;
        let mut settings_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                reading = readings.recv(), if feed_open => match reading {
                    Some(reading) => {
                        self.merger.push(reading);
                        self.check_automatic();
                    }
                    None => {
                        tracing::info!("telemetry feed closed");
                        feed_open = false;
                    }
                },
                changed = thresholds_rx.changed(), if settings_open => match changed {
                    Ok(()) => {
                        let next = *thresholds_rx.borrow_and_update();
                        let interval_changed =
                            next.alert_interval() != self.thresholds.alert_interval();
                        self.thresholds = next;
                        if interval_changed {
                            self.check_automatic();
                            tracing::info!(
                                interval_minutes = next.alert_interval_minutes,
                                "re-armed re-evaluation timer"
                            );
                        }
                    }
                    Err(_) => settings_open = false,
                },
                _ = &mut recheck => self.check_automatic(),
                Some(joined) = self.inflight.join_next() => {
                    if let Err(err) = joined {
                        tracing::warn!(error = %err, "alert dispatch task failed");
                    }
                }
            }

            if recheck.deadline() != self.next_check {
                recheck.as_mut().reset(self.next_check);
            }
        }

        tracing::info!("alert pipeline stopping");
        readings.close();
        if let Some(subscription) = subscription {
            subscription.close().await;
        }
        while let Some(joined) = self.inflight.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "alert dispatch task failed during shutdown");
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Latest(reply) => {
                let _ = reply.send(self.merger.latest());
            }
            Command::Samples(reply) => {
                let _ = reply.send(self.merger.samples());
            }
            Command::ManualAlert(reply) => {
                let latest = self.merger.latest();
                let violations = evaluate(&latest, &self.thresholds);
                tracing::info!(violations = violations.len(), "manual alert requested");
                let job = self.job.clone();
                self.inflight.spawn(async move {
                    let record = job.run(AlertMode::Manual, violations, latest).await;
                    let _ = reply.send(record);
                });
            }
        }
    }

    /// Wakes when the cooldown expires, or one interval from `now` when no
    /// cooldown is running.
    fn schedule_recheck(&mut self, now: Instant) {
        let period = self.thresholds.alert_interval();
        let remaining = self.debouncer.last_dispatch_at().and_then(|last| {
            let expires = last + chrono::Duration::from_std(period).ok()?;
            (expires - self.clock.at(now))
                .to_std()
                .ok()
                .filter(|d| !d.is_zero())
        });
        self.next_check = now + remaining.unwrap_or(period);
    }

    fn check_automatic(&mut self) {
        let now = Instant::now();
        self.check_automatic_at(now);
        self.schedule_recheck(now);
    }

    fn check_automatic_at(&mut self, now: Instant) {
        let latest = self.merger.latest();
        let violations = evaluate(&latest, &self.thresholds);
        if violations.is_empty() {
            return;
        }

        let interval_minutes = self.thresholds.alert_interval_minutes.max(1);
        if !self.debouncer.should_dispatch(self.clock.at(now), interval_minutes) {
            tracing::debug!(
                violations = violations.len(),
                "violation within cooldown; alert suppressed"
            );
            return;
        }

        tracing::info!(violations = violations.len(), "threshold violation; dispatching alert");
        let job = self.job.clone();
        self.inflight.spawn(async move {
            job.run(AlertMode::Automatic, violations, latest).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{
        ChannelConfig, ChannelKind, DeliveryError, DeliveryOutcome, Notifier,
        DEFAULT_DELIVERY_TIMEOUT,
    };
    use crate::settings::FileSettingsStore;
    use crate::telemetry::SensorType;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct CountingNotifier {
        kind: ChannelKind,
        sent: Mutex<Vec<String>>,
    }

    impl CountingNotifier {
        fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn deliver(
            &self,
            message: &str,
            _channel: &ChannelConfig,
        ) -> Result<DeliveryOutcome, DeliveryError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(DeliveryOutcome::Delivered)
        }
    }

    struct Harness {
        handle: PipelineHandle,
        readings: mpsc::Sender<SensorReading>,
        whatsapp: Arc<CountingNotifier>,
        telegram: Arc<CountingNotifier>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        harness_with_interval(10).await
    }

    async fn harness_with_interval(minutes: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            format!(
                r#"{{
                    "thresholds": {{"minPh": 6.5, "maxPh": 8.5, "minNtu": 0, "maxNtu": 5,
                                   "minTds": 0, "maxTds": 10, "customAlertInterval": {minutes}}},
                    "telegram": {{"botToken": "123:abc", "chatId": "42"}},
                    "whatsapp": {{"phone": "15550001111"}}
                }}"#
            ),
        )
        .unwrap();
        let settings = Arc::new(FileSettingsStore::open(&path).await.unwrap());

        let whatsapp = CountingNotifier::new(ChannelKind::WhatsApp);
        let telegram = CountingNotifier::new(ChannelKind::Telegram);
        let dispatcher = Dispatcher::new(
            vec![
                whatsapp.clone() as Arc<dyn Notifier>,
                telegram.clone() as Arc<dyn Notifier>,
            ],
            DEFAULT_DELIVERY_TIMEOUT,
        );

        let (tx, rx) = mpsc::channel(16);
        let handle = AlertPipeline::spawn(PipelineDeps {
            settings,
            dispatcher: Arc::new(dispatcher),
            debouncer: Arc::new(Debouncer::new()),
            readings: rx,
            subscription: None,
            window_size: 20,
            history_limit: DEFAULT_HISTORY_LIMIT,
        });

        Harness {
            handle,
            readings: tx,
            whatsapp,
            telegram,
            _dir: dir,
        }
    }

    fn reading(sensor: SensorType, value: f64, offset_secs: i64) -> SensorReading {
        SensorReading {
            sensor,
            value,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
                + chrono::Duration::seconds(offset_secs),
        }
    }

    async fn wait_for_history(handle: &PipelineHandle, len: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.history().len() < len {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_latest(handle: &PipelineHandle, expected: LatestReadings) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.latest().await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn violation_dispatches_once_to_every_channel() {
        let h = harness().await;
        h.readings.send(reading(SensorType::Ph, 9.0, 0)).await.unwrap();
        h.readings.send(reading(SensorType::Ntu, 4.0, 0)).await.unwrap();
        h.readings.send(reading(SensorType::Tds, 5.0, 0)).await.unwrap();

        wait_for_history(&h.handle, 1).await;
        let record = &h.handle.history()[0];
        assert_eq!(record.mode, AlertMode::Automatic);
        assert_eq!(record.violations_count, 1);
        assert_eq!(record.violations[0].sensor, SensorType::Ph);
        assert_eq!(record.reports.len(), 2);
        assert!(record.reports.iter().all(|r| r.outcome.is_delivered()));
        assert!(h.handle.last_dispatch_at().is_some());

        // Further violations inside the cooldown are suppressed.
        h.readings.send(reading(SensorType::Ph, 9.5, 60)).await.unwrap();
        wait_for_latest(
            &h.handle,
            LatestReadings {
                ph: Some(9.5),
                ntu: Some(4.0),
                tds: Some(5.0),
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.handle.history().len(), 1);
        assert_eq!(h.whatsapp.sent().len(), 1);
        assert_eq!(h.telegram.sent().len(), 1);
        assert!(h.telegram.sent()[0].starts_with("[AUTOMATIC ALERT]"));

        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn sustained_violation_realerts_once_per_interval() {
        let h = harness_with_interval(1).await;
        tokio::time::pause();

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.readings.send(reading(SensorType::Ph, 9.0, 0)).await.unwrap();
        wait_for_history(&h.handle, 1).await;
        let first = h.handle.last_dispatch_at().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.handle.history().len(), 1);

        // No new readings: the timer alone must re-alert once the minute is up.
        tokio::time::sleep(Duration::from_secs(31)).await;
        wait_for_history(&h.handle, 2).await;
        let second = h.handle.last_dispatch_at().unwrap();
        assert_eq!((second - first).num_seconds(), 60);
        assert!(h
            .handle
            .history()
            .iter()
            .all(|r| r.mode == AlertMode::Automatic));
        assert_eq!(h.whatsapp.sent().len(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_history(&h.handle, 3).await;
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn in_range_readings_never_dispatch() {
        let h = harness().await;
        h.readings.send(reading(SensorType::Ph, 7.0, 0)).await.unwrap();
        h.readings.send(reading(SensorType::Tds, 8.0, 0)).await.unwrap();
        wait_for_latest(
            &h.handle,
            LatestReadings {
                ph: Some(7.0),
                ntu: None,
                tds: Some(8.0),
            },
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.handle.history().is_empty());
        assert!(h.whatsapp.sent().is_empty());
        assert_eq!(h.handle.samples().await.unwrap().len(), 1);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_alert_bypasses_cooldown() {
        let h = harness().await;
        h.readings.send(reading(SensorType::Tds, 50.0, 0)).await.unwrap();
        wait_for_history(&h.handle, 1).await;

        let record = h.handle.manual_alert().await.unwrap();
        assert_eq!(record.mode, AlertMode::Manual);
        assert_eq!(record.violations_count, 1);
        assert_eq!(record.reports.len(), 2);
        assert_eq!(h.handle.history().len(), 2);
        assert_eq!(h.handle.history()[0].id, record.id);

        let sent = h.telegram.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].starts_with("[MANUAL ALERT]"));
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_alert_without_violations_sends_all_clear() {
        let h = harness().await;
        let record = h.handle.manual_alert().await.unwrap();
        assert_eq!(record.violations_count, 0);
        assert_eq!(record.reports.len(), 2);
        assert!(h.whatsapp.sent()[0].contains("All readings are within"));
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_processing() {
        let h = harness().await;
        h.handle.shutdown().await;

        assert!(!h.handle.is_running());
        assert_eq!(h.handle.manual_alert().await.unwrap_err(), PipelineError::Closed);
        assert!(h.readings.send(reading(SensorType::Ph, 12.0, 0)).await.is_err());
        assert!(h.whatsapp.sent().is_empty());
    }

    #[test]
    fn history_keeps_newest_first_within_limit() {
        let history = AlertHistory::new(2);
        for count in 0..3 {
            history.push(AlertRecord {
                id: Uuid::new_v4(),
                mode: AlertMode::Automatic,
                violations_count: count,
                violations: Vec::new(),
                reports: Vec::new(),
                created_at: Utc::now(),
            });
        }
        let counts: Vec<usize> = history.snapshot().iter().map(|r| r.violations_count).collect();
        assert_eq!(counts, vec![2, 1]);
    }
}
