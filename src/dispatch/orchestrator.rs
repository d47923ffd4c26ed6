//! Dispatch Orchestrator
//!
//! Walks a recipient plan strictly in order, one send at a time: pick a
//! variant, render it, send, record, then honor auto-pause and the
//! inter-message delay. The loop only leaves `Running` early through abort
//! (user or consecutive-failure limit); individual send failures are recorded
//! and skipped past.

use super::control::{ControlSurface, RunState};
use super::executor::{DispatchExecutor, MessagingChannel, ResolvedMessage};
use super::hooks::{DispatchEvent, HistorySink, Notifier};
use super::pacing::{GateOutcome, PacingConfig, PacingGate};
use super::plan::RecipientPlan;
use super::progress::{ProgressAggregator, ProgressObserver, RunMetadata, RunSummary};
use super::variation::{VariationPool, render};
use crate::error::ConfigurationError;
use crate::utils::mask_phone;
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct DispatchOrchestrator {
    run_id: Uuid,
    plan: RecipientPlan,
    pool: VariationPool,
    pacing: PacingConfig,
    executor: DispatchExecutor,
    control: ControlSurface,
    rng: Box<dyn RngCore + Send>,
    observer: Option<ProgressObserver>,
    notifier: Option<Arc<dyn Notifier>>,
    history: Option<Arc<dyn HistorySink>>,
    max_consecutive_failures: Option<u32>,
    label: Option<String>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl DispatchOrchestrator {
    /// Validate the setup and create an idle run. Nothing is sent until
    /// [`run`](Self::run) or [`start`](Self::start).
    pub fn new(
        plan: RecipientPlan,
        pool: VariationPool,
        pacing: PacingConfig,
        channel: Arc<dyn MessagingChannel>,
    ) -> Result<Self, ConfigurationError> {
        pacing.validate()?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            plan,
            pool,
            pacing,
            executor: DispatchExecutor::new(channel),
            control: ControlSurface::new(),
            rng: Box::new(StdRng::from_os_rng()),
            observer: None,
            notifier: None,
            history: None,
            max_consecutive_failures: None,
            label: None,
            extra: BTreeMap::new(),
        })
    }

    /// Replace the variant-selection RNG (seeded runs, tests).
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Abort the run after `limit` failures in a row. `None` never stops.
    pub fn with_max_consecutive_failures(
        mut self,
        limit: Option<u32>,
    ) -> Result<Self, ConfigurationError> {
        if limit == Some(0) {
            return Err(ConfigurationError::InvalidFailureLimit);
        }
        self.max_consecutive_failures = limit;
        Ok(self)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Handle for pause / resume / abort from other tasks.
    pub fn control(&self) -> ControlSurface {
        self.control.clone()
    }

    /// Run on a background task.
    pub fn start(self) -> JoinHandle<RunSummary> {
        tokio::spawn(self.run())
    }

    /// Run to completion or abort on the current task.
    pub async fn run(mut self) -> RunSummary {
        let total = self.plan.len();
        let delay = self.pacing.delay();
        let mut aggregator = ProgressAggregator::new(self.run_id, total, self.metadata())
            .with_observer(self.observer.clone());
        let mut gate =
            PacingGate::new(self.control.clone(), &self.pacing).with_notifier(self.notifier.clone());

        self.control.mark_running();
        tracing::info!(
            "Dispatch {} started: {} recipients via {}, {}s delay, auto-pause {:?}",
            self.run_id,
            total,
            self.executor.channel_name(),
            self.pacing.delay_seconds,
            self.pacing.auto_pause_interval(),
        );
        self.notify(DispatchEvent::RunStarted {
            run_id: self.run_id,
            total,
        });

        let mut aborted = false;
        for (index, recipient) in self.plan.iter().enumerate() {
            if self.control.is_aborted() {
                aborted = true;
                break;
            }

            let (variant_index, template) = self.pool.pick_text(&mut *self.rng);
            let text = render(template, &recipient.substitutions);
            let media = self.pool.pick_media(&mut *self.rng);

            let record = self
                .executor
                .dispatch(
                    index,
                    recipient,
                    ResolvedMessage {
                        text: &text,
                        variant_index,
                        media,
                    },
                )
                .await;

            let event = match &record.error {
                None => DispatchEvent::Sent {
                    index,
                    destination: record.destination.clone(),
                },
                Some(error) => DispatchEvent::Failed {
                    index,
                    destination: record.destination.clone(),
                    error: error.clone(),
                },
            };
            let snapshot = aggregator.record(record);
            self.notify(event);
            tracing::debug!(
                "Dispatch {} [{}/{}] {} ok={} failed={}",
                self.run_id,
                snapshot.current,
                snapshot.total,
                mask_phone(&recipient.destination),
                snapshot.succeeded,
                snapshot.failed,
            );

            if let Some(limit) = self.max_consecutive_failures
                && aggregator.consecutive_failures() >= limit
            {
                tracing::warn!(
                    "Dispatch {} halted after {} consecutive failures",
                    self.run_id,
                    limit
                );
                aggregator.mark_halted_by_failures();
                self.control.abort();
                aborted = true;
                break;
            }

            let sent = index + 1;
            if sent == total {
                break;
            }
            if gate.maybe_auto_pause(sent).await == GateOutcome::Aborted
                || gate.wait_tick(delay).await == GateOutcome::Aborted
            {
                aborted = true;
                break;
            }
        }

        let summary = aggregator.finalize(aborted, gate.auto_pause_count());
        self.control.finish(aborted);
        let state = if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        tracing::info!(
            "Dispatch {} {}: {}/{} attempted, {} ok, {} failed, {:.1}s, {} auto-pause(s)",
            self.run_id,
            state,
            summary.total,
            summary.planned,
            summary.succeeded,
            summary.failed,
            summary.duration_seconds,
            summary.auto_pause_count,
        );
        self.notify(DispatchEvent::RunFinished {
            state,
            succeeded: summary.succeeded,
            failed: summary.failed,
        });

        if let Some(history) = &self.history
            && let Err(e) = history.record_run(&summary).await
        {
            tracing::error!("Failed to record dispatch {} in history: {}", self.run_id, e);
        }

        summary
    }

    fn metadata(&self) -> RunMetadata {
        RunMetadata {
            label: self.label.clone(),
            pacing: self.pacing.clone(),
            text_variants: self.pool.text_variants().len(),
            media_variants: self.pool.media_variants().len(),
            use_variations: self.pool.uses_variations(),
            use_media: self.pool.uses_media(),
            max_consecutive_failures: self.max_consecutive_failures,
            extra: self.extra.clone(),
        }
    }

    fn notify(&self, event: DispatchEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::hooks::MockHistorySink;
    use crate::dispatch::plan::Recipient;
    use crate::dispatch::progress::ProgressSnapshot;
    use crate::dispatch::variation::MediaItem;
    use crate::error::{ChannelError, WacrmError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        media: Mutex<Vec<(String, String)>>,
        failing: HashSet<String>,
        abort_after: Mutex<Option<(usize, ControlSurface)>>,
    }

    impl RecordingChannel {
        fn failing(destinations: &[&str]) -> Self {
            Self {
                failing: destinations.iter().map(|d| d.to_string()).collect(),
                ..Self::default()
            }
        }

        fn abort_after(&self, sends: usize, control: ControlSurface) {
            *self.abort_after.lock().unwrap() = Some((sends, control));
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len() + self.media.lock().unwrap().len()
        }

        fn finish_send(&self, destination: &str) -> Result<(), ChannelError> {
            if let Some((after, control)) = &*self.abort_after.lock().unwrap()
                && self.count() >= *after
            {
                control.abort();
            }
            if self.failing.contains(destination) {
                Err(ChannelError::Rejected {
                    status: 404,
                    body: "number not on whatsapp".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MessagingChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_text(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), body.to_string()));
            self.finish_send(destination)
        }

        async fn send_media(
            &self,
            destination: &str,
            media: &MediaItem,
            _caption: Option<String>,
        ) -> Result<(), ChannelError> {
            self.media
                .lock()
                .unwrap()
                .push((destination.to_string(), media.file_name.clone()));
            self.finish_send(destination)
        }
    }

    #[derive(Default)]
    struct CollectingNotifier {
        events: Mutex<Vec<DispatchEvent>>,
    }

    impl Notifier for CollectingNotifier {
        fn notify(&self, event: &DispatchEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn plan(n: usize) -> RecipientPlan {
        (0..n)
            .map(|i| Recipient::new(format!("55119999{i:05}")).with("name", format!("Client {i}")))
            .collect()
    }

    fn orchestrator(
        n: usize,
        pacing: PacingConfig,
        channel: Arc<RecordingChannel>,
    ) -> DispatchOrchestrator {
        DispatchOrchestrator::new(plan(n), VariationPool::single("Hi {name}").unwrap(), pacing, channel)
            .unwrap()
            .with_rng(StdRng::seed_from_u64(7))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_successful_run() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(5, PacingConfig::new(1), channel.clone());
        let control = orchestrator.control();

        let summary = orchestrator.run().await;

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert!(!summary.aborted);
        assert_eq!(control.state(), RunState::Completed);

        let sent = channel.sent();
        assert_eq!(sent[0], ("5511999900000".to_string(), "Hi Client 0".to_string()));
        assert_eq!(sent[4].0, "5511999900004");
        // 4 gaps of 1s, none after the last send
        assert!((summary.duration_seconds - 4.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_skipped() {
        let channel = Arc::new(RecordingChannel::failing(&["5511999900001", "5511999900003"]));
        let summary = orchestrator(5, PacingConfig::new(1), channel.clone()).run().await;

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded + summary.failed, summary.total);
        let failed: Vec<usize> = summary.failures().map(|r| r.index).collect();
        assert_eq!(failed, vec![1, 3]);
        assert!(!summary.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_pause_every_five_of_twelve() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(12, PacingConfig::new(2).with_auto_pause(5), channel.clone());
        let control = orchestrator.control();
        let mut states = control.subscribe_state();

        let observed = channel.clone();
        let resumer = tokio::spawn(async move {
            let mut paused_at = Vec::new();
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                if state == RunState::Paused {
                    paused_at.push(observed.count());
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    control.resume();
                }
                if state.is_terminal() {
                    break;
                }
            }
            paused_at
        });

        let summary = orchestrator.run().await;
        let paused_at = resumer.await.unwrap();

        assert_eq!(paused_at, vec![5, 10]);
        assert_eq!(summary.auto_pause_count, 2);
        assert_eq!(summary.succeeded, 12);
        // 11 gaps of 2s plus two 30s pauses
        assert!(summary.duration_seconds >= 22.0);
        assert!((summary.duration_seconds - 82.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_auto_pause_after_last_item() {
        let channel = Arc::new(RecordingChannel::default());
        let summary = orchestrator(5, PacingConfig::new(1).with_auto_pause(5), channel)
            .run()
            .await;
        assert_eq!(summary.auto_pause_count, 0);
        assert_eq!(summary.succeeded, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_after_third_item() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(10, PacingConfig::new(2), channel.clone());
        let control = orchestrator.control();

        // Sends at t=0, 2, 4; abort lands in the wait after the third
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            control.abort();
        });

        let started = Instant::now();
        let summary = orchestrator.run().await;

        assert!(summary.aborted);
        assert_eq!(summary.total, 3);
        assert!(summary.total <= 4);
        assert_eq!(channel.count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_send_stops_before_next() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(10, PacingConfig::new(1), channel.clone());
        channel.abort_after(3, orchestrator.control());

        let summary = orchestrator.run().await;

        // The in-flight send completes and is recorded; nothing after it
        assert!(summary.aborted);
        assert_eq!(summary.total, 3);
        assert_eq!(channel.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_final_send_still_completes() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(3, PacingConfig::new(1), channel.clone());
        let control = orchestrator.control();
        channel.abort_after(3, control.clone());

        let summary = orchestrator.run().await;

        // Nothing was left to skip, so the run counts as completed
        assert!(control.is_aborted());
        assert!(!summary.aborted);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(control.state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_before_start_sends_nothing() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(3, PacingConfig::new(1), channel.clone());
        let control = orchestrator.control();
        control.abort();

        let summary = orchestrator.run().await;
        assert!(summary.aborted);
        assert_eq!(summary.total, 0);
        assert_eq!(channel.count(), 0);
        assert_eq!(control.state(), RunState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pause_extends_run() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(3, PacingConfig::new(2), channel);
        let control = orchestrator.control();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(control.pause());
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(control.resume());
        });

        let summary = orchestrator.run().await;
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.auto_pause_count, 0);
        assert!((summary.duration_seconds - 14.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controls_noop_after_completion() {
        let channel = Arc::new(RecordingChannel::default());
        let orchestrator = orchestrator(2, PacingConfig::new(1), channel);
        let control = orchestrator.control();
        orchestrator.run().await;

        assert!(!control.pause());
        assert!(!control.resume());
        control.abort();
        assert_eq!(control.state(), RunState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failure_limit_halts_run() {
        let failing: Vec<String> = (0..10).map(|i| format!("55119999{i:05}")).collect();
        let failing: Vec<&str> = failing.iter().map(String::as_str).collect();
        let channel = Arc::new(RecordingChannel::failing(&failing));

        let summary = orchestrator(10, PacingConfig::new(1), channel.clone())
            .with_max_consecutive_failures(Some(3))
            .unwrap()
            .run()
            .await;

        assert!(summary.aborted);
        assert!(summary.halted_by_failures);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.metadata.max_consecutive_failures, Some(3));
    }

    #[test]
    fn test_zero_failure_limit_rejected() {
        let result = orchestrator(1, PacingConfig::new(1), Arc::new(RecordingChannel::default()))
            .with_max_consecutive_failures(Some(0));
        assert!(matches!(result, Err(ConfigurationError::InvalidFailureLimit)));
    }

    #[test]
    fn test_invalid_pacing_rejected_before_run() {
        let result = DispatchOrchestrator::new(
            plan(1),
            VariationPool::single("hi").unwrap(),
            PacingConfig::new(0),
            Arc::new(RecordingChannel::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidDelay(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_variants_rendered_per_recipient() {
        let templates = ["Hi {name}", "Hello {name}!", "Hey {name}, {unknown}"];
        let pool = VariationPool::builder()
            .texts(templates)
            .use_variations(true)
            .build()
            .unwrap();
        let channel = Arc::new(RecordingChannel::default());
        let summary = DispatchOrchestrator::new(plan(60), pool, PacingConfig::new(1), channel.clone())
            .unwrap()
            .with_rng(StdRng::seed_from_u64(11))
            .run()
            .await;

        let sent = channel.sent();
        let mut used = HashSet::new();
        for (record, (_, body)) in summary.records.iter().zip(sent.iter()) {
            let expected = templates[record.variant_index]
                .replace("{name}", &format!("Client {}", record.index));
            assert_eq!(body, &expected);
            used.insert(record.variant_index);
        }
        assert_eq!(used.len(), 3);
        assert_eq!(summary.metadata.text_variants, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_mode_sends_media() {
        let pool = VariationPool::builder()
            .text("Promo for {name}")
            .media_items([
                MediaItem::new(vec![1], "image/jpeg", "a.jpg"),
                MediaItem::new(vec![2], "image/jpeg", "b.jpg"),
            ])
            .use_media(true)
            .build()
            .unwrap();
        let channel = Arc::new(RecordingChannel::default());
        let summary = DispatchOrchestrator::new(plan(4), pool, PacingConfig::new(1), channel.clone())
            .unwrap()
            .run()
            .await;

        assert!(channel.sent().is_empty());
        assert_eq!(channel.media.lock().unwrap().len(), 4);
        assert!(summary.records.iter().all(|r| r.media_index.is_some()));
        assert!(summary.metadata.use_media);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_receives_every_item() {
        let snapshots = Arc::new(Mutex::new(Vec::<ProgressSnapshot>::new()));
        let sink = snapshots.clone();
        let channel = Arc::new(RecordingChannel::failing(&["5511999900002"]));

        orchestrator(4, PacingConfig::new(1), channel)
            .with_observer(Arc::new(move |s| sink.lock().unwrap().push(s)))
            .run()
            .await;

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[3].succeeded, 3);
        assert_eq!(snapshots[3].failed, 1);
        assert!(snapshots.iter().all(|s| s.total == 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_sees_lifecycle() {
        let notifier = Arc::new(CollectingNotifier::default());
        let channel = Arc::new(RecordingChannel::failing(&["5511999900001"]));

        orchestrator(2, PacingConfig::new(1), channel)
            .with_notifier(notifier.clone())
            .run()
            .await;

        let events = notifier.events.lock().unwrap();
        assert!(matches!(events[0], DispatchEvent::RunStarted { total: 2, .. }));
        assert!(matches!(events[1], DispatchEvent::Sent { index: 0, .. }));
        assert!(matches!(events[2], DispatchEvent::Failed { index: 1, .. }));
        assert_eq!(
            events[3],
            DispatchEvent::RunFinished {
                state: RunState::Completed,
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_receives_summary_once() {
        let mut history = MockHistorySink::new();
        history
            .expect_record_run()
            .withf(|summary| summary.total == 3 && summary.metadata.label.as_deref() == Some("march"))
            .times(1)
            .returning(|_| Ok(()));

        let channel = Arc::new(RecordingChannel::default());
        let summary = orchestrator(3, PacingConfig::new(1), channel)
            .with_label("march")
            .with_metadata("tenant", serde_json::json!("acme"))
            .with_history(Arc::new(history))
            .run()
            .await;
        assert_eq!(summary.metadata.extra["tenant"], serde_json::json!("acme"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_failure_does_not_fail_run() {
        let mut history = MockHistorySink::new();
        history
            .expect_record_run()
            .times(1)
            .returning(|_| Err(WacrmError::InvalidInput("disk full".to_string())));

        let channel = Arc::new(RecordingChannel::default());
        let summary = orchestrator(1, PacingConfig::new(1), channel)
            .with_history(Arc::new(history))
            .run()
            .await;
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_in_background() {
        let channel = Arc::new(RecordingChannel::default());
        let handle = orchestrator(3, PacingConfig::new(1), channel).start();
        let summary = handle.await.unwrap();
        assert_eq!(summary.succeeded, 3);
    }
}
