//! Pacing Gate
//!
//! Enforces the delay between consecutive sends and the periodic auto-pause.
//! Waits are woken by pause/resume/abort signals, so an abort lands mid-wait
//! and time spent paused never counts toward the delay.

use super::control::{ControlSurface, RunState};
use super::hooks::{DispatchEvent, Notifier};
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Send pacing, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Seconds to wait between two sends (minimum 1)
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,

    /// Pause automatically every `auto_pause_every` sends
    #[serde(default)]
    pub auto_pause_enabled: bool,

    /// 0 disables auto-pause
    #[serde(default)]
    pub auto_pause_every: u32,
}

fn default_delay_seconds() -> u64 {
    8
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            auto_pause_enabled: false,
            auto_pause_every: 0,
        }
    }
}

impl PacingConfig {
    pub fn new(delay_seconds: u64) -> Self {
        Self {
            delay_seconds,
            ..Self::default()
        }
    }

    pub fn with_auto_pause(mut self, every: u32) -> Self {
        self.auto_pause_enabled = every > 0;
        self.auto_pause_every = every;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.delay_seconds < 1 {
            return Err(ConfigurationError::InvalidDelay(self.delay_seconds));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    /// Effective auto-pause interval, `None` when disabled.
    pub fn auto_pause_interval(&self) -> Option<u32> {
        (self.auto_pause_enabled && self.auto_pause_every > 0).then_some(self.auto_pause_every)
    }
}

/// Result of a gate wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Proceed,
    Aborted,
}

pub struct PacingGate {
    control: ControlSurface,
    auto_pause_every: Option<u32>,
    auto_pauses: u32,
    notifier: Option<Arc<dyn Notifier>>,
}

impl PacingGate {
    pub fn new(control: ControlSurface, pacing: &PacingConfig) -> Self {
        Self {
            control,
            auto_pause_every: pacing.auto_pause_interval(),
            auto_pauses: 0,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Number of automatic pauses triggered so far.
    pub fn auto_pause_count(&self) -> u32 {
        self.auto_pauses
    }

    /// Wait `duration` of un-paused time, or until abort.
    pub async fn wait_tick(&self, duration: Duration) -> GateOutcome {
        let mut state = self.control.subscribe_state();
        let mut remaining = duration;

        loop {
            if self.control.is_aborted() {
                return GateOutcome::Aborted;
            }

            if *state.borrow_and_update() == RunState::Paused {
                tokio::select! {
                    biased;
                    _ = self.control.aborted() => return GateOutcome::Aborted,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return GateOutcome::Aborted;
                        }
                        continue;
                    }
                }
            }

            if remaining.is_zero() {
                return GateOutcome::Proceed;
            }

            let started = Instant::now();
            tokio::select! {
                biased;
                _ = self.control.aborted() => return GateOutcome::Aborted,
                _ = state.changed() => {
                    remaining = remaining.saturating_sub(started.elapsed());
                }
                _ = tokio::time::sleep(remaining) => return GateOutcome::Proceed,
            }
        }
    }

    /// Pause the run when `sent` hits a multiple of the auto-pause interval,
    /// then wait for resume or abort.
    pub async fn maybe_auto_pause(&mut self, sent: usize) -> GateOutcome {
        let Some(every) = self.auto_pause_every else {
            return GateOutcome::Proceed;
        };
        if sent == 0 || sent % every as usize != 0 {
            return GateOutcome::Proceed;
        }

        if self.control.begin_pause() {
            self.auto_pauses += 1;
            tracing::info!(
                "Auto-pause #{} after {} sends, waiting for resume",
                self.auto_pauses,
                sent
            );
            if let Some(notifier) = &self.notifier {
                notifier.notify(&DispatchEvent::AutoPaused {
                    sent,
                    count: self.auto_pauses,
                });
            }
        }

        let outcome = self.wait_until_resumed().await;
        if outcome == GateOutcome::Proceed {
            tracing::debug!("Resumed after auto-pause");
        }
        outcome
    }

    /// Block while paused. Returns immediately when not paused.
    pub async fn wait_until_resumed(&self) -> GateOutcome {
        let mut state = self.control.subscribe_state();
        loop {
            if self.control.is_aborted() {
                return GateOutcome::Aborted;
            }
            if *state.borrow_and_update() != RunState::Paused {
                return GateOutcome::Proceed;
            }
            tokio::select! {
                biased;
                _ = self.control.aborted() => return GateOutcome::Aborted,
                changed = state.changed() => {
                    if changed.is_err() {
                        return GateOutcome::Aborted;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn running_control() -> ControlSurface {
        let control = ControlSurface::new();
        control.mark_running();
        control
    }

    #[test]
    fn test_pacing_validation() {
        assert!(PacingConfig::new(1).validate().is_ok());
        assert_eq!(
            PacingConfig::new(0).validate(),
            Err(ConfigurationError::InvalidDelay(0))
        );
    }

    #[test]
    fn test_auto_pause_interval() {
        assert_eq!(PacingConfig::new(2).auto_pause_interval(), None);
        assert_eq!(PacingConfig::new(2).with_auto_pause(5).auto_pause_interval(), Some(5));
        assert_eq!(PacingConfig::new(2).with_auto_pause(0).auto_pause_interval(), None);

        let disabled = PacingConfig {
            delay_seconds: 2,
            auto_pause_enabled: false,
            auto_pause_every: 5,
        };
        assert_eq!(disabled.auto_pause_interval(), None);
    }

    #[test]
    fn test_pacing_from_toml_defaults() {
        let pacing: PacingConfig = toml::from_str("auto_pause_every = 10").unwrap();
        assert_eq!(pacing.delay_seconds, 8);
        assert!(!pacing.auto_pause_enabled);
        assert_eq!(pacing.auto_pause_interval(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_tick_completes_after_duration() {
        let gate = PacingGate::new(running_control(), &PacingConfig::new(2));
        let start = Instant::now();
        assert_eq!(gate.wait_tick(Duration::from_secs(2)).await, GateOutcome::Proceed);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_extends_wait() {
        let control = running_control();
        let gate = PacingGate::new(control.clone(), &PacingConfig::new(5));

        let ui = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ui.pause();
            tokio::time::sleep(Duration::from_secs(7)).await;
            ui.resume();
        });

        let start = Instant::now();
        assert_eq!(gate.wait_tick(Duration::from_secs(5)).await, GateOutcome::Proceed);
        // 5s of delay plus 7s paused
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_wait() {
        let control = running_control();
        let gate = PacingGate::new(control.clone(), &PacingConfig::new(60));

        let ui = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            ui.abort();
        });

        let start = Instant::now();
        assert_eq!(gate.wait_tick(Duration::from_secs(60)).await, GateOutcome::Aborted);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_while_paused() {
        let control = running_control();
        let gate = PacingGate::new(control.clone(), &PacingConfig::new(1));
        control.pause();

        let ui = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ui.abort();
        });

        assert_eq!(gate.wait_tick(Duration::from_secs(1)).await, GateOutcome::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_pause_only_on_multiples() {
        let control = running_control();
        let mut gate = PacingGate::new(control.clone(), &PacingConfig::new(1).with_auto_pause(3));

        for sent in [0, 1, 2, 4, 5] {
            assert_eq!(gate.maybe_auto_pause(sent).await, GateOutcome::Proceed);
        }
        assert_eq!(gate.auto_pause_count(), 0);
        assert!(!control.is_paused());

        let ui = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ui.resume();
        });
        assert_eq!(gate.maybe_auto_pause(3).await, GateOutcome::Proceed);
        assert_eq!(gate.auto_pause_count(), 1);
        assert!(!control.is_paused());
    }

    #[derive(Default)]
    struct EventLog(std::sync::Mutex<Vec<DispatchEvent>>);

    impl Notifier for EventLog {
        fn notify(&self, event: &DispatchEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pause_at_boundary_is_not_an_auto_pause() {
        let control = running_control();
        let events = Arc::new(EventLog::default());
        let mut gate = PacingGate::new(control.clone(), &PacingConfig::new(1).with_auto_pause(2))
            .with_notifier(Some(events.clone()));
        assert!(control.pause());

        let ui = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            ui.resume();
        });

        let start = Instant::now();
        assert_eq!(gate.maybe_auto_pause(2).await, GateOutcome::Proceed);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(gate.auto_pause_count(), 0);
        assert!(events.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_until_resumed_pending_while_paused() {
        let control = running_control();
        let gate = PacingGate::new(control.clone(), &PacingConfig::new(1));
        control.pause();

        let mut waiting = task::spawn(gate.wait_until_resumed());
        assert_pending!(waiting.poll());

        control.resume();
        assert!(waiting.is_woken());
        assert_ready_eq!(waiting.poll(), GateOutcome::Proceed);
    }

    #[tokio::test]
    async fn test_auto_pause_aborted() {
        let control = running_control();
        let mut gate = PacingGate::new(control.clone(), &PacingConfig::new(1).with_auto_pause(2));
        control.abort();
        assert_eq!(gate.maybe_auto_pause(2).await, GateOutcome::Aborted);
    }
}
