//! Control Surface
//!
//! The pause/abort signals shared between a running dispatch loop and whoever
//! drives it (TUI, CLI stdin reader, Ctrl-C handler). Abort is a
//! [`CancellationToken`] so it can never be un-set within a run; pause lives in
//! the run state, a `watch` channel, so waiters wake on change instead of polling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

struct ControlInner {
    state: watch::Sender<RunState>,
    abort: CancellationToken,
}

/// Cloneable handle to a run's control signals.
///
/// The run state is the only pause signal: "paused" means `state == Paused`,
/// and every transition is a single `send_if_modified` on one channel.
#[derive(Clone)]
pub struct ControlSurface {
    inner: Arc<ControlInner>,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSurface")
            .field("state", &self.state())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl ControlSurface {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            inner: Arc::new(ControlInner {
                state,
                abort: CancellationToken::new(),
            }),
        }
    }

    /// `None` when rejected, `Some(true)` when this call moved Running to Paused.
    fn request_pause(&self) -> Option<bool> {
        let mut outcome = None;
        self.inner.state.send_if_modified(|state| match state {
            RunState::Running => {
                *state = RunState::Paused;
                outcome = Some(true);
                true
            }
            RunState::Paused => {
                outcome = Some(false);
                false
            }
            _ => false,
        });
        outcome
    }

    /// Request a pause. Returns `false` when the run is not running or paused.
    pub fn pause(&self) -> bool {
        self.request_pause().is_some()
    }

    /// Pause only if running. Returns `true` when this call started the pause.
    pub(crate) fn begin_pause(&self) -> bool {
        self.request_pause() == Some(true)
    }

    /// Lift a pause. Returns `false` when there was nothing to resume.
    pub fn resume(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Stop the run at its next checkpoint. Idempotent.
    pub fn abort(&self) {
        if !self.inner.abort.is_cancelled() {
            tracing::info!("Dispatch abort requested");
        }
        self.inner.abort.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// Watch run state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    /// Token cancelled on abort, for wiring into other cancellable work.
    pub fn abort_token(&self) -> CancellationToken {
        self.inner.abort.clone()
    }

    pub(crate) async fn aborted(&self) {
        self.inner.abort.cancelled().await
    }

    pub(crate) fn mark_running(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == RunState::Idle {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn finish(&self, aborted: bool) {
        self.inner.state.send_replace(if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_rejected_before_start() {
        let control = ControlSurface::new();
        assert!(!control.pause());
        assert!(!control.is_paused());
        assert_eq!(control.state(), RunState::Idle);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let control = ControlSurface::new();
        control.mark_running();

        assert!(control.pause());
        assert!(control.is_paused());
        assert_eq!(control.state(), RunState::Paused);

        // Pausing twice is accepted and stays paused
        assert!(control.pause());
        assert_eq!(control.state(), RunState::Paused);

        assert!(control.resume());
        assert!(!control.is_paused());
        assert_eq!(control.state(), RunState::Running);
        assert!(!control.resume());
    }

    #[test]
    fn test_controls_are_noops_after_finish() {
        let control = ControlSurface::new();
        control.mark_running();
        control.finish(false);

        assert!(!control.pause());
        assert!(!control.resume());
        assert_eq!(control.state(), RunState::Completed);
    }

    #[test]
    fn test_abort_is_monotonic_and_idempotent() {
        let control = ControlSurface::new();
        let token = control.abort_token();
        control.abort();
        control.abort();
        assert!(control.is_aborted());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_signals() {
        let control = ControlSurface::new();
        let ui_side = control.clone();
        control.mark_running();

        assert!(ui_side.pause());
        assert!(control.is_paused());
        ui_side.abort();
        assert!(control.is_aborted());
    }

    #[test]
    fn test_begin_pause_only_reports_own_transition() {
        let control = ControlSurface::new();
        assert!(!control.begin_pause());
        control.mark_running();
        assert!(control.begin_pause());
        assert!(!control.begin_pause());
        assert!(control.is_paused());
    }

    #[test]
    fn test_concurrent_pause_resume_stay_consistent() {
        use std::sync::Barrier;

        for _ in 0..2_000 {
            let control = ControlSurface::new();
            control.mark_running();
            let barrier = Arc::new(Barrier::new(2));

            let pauser = {
                let control = control.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    control.pause();
                })
            };
            let resumer = {
                let control = control.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    control.resume();
                })
            };
            pauser.join().unwrap();
            resumer.join().unwrap();

            let state = control.state();
            assert!(matches!(state, RunState::Running | RunState::Paused));
            assert_eq!(control.is_paused(), state == RunState::Paused);
            // A stuck pause must always be liftable
            if control.is_paused() {
                assert!(control.resume());
            }
            assert_eq!(control.state(), RunState::Running);
        }
    }

    #[tokio::test]
    async fn test_state_subscription_sees_transitions() {
        let control = ControlSurface::new();
        let mut rx = control.subscribe_state();
        control.mark_running();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), RunState::Running);

        control.finish(true);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), RunState::Aborted);
        assert!(RunState::Aborted.is_terminal());
    }
}
