//! Dispatch Engine
//!
//! Paced, controllable bulk sending: a recipient plan goes in, one message per
//! recipient goes out in order, and a [`RunSummary`] comes back.

pub mod control;
pub mod executor;
pub mod hooks;
pub mod orchestrator;
pub mod pacing;
pub mod plan;
pub mod progress;
pub mod variation;

pub use control::{ControlSurface, RunState};
pub use executor::{DispatchExecutor, MessagingChannel, ResolvedMessage, SendOutcome};
pub use hooks::{DispatchEvent, HistorySink, Notifier, TracingNotifier};
pub use orchestrator::DispatchOrchestrator;
pub use pacing::{GateOutcome, PacingConfig, PacingGate};
pub use plan::{Recipient, RecipientPlan};
pub use progress::{
    DispatchRecord, ProgressAggregator, ProgressObserver, ProgressSnapshot, RunMetadata, RunSummary,
};
pub use variation::{MAX_MEDIA_VARIANTS, MediaItem, VariationPool, VariationPoolBuilder, render};
