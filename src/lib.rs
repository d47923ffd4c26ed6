//! wacrm - Paced WhatsApp Campaigns for Small-Business CRMs
//!
//! Sends one personalized message per recipient, strictly in order, with a
//! configurable delay, periodic auto-pause and live pause/resume/abort, then
//! reports an exact success/failure summary.
//!
//! ## Features
//!
//! - **Dispatch engine:** cooperative, interruptible, rate-limited send loop
//! - **Variations:** random text and media variants with `{placeholder}` rendering
//! - **Channels:** WhatsApp HTTP gateway, plus a dry-run channel for rehearsals
//! - **CRM sources:** contact list import and expiring-subscription reminders
//! - **History:** every finished run appended to a JSON Lines file
//!
//! ## Quick Start
//!
//! ```bash
//! # Rehearse a campaign without sending anything
//! wacrm send --contacts contacts.json -m "Hi {name}!" -m "Hello {name}!" --dry-run
//!
//! # Remind clients whose plan expires within 3 days
//! wacrm remind --clients clients.json --within-days 3 --delay 10
//! ```

pub mod channels;
pub mod cli;
pub mod config;
pub mod crm;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod logging;
pub mod utils;

// Re-export commonly used types
pub use error::{ErrorCode, WacrmError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
