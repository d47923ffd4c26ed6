//! Messaging Channels
//!
//! Implementations of [`MessagingChannel`](crate::dispatch::MessagingChannel):
//! the WhatsApp HTTP gateway and a dry-run channel for rehearsing campaigns.

pub mod dry_run;
pub mod whatsapp;

pub use dry_run::DryRunChannel;
pub use whatsapp::WhatsAppChannel;
