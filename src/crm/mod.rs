//! CRM Recipient Sources
//!
//! Where recipient plans come from: imported contact lists and clients with
//! expiring subscriptions.

pub mod contacts;
pub mod reminders;

pub use contacts::{Contact, contacts_to_plan, load_contacts, parse_contacts};
pub use reminders::{
    Client, DEFAULT_REMINDER_TEMPLATE, DueClient, ReminderWindow, load_clients, reminder_plan,
    select_due,
};
