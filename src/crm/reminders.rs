//! Subscription Reminders
//!
//! Selects clients whose plan expires soon and binds the reminder
//! placeholders: `{name}`, `{plan}`, `{expiry}` (dd/mm/yyyy), `{days_left}`
//! and `{phone}`.

use crate::dispatch::{Recipient, RecipientPlan};
use crate::error::Result;
use crate::utils::normalize_phone;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

pub const DEFAULT_REMINDER_TEMPLATE: &str =
    "Hi {name}, your {plan} plan expires on {expiry} ({days_left} days left). Reply here to renew!";

const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    pub phone: String,
    pub plan: String,
    /// `YYYY-MM-DD` or `DD/MM/YYYY`
    #[serde(deserialize_with = "deserialize_date")]
    pub expires_on: NaiveDate,
}

fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}'")))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, DISPLAY_DATE_FORMAT))
        .ok()
}

/// Which clients are due for a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    /// Expiring between today and today + `within_days`, inclusive
    pub within_days: i64,
    /// Also remind clients whose plan already expired
    pub include_overdue: bool,
}

impl Default for ReminderWindow {
    fn default() -> Self {
        Self {
            within_days: 7,
            include_overdue: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueClient<'a> {
    pub client: &'a Client,
    /// Negative when overdue
    pub days_left: i64,
}

impl DueClient<'_> {
    pub fn to_recipient(&self) -> Option<Recipient> {
        let phone = normalize_phone(&self.client.phone)?;
        Some(
            Recipient::new(phone.clone())
                .with("name", self.client.name.trim())
                .with("plan", self.client.plan.trim())
                .with("expiry", self.client.expires_on.format(DISPLAY_DATE_FORMAT).to_string())
                .with("days_left", self.days_left.to_string())
                .with("phone", phone),
        )
    }
}

/// Due clients ordered by expiry date (soonest first), then name.
pub fn select_due(clients: &[Client], today: NaiveDate, window: ReminderWindow) -> Vec<DueClient<'_>> {
    let mut due: Vec<DueClient<'_>> = clients
        .iter()
        .map(|client| DueClient {
            client,
            days_left: (client.expires_on - today).num_days(),
        })
        .filter(|d| {
            (d.days_left >= 0 && d.days_left <= window.within_days)
                || (window.include_overdue && d.days_left < 0)
        })
        .collect();
    due.sort_by(|a, b| {
        a.client
            .expires_on
            .cmp(&b.client.expires_on)
            .then_with(|| a.client.name.cmp(&b.client.name))
    });
    due
}

pub fn reminder_plan(clients: &[Client], today: NaiveDate, window: ReminderWindow) -> RecipientPlan {
    select_due(clients, today, window)
        .iter()
        .filter_map(|due| {
            let recipient = due.to_recipient();
            if recipient.is_none() {
                tracing::warn!("Client '{}' has no usable phone number, skipping", due.client.name);
            }
            recipient
        })
        .collect()
}

pub async fn load_clients(path: impl AsRef<Path>) -> Result<Vec<Client>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(serde_json::from_str(&content)?)
}
