//! Contacts Import
//!
//! Turns a JSON contact list (`[{"phone": "...", "name": "...", ...}]`) into a
//! [`RecipientPlan`]. Scalar extra fields become placeholder substitutions.

use crate::dispatch::{Recipient, RecipientPlan};
use crate::error::Result;
use crate::utils::{mask_phone, normalize_phone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other fields (`plan`, `city`, …)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub fn parse_contacts(json: &str) -> Result<Vec<Contact>> {
    Ok(serde_json::from_str(json)?)
}

pub async fn load_contacts(path: impl AsRef<Path>) -> Result<Vec<Contact>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_contacts(&content)
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build a plan in file order. Contacts without a usable number and repeated
/// numbers are skipped with a warning.
pub fn contacts_to_plan(contacts: &[Contact]) -> RecipientPlan {
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(contacts.len());

    for (i, contact) in contacts.iter().enumerate() {
        let Some(phone) = normalize_phone(&contact.phone) else {
            tracing::warn!("Contact #{} has no usable phone number, skipping", i + 1);
            continue;
        };
        if !seen.insert(phone.clone()) {
            tracing::warn!("Duplicate contact {} skipped", mask_phone(&phone));
            continue;
        }

        let mut recipient = Recipient::new(phone.clone());
        for (key, value) in &contact.extra {
            if let Some(value) = scalar_to_string(value) {
                recipient.insert(key, value);
            }
        }
        if let Some(name) = &contact.name {
            recipient.insert("name", name.trim());
        }
        recipient.insert("phone", phone);
        items.push(recipient);
    }

    RecipientPlan::new(items)
}
