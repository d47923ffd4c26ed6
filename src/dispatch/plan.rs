//! Recipient Plan
//!
//! The ordered list of send targets for one run. Display order is send order
//! and duplicates are kept.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One destination plus the placeholder values used to render its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub destination: String,
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}

impl Recipient {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            substitutions: BTreeMap::new(),
        }
    }

    /// Bind a placeholder. Keys may be given with or without braces.
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref().trim().trim_start_matches('{').trim_end_matches('}');
        if !key.is_empty() {
            self.substitutions.insert(key.to_string(), value.into());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientPlan {
    items: Vec<Recipient>,
}

impl RecipientPlan {
    pub fn new(items: Vec<Recipient>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Recipient> {
        self.items.iter()
    }

    pub fn items(&self) -> &[Recipient] {
        &self.items
    }
}

impl FromIterator<Recipient> for RecipientPlan {
    fn from_iter<I: IntoIterator<Item = Recipient>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RecipientPlan {
    type Item = &'a Recipient;
    type IntoIter = std::slice::Iter<'a, Recipient>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
