//! Do-not-contact ledger — unsubscribes, hard bounces, and complaints, with
//! expiry support and bulk import.
//!
//! The dispatcher consults this before handing contacts to the sender; the
//! sequence engine consults it when a link filters unsubscribed contacts.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason a contact was added to the suppression ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    #[default]
    Unsubscribed,
    HardBounce,
    Complained,
    AdminAction,
}

/// A single suppression record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub reason: SuppressionReason,
    pub created_at: DateTime<Utc>,
    /// If set, the entry automatically expires at this time. Soft-bounce
    /// suppressions typically carry one; unsubscribes never do.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Thread-safe suppression ledger backed by `DashMap`.
pub struct SuppressionList {
    entries: DashMap<Uuid, Vec<SuppressionEntry>>,
}

impl SuppressionList {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a suppression entry for `contact_id`.
    ///
    /// * `ttl_days` - optional time-to-live; the entry auto-expires after it.
    pub fn add(
        &self,
        contact_id: Uuid,
        reason: SuppressionReason,
        created_by: &str,
        ttl_days: Option<u32>,
    ) -> SuppressionEntry {
        let now = Utc::now();
        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            contact_id,
            reason,
            created_at: now,
            expires_at: ttl_days.map(|d| now + Duration::days(i64::from(d))),
            created_by: created_by.to_string(),
        };

        self.entries
            .entry(contact_id)
            .or_default()
            .push(entry.clone());

        tracing::info!(
            %contact_id,
            reason = ?entry.reason,
            "suppression entry added"
        );
        entry
    }

    /// Remove all suppression entries for `contact_id` (resubscribe).
    /// Returns the number of entries removed.
    pub fn remove(&self, contact_id: Uuid) -> usize {
        let removed = self
            .entries
            .remove(&contact_id)
            .map(|(_, list)| list.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::info!(%contact_id, removed, "suppression entries removed");
        }
        removed
    }

    /// Whether the contact currently must not be emailed. Expired entries
    /// are ignored.
    pub fn is_suppressed(&self, contact_id: Uuid) -> bool {
        let now = Utc::now();
        let list = match self.entries.get(&contact_id) {
            Some(l) => l,
            None => return false,
        };

        list.iter().any(|entry| match entry.expires_at {
            Some(exp) => exp > now,
            None => true,
        })
    }

    /// Whether the contact has an active unsubscribe on record.
    pub fn is_unsubscribed(&self, contact_id: Uuid) -> bool {
        let now = Utc::now();
        self.entries
            .get(&contact_id)
            .map(|list| {
                list.iter().any(|e| {
                    e.reason == SuppressionReason::Unsubscribed
                        && e.expires_at.map(|exp| exp > now).unwrap_or(true)
                })
            })
            .unwrap_or(false)
    }

    /// Return all entries (including expired) for a given contact.
    pub fn get_entries(&self, contact_id: Uuid) -> Vec<SuppressionEntry> {
        self.entries
            .get(&contact_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Bulk-add suppressions. Returns the number of entries added.
    pub fn bulk_add(&self, items: Vec<(Uuid, SuppressionReason)>) -> usize {
        let count = items.len();
        for (contact_id, reason) in items {
            self.add(contact_id, reason, "bulk_import", None);
        }
        tracing::info!(count, "bulk suppression import completed");
        count
    }

    /// Purge all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0usize;
        let mut keys_to_remove = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let before = entry.value().len();
            entry
                .value_mut()
                .retain(|e| e.expires_at.map(|exp| exp > now).unwrap_or(true));
            purged += before - entry.value().len();
            if entry.value().is_empty() {
                keys_to_remove.push(*entry.key());
            }
        }

        for key in keys_to_remove {
            self.entries.remove(&key);
        }

        if purged > 0 {
            tracing::info!(purged, "expired suppression entries purged");
        }
        purged
    }

    /// Total number of suppression entries across all contacts.
    pub fn count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}

impl Default for SuppressionList {
    fn default() -> Self {
        Self::new()
    }
}
