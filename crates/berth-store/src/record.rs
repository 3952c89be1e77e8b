//! Slot record model
//!
//! One backing record per slot, named `<prefix><slot>`, with string-valued
//! fields. The record is the slot's persisted identity: created by
//! allocation, mutated by attribute/namespace updates, destroyed by GC or
//! explicit teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker stored in the `owner` field of records this tool created
pub const OWNER_MARKER: &str = "berth";

/// A slot's persisted identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Slot number (unique key within the environment class)
    pub slot: u32,

    /// Environment class name (e.g. "ai")
    pub env: String,

    /// Namespace bound to this slot
    pub namespace: String,

    /// Owner marker
    pub owner: String,

    /// Associated issue number (0 = none)
    pub issue: u64,

    /// Associated pull request number (0 = none)
    pub pr: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Backing record name (`<prefix><slot>`)
    pub name: String,
}

impl SlotRecord {
    /// Build a fresh record for an allocation attempt
    pub fn new(prefix: &str, slot: u32, env: &str, namespace: &str, issue: u64, pr: u64) -> Self {
        Self {
            slot,
            env: env.to_string(),
            namespace: namespace.to_string(),
            owner: OWNER_MARKER.to_string(),
            issue,
            pr,
            created_at: Utc::now(),
            name: format!("{prefix}{slot}"),
        }
    }

    /// Age of the record relative to `now`
    ///
    /// A record whose timestamp sits in the future ages as zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Encode as the backing store's string map
    pub fn to_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("slot".to_string(), self.slot.to_string());
        data.insert("env".to_string(), self.env.clone());
        data.insert("namespace".to_string(), self.namespace.clone());
        data.insert("owner".to_string(), self.owner.clone());
        data.insert("issue".to_string(), self.issue.to_string());
        data.insert("pr".to_string(), self.pr.to_string());
        data.insert("createdAt".to_string(), self.created_at.to_rfc3339());
        data
    }

    /// Decode from a backing record's name and string map
    ///
    /// Missing or malformed fields degrade instead of failing: numbers fall
    /// back to 0 and a bad `createdAt` is treated as "now", so a mangled
    /// record is never considered stale by accident.
    pub fn from_data(name: &str, data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).cloned().unwrap_or_default();

        let created_at = data
            .get("createdAt")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            slot: get("slot").parse().unwrap_or(0),
            env: get("env"),
            namespace: get("namespace"),
            owner: get("owner"),
            issue: get("issue").parse().unwrap_or(0),
            pr: get("pr").parse().unwrap_or(0),
            created_at,
            name: name.to_string(),
        }
    }
}
