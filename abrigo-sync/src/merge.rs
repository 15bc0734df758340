//! Merge policy and list presentation
//!
//! Two concerns live here. The merge policy decides, per record, whether an
//! incoming remote copy replaces the local one during pull. The list
//! presenter combines a remote query result with a local lightweight result
//! into one deduplicated, consistently ordered collection for display.

use crate::identity::CandidateKeys;
use crate::record::{RawRecord, RecordMeta};
use crate::remote::RemoteRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the per-record conflict rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// The local copy stands; the remote copy is ignored this cycle.
    KeepLocal,
    /// The remote copy is written over the local one (or inserted as new).
    TakeRemote,
}

/// Local-wins-while-pending: an unconfirmed local edit is never overwritten
/// by an incoming remote copy. It is reconciled on a later cycle, once the
/// local change has been pushed. Not last-write-wins by timestamp.
pub fn merge_policy(local: Option<&RecordMeta>, _remote: &RemoteRecord) -> MergeDecision {
    match local {
        Some(meta) if !meta.synced => MergeDecision::KeepLocal,
        _ => MergeDecision::TakeRemote,
    }
}

/// One row of a merged display list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub business_id: Option<String>,
    pub remote_id: Option<String>,
    pub legacy_id: Option<String>,
    /// Entity-specific ordering key, e.g. a formatted sequence "NN/YYYY".
    pub sequence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    /// True when this row came from the local store rather than the remote
    /// query. An unsynced local row is surfaced as "pending" by the UI.
    pub is_local: bool,
    pub data: serde_json::Value,
}

impl ListEntry {
    pub fn from_remote(record: &RemoteRecord) -> Self {
        Self {
            business_id: Some(record.business_id.clone()),
            remote_id: record.remote_id.clone(),
            legacy_id: record.legacy_id.clone(),
            sequence: None,
            created_at: record.created_at,
            synced: true,
            is_local: false,
            data: record.data.clone(),
        }
    }

    pub fn from_local(record: &RawRecord) -> Self {
        Self {
            business_id: Some(record.meta.business_id.clone()),
            remote_id: record.meta.remote_id.clone(),
            legacy_id: record.meta.legacy_id.clone(),
            sequence: None,
            created_at: record.meta.created_at,
            synced: record.meta.synced,
            is_local: true,
            data: record.data.clone(),
        }
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    fn keys(&self) -> CandidateKeys {
        CandidateKeys {
            business_id: self.business_id.clone(),
            remote_id: self.remote_id.clone(),
            legacy_id: self.legacy_id.clone(),
        }
    }

    /// Pending badge: a local row whose changes are not yet confirmed remote.
    pub fn is_pending(&self) -> bool {
        self.is_local && !self.synced
    }
}

/// Combine a remote list and a local list into one deduplicated, ordered
/// collection.
///
/// The remote list is authoritative. A local entry already represented
/// remotely (by any candidate key) is dropped in favor of the remote copy;
/// an unrepresented one is appended, tagged local. A record pushed but not
/// yet returned by the remote query therefore neither duplicates nor
/// vanishes: it stays visible from the local side exactly until the remote
/// copy appears.
pub fn merge_lists(remote: Vec<ListEntry>, local: Vec<ListEntry>) -> Vec<ListEntry> {
    let mut merged = remote;

    for entry in local {
        let keys = entry.keys();
        let already_represented = merged.iter().any(|m| m.keys().matches(&keys));
        if !already_represented {
            merged.push(ListEntry {
                is_local: true,
                ..entry
            });
        }
    }

    merged.sort_by(|a, b| {
        let ka = a.sequence.as_deref().and_then(sequence_key);
        let kb = b.sequence.as_deref().and_then(sequence_key);
        match (ka, kb) {
            (Some((year_a, num_a)), Some((year_b, num_b))) => {
                year_b.cmp(&year_a).then(num_b.cmp(&num_a))
            }
            // Ordering key absent or malformed on either side: newest first.
            _ => b.created_at.cmp(&a.created_at),
        }
    });

    merged
}

/// Parse a formatted sequence "NN/YYYY" into (year, number).
fn sequence_key(sequence: &str) -> Option<(i32, i32)> {
    let (num, year) = sequence.split_once('/')?;
    Some((year.trim().parse().ok()?, num.trim().parse().ok()?))
}
