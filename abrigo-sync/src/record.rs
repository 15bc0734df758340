//! Record envelope shared by every entity collection
//!
//! Every persisted record is an envelope (`RecordMeta`) plus a typed payload.
//! The envelope carries the identity and sync bookkeeping fields; the payload
//! carries the business fields of one entity. The local store is the only
//! assigner of `local_id`; the sync engine is the only writer that flips
//! `synced` back to `true`.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Soft-delete marker on the record envelope.
///
/// Domain lifecycles (a closed shelter, an exited occupant) live in the
/// payload; `Deleted` here only means the record is hidden from active
/// queries while remaining available for audit and consistency accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> SyncResult<Self> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "deleted" => Ok(RecordStatus::Deleted),
            _ => Err(SyncError::InvalidRecord(format!(
                "Unknown record status: {}",
                s
            ))),
        }
    }
}

/// Envelope fields common to every stored record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Store-local identifier, assigned on first insert. Never pushed to the
    /// remote store.
    pub local_id: Option<i64>,

    /// Globally unique business identifier, assigned at creation time and
    /// stable across devices and the remote store.
    pub business_id: String,

    /// The remote store's own primary key, learned from a prior push or pull.
    pub remote_id: Option<String>,

    /// Secondary business key carried by records that predate the
    /// business-identifier scheme.
    pub legacy_id: Option<String>,

    /// `false` while the record has local changes not yet confirmed remote.
    pub synced: bool,

    pub status: RecordStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    /// Fresh envelope for a record created on this device.
    pub fn new(business_id: String) -> Self {
        let now = Utc::now();
        Self {
            local_id: None,
            business_id,
            remote_id: None,
            legacy_id: None,
            synced: false,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A typed entity payload that can live in the local store.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, also the entity discriminator on the wire.
    const ENTITY: &'static str;
    /// Prefix for generated business identifiers, e.g. `ABR` for shelters.
    const ID_PREFIX: &'static str;
}

/// Envelope plus typed payload.
#[derive(Debug, Clone)]
pub struct Stored<T: Entity> {
    pub meta: RecordMeta,
    pub data: T,
}

impl<T: Entity> Stored<T> {
    /// New unsynced record with a freshly generated business identifier.
    pub fn new(data: T) -> Self {
        Self {
            meta: RecordMeta::new(generate_business_id(T::ID_PREFIX)),
            data,
        }
    }

    /// Same as [`Stored::new`] but with an explicit id prefix, for
    /// sub-kinds that carry their own prefix (e.g. transfers).
    pub fn new_with_prefix(data: T, prefix: &str) -> Self {
        Self {
            meta: RecordMeta::new(generate_business_id(prefix)),
            data,
        }
    }

    pub fn local_id(&self) -> Option<i64> {
        self.meta.local_id
    }

    pub fn is_active(&self) -> bool {
        self.meta.status == RecordStatus::Active
    }
}

/// Untyped record as read from the store, payload still JSON.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub meta: RecordMeta,
    pub data: serde_json::Value,
}

impl RawRecord {
    pub fn into_stored<T: Entity>(self) -> SyncResult<Stored<T>> {
        Ok(Stored {
            meta: self.meta,
            data: serde_json::from_value(self.data)?,
        })
    }
}

/// Generate a business identifier: prefix, base-36 millisecond timestamp,
/// 4 random alphanumeric characters.
pub fn generate_business_id(prefix: &str) -> String {
    let ts = to_base36(Utc::now().timestamp_millis().unsigned_abs());
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{}-{}", prefix, ts, suffix)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Probe {
        name: String,
    }

    impl Entity for Probe {
        const ENTITY: &'static str = "probes";
        const ID_PREFIX: &'static str = "PRB";
    }

    #[test]
    fn business_ids_carry_prefix_and_are_unique() {
        let a = generate_business_id("ABR");
        let b = generate_business_id("ABR");
        assert!(a.starts_with("ABR-"));
        assert!(b.starts_with("ABR-"));
        assert_ne!(a, b);
    }

    #[test]
    fn new_record_starts_active_and_unsynced() {
        let record = Stored::new(Probe {
            name: "x".to_string(),
        });
        assert!(record.meta.local_id.is_none());
        assert!(!record.meta.synced);
        assert_eq!(record.meta.status, RecordStatus::Active);
        assert!(record.meta.business_id.starts_with("PRB-"));
        assert!(record.meta.deleted_at.is_none());
    }

    #[test]
    fn prefix_override_for_sub_kinds() {
        let record = Stored::new_with_prefix(
            Probe {
                name: "x".to_string(),
            },
            "TRF",
        );
        assert!(record.meta.business_id.starts_with("TRF-"));
    }

    #[test]
    fn base36_round_numbers() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn status_round_trip() {
        assert_eq!(
            RecordStatus::from_str(RecordStatus::Deleted.as_str()).unwrap(),
            RecordStatus::Deleted
        );
        assert!(RecordStatus::from_str("gone").is_err());
    }
}
