//! Record identity resolution
//!
//! A remote record and a local record are the same logical record when any
//! key in a prioritized chain matches: business id first, then the remote
//! store's own primary id as recorded from a prior sync, then the legacy
//! secondary key. The chain exists because the business identifier may not
//! have existed yet at local-creation time for legacy records; resolution
//! degrades gracefully instead of creating duplicates.

use crate::error::SyncResult;
use crate::record::RawRecord;
use crate::remote::RemoteRecord;
use crate::store::{self, EnvelopeKey, LocalStore};

/// The candidate keys of one record, in resolution priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateKeys {
    pub business_id: Option<String>,
    pub remote_id: Option<String>,
    pub legacy_id: Option<String>,
}

impl CandidateKeys {
    pub fn of_remote(record: &RemoteRecord) -> Self {
        Self {
            business_id: Some(record.business_id.clone()),
            remote_id: record.remote_id.clone(),
            legacy_id: record.legacy_id.clone(),
        }
    }

    pub fn of_local(record: &RawRecord) -> Self {
        Self {
            business_id: Some(record.meta.business_id.clone()),
            remote_id: record.meta.remote_id.clone(),
            legacy_id: record.meta.legacy_id.clone(),
        }
    }

    /// True when any candidate key is present on both sides and equal.
    pub fn matches(&self, other: &CandidateKeys) -> bool {
        fn eq(a: &Option<String>, b: &Option<String>) -> bool {
            matches!((a, b), (Some(a), Some(b)) if a == b)
        }

        eq(&self.business_id, &other.business_id)
            || eq(&self.remote_id, &other.remote_id)
            || eq(&self.legacy_id, &other.legacy_id)
    }
}

/// Find the local record matching a remote one, walking the candidate-key
/// chain in priority order. `None` means the remote record is new here.
pub async fn resolve(
    store: &LocalStore,
    entity: &str,
    remote: &RemoteRecord,
) -> SyncResult<Option<RawRecord>> {
    let mut conn = store.acquire().await?;

    if let Some(found) =
        store::get_by_business_id_raw(&mut conn, entity, &remote.business_id).await?
    {
        return Ok(Some(found));
    }

    if let Some(remote_id) = &remote.remote_id {
        if let Some(found) =
            store::get_by_envelope_key_raw(&mut conn, entity, EnvelopeKey::RemoteId, remote_id)
                .await?
        {
            return Ok(Some(found));
        }
    }

    if let Some(legacy_id) = &remote.legacy_id {
        if let Some(found) =
            store::get_by_envelope_key_raw(&mut conn, entity, EnvelopeKey::LegacyId, legacy_id)
                .await?
        {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Entity, Stored};
    use crate::store::test_support::create_test_store;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl Entity for Widget {
        const ENTITY: &'static str = "widgets";
        const ID_PREFIX: &'static str = "WDG";
    }

    fn remote(business_id: &str) -> RemoteRecord {
        RemoteRecord {
            remote_id: None,
            business_id: business_id.to_string(),
            legacy_id: None,
            status: crate::record::RecordStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            data: serde_json::json!({"name": "remote"}),
        }
    }

    #[tokio::test]
    async fn resolves_by_business_id_first() {
        let (store, _guard) = create_test_store().await;

        let mut local = Stored::new(Widget {
            name: "tent".to_string(),
        });
        store.put(&mut local).await.unwrap();

        let incoming = remote(&local.meta.business_id);
        let found = resolve(&store, "widgets", &incoming).await.unwrap();
        assert_eq!(
            found.unwrap().meta.business_id,
            local.meta.business_id
        );
    }

    #[tokio::test]
    async fn falls_back_to_remote_id() {
        let (store, _guard) = create_test_store().await;

        let mut local = Stored::new(Widget {
            name: "tent".to_string(),
        });
        local.meta.remote_id = Some("srv-42".to_string());
        store.put(&mut local).await.unwrap();

        // Remote record carries a different business id (assigned
        // server-side after a legacy import) but the known primary id.
        let mut incoming = remote("WDG-other");
        incoming.remote_id = Some("srv-42".to_string());

        let found = resolve(&store, "widgets", &incoming).await.unwrap();
        assert_eq!(
            found.unwrap().meta.business_id,
            local.meta.business_id
        );
    }

    #[tokio::test]
    async fn falls_back_to_legacy_id_last() {
        let (store, _guard) = create_test_store().await;

        let mut local = Stored::new(Widget {
            name: "tent".to_string(),
        });
        local.meta.legacy_id = Some("OLD-7".to_string());
        store.put(&mut local).await.unwrap();

        let mut incoming = remote("WDG-other");
        incoming.legacy_id = Some("OLD-7".to_string());

        let found = resolve(&store, "widgets", &incoming).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn unmatched_remote_is_new() {
        let (store, _guard) = create_test_store().await;

        let mut local = Stored::new(Widget {
            name: "tent".to_string(),
        });
        store.put(&mut local).await.unwrap();

        let incoming = remote("WDG-unknown");
        assert!(resolve(&store, "widgets", &incoming)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn candidate_keys_match_on_any_shared_key() {
        let a = CandidateKeys {
            business_id: Some("A".to_string()),
            remote_id: Some("1".to_string()),
            legacy_id: None,
        };
        let b = CandidateKeys {
            business_id: Some("B".to_string()),
            remote_id: Some("1".to_string()),
            legacy_id: Some("x".to_string()),
        };
        let c = CandidateKeys {
            business_id: Some("C".to_string()),
            remote_id: None,
            legacy_id: None,
        };

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        // Absent keys never match each other.
        assert!(!b.matches(&CandidateKeys::default()));
    }
}
