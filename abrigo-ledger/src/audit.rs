//! Append-only audit trail
//!
//! Every ledger-mutating operation appends exactly one entry, inside the
//! same unit of work as the writes it describes. Entries are never updated
//! or deleted and survive bulk clears; the trail is device-local and is not
//! pushed to the remote store.

use crate::error::LedgerResult;
use crate::ledger::ShelterLedger;
use crate::models::{AuditAction, AuditLogEntry};
use abrigo_sync::{Stored, StoreTx};
use chrono::Utc;

/// Append one audit entry within the caller's transaction.
pub(crate) async fn append_audit(
    tx: &mut StoreTx,
    action: AuditAction,
    entity_type: &str,
    entity_id: &str,
    details: String,
) -> LedgerResult<Stored<AuditLogEntry>> {
    let mut entry = Stored::new(AuditLogEntry {
        action,
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        details,
        timestamp: Utc::now(),
    });
    tx.put(&mut entry).await?;

    tracing::debug!(
        action = action.as_str(),
        entity_type,
        entity_id,
        "Audit entry appended"
    );

    Ok(entry)
}

impl ShelterLedger {
    /// The audit trail, newest first, optionally filtered by entity type.
    pub async fn get_audit_log(
        &self,
        entity_type: Option<&str>,
        limit: usize,
    ) -> LedgerResult<Vec<Stored<AuditLogEntry>>> {
        let mut entries = self.store.get_all::<AuditLogEntry>(false).await?;

        if let Some(wanted) = entity_type {
            entries.retain(|e| e.data.entity_type == wanted);
        }

        entries.sort_by(|a, b| b.data.timestamp.cmp(&a.data.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewDonation, CENTRAL_LOCATION};
    use crate::test_support::create_test_ledger;
    use rust_decimal::Decimal;

    fn donation(description: &str, quantity: i64) -> NewDonation {
        NewDonation {
            shelter_id: None,
            item_description: description.to_string(),
            quantity: Decimal::from(quantity),
            unit: "un".to_string(),
            donor_name: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn audit_log_is_newest_first_and_filterable() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        ledger.add_donation(donation("Arroz", 10)).await.unwrap();
        ledger.add_donation(donation("Feijão", 8)).await.unwrap();
        ledger.clear_inventory(Some(CENTRAL_LOCATION)).await.unwrap();

        let all = ledger.get_audit_log(None, 50).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].data.action, AuditAction::ClearInventory);

        let donations_only = ledger.get_audit_log(Some("donation"), 50).await.unwrap();
        assert_eq!(donations_only.len(), 2);

        let limited = ledger.get_audit_log(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn audit_details_describe_the_movement() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        let received = ledger.add_donation(donation("Arroz", 10)).await.unwrap();

        let entries = ledger.get_audit_log(Some("donation"), 10).await.unwrap();
        assert_eq!(entries[0].data.entity_id, received.meta.business_id);
        assert!(entries[0].data.details.contains("Arroz"));
        assert!(entries[0].data.details.contains("CENTRAL"));
    }
}
