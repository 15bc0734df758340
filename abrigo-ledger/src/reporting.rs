//! Derived read-side views: consistency reporting and movement history
//!
//! Pure projections over the local collections; nothing here mutates. A
//! divergent report is a reportable condition for operator review, never
//! auto-corrected.

use crate::error::LedgerResult;
use crate::ledger::ShelterLedger;
use crate::models::CENTRAL_LOCATION;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Arithmetic cross-check of one location's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub total_donated: Decimal,
    pub total_distributed: Decimal,
    /// `total_donated - total_distributed`
    pub expected_stock: Decimal,
    pub current_stock: Decimal,
    pub divergence: Decimal,
    pub is_consistent: bool,
    pub donation_count: usize,
    pub distribution_count: usize,
    pub inventory_item_count: usize,
    /// Donations with a blank description or non-positive quantity: data
    /// that entered through a path bypassing creation-time validation.
    pub incomplete_donations: usize,
}

/// Direction of one stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "entrada")]
    Entrada,
    #[serde(rename = "saida")]
    Saida,
}

/// One row of an item's chronological ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementEntry {
    #[serde(rename = "type")]
    pub kind: MovementKind,
    pub date: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub description: String,
}

impl ShelterLedger {
    /// Cross-check donations, distributions and on-hand stock at one
    /// location. Defaults to the central warehouse.
    pub async fn get_data_consistency_report(
        &self,
        location: Option<&str>,
    ) -> LedgerResult<ConsistencyReport> {
        let location = location.unwrap_or(CENTRAL_LOCATION);

        let donations = self.get_donations(Some(location)).await?;
        let distributions = self.get_distributions(Some(location)).await?;
        let inventory = self.get_inventory(Some(location)).await?;

        let total_donated: Decimal = donations.iter().map(|d| d.data.quantity).sum();
        let total_distributed: Decimal = distributions.iter().map(|d| d.data.quantity).sum();
        let current_stock: Decimal = inventory.iter().map(|i| i.data.quantity).sum();

        let expected_stock = total_donated - total_distributed;
        let divergence = (current_stock - expected_stock).abs();

        // Incomplete records are counted across every location: they signal
        // an import path that bypassed validation, wherever they landed.
        let incomplete_donations = self
            .get_donations(None)
            .await?
            .iter()
            .filter(|d| {
                d.data.item_description.trim().is_empty() || d.data.quantity <= Decimal::ZERO
            })
            .count();

        Ok(ConsistencyReport {
            total_donated,
            total_distributed,
            expected_stock,
            current_stock,
            divergence,
            is_consistent: divergence < Decimal::new(1, 2),
            donation_count: donations.len(),
            distribution_count: distributions.len(),
            inventory_item_count: inventory.len(),
            incomplete_donations,
        })
    }

    /// Chronological ledger of one item at one location: donation inflows
    /// and distribution outflows, newest first.
    pub async fn get_item_movement_history(
        &self,
        item_name: &str,
        location: Option<&str>,
    ) -> LedgerResult<Vec<MovementEntry>> {
        let location = location.unwrap_or(CENTRAL_LOCATION);
        let needle = item_name.trim().to_lowercase();
        let mut movements = Vec::new();

        for donation in self.get_donations(Some(location)).await? {
            if donation.data.item_description.to_lowercase() != needle {
                continue;
            }
            movements.push(MovementEntry {
                kind: MovementKind::Entrada,
                date: donation.data.donation_date,
                quantity: donation.data.quantity,
                unit: Some(donation.data.unit.clone()),
                description: format!(
                    "Doação de {}",
                    donation.data.donor_name.as_deref().unwrap_or("Anônimo")
                ),
            });
        }

        for distribution in self.get_distributions(Some(location)).await? {
            if distribution.data.item_name.to_lowercase() != needle {
                continue;
            }
            movements.push(MovementEntry {
                kind: MovementKind::Saida,
                date: distribution.data.distribution_date,
                quantity: distribution.data.quantity,
                unit: distribution.data.unit.clone(),
                description: format!(
                    "Distribuição para {}",
                    distribution.data.recipient_name.as_deref().unwrap_or("N/A")
                ),
            });
        }

        movements.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Donation, NewDistribution, NewDonation};
    use crate::test_support::create_test_ledger;

    fn donation(description: &str, quantity: i64, unit: &str) -> NewDonation {
        NewDonation {
            shelter_id: None,
            item_description: description.to_string(),
            quantity: Decimal::from(quantity),
            unit: unit.to_string(),
            donor_name: Some("Defesa Civil".to_string()),
            category: None,
        }
    }

    fn distribution(item: &str, quantity: i64) -> NewDistribution {
        NewDistribution {
            shelter_id: None,
            inventory_id: None,
            item_name: Some(item.to_string()),
            quantity: Decimal::from(quantity),
            unit: None,
            recipient_name: Some("Família Silva".to_string()),
        }
    }

    #[tokio::test]
    async fn ledger_stays_consistent_through_the_full_flow() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        // Donate 50, distribute 20, transfer 10 out.
        ledger
            .add_donation(donation("Água mineral", 50, "L"))
            .await
            .unwrap();
        ledger
            .add_distribution(distribution("Água mineral", 20))
            .await
            .unwrap();

        let item_id = ledger.get_inventory(Some(CENTRAL_LOCATION)).await.unwrap()[0]
            .meta
            .business_id
            .clone();
        ledger
            .transfer_stock(&item_id, "ABR-7", Decimal::from(10))
            .await
            .unwrap();

        let report = ledger
            .get_data_consistency_report(Some(CENTRAL_LOCATION))
            .await
            .unwrap();

        assert_eq!(report.total_donated, Decimal::from(50));
        // 20 distributed + 10 transferred out.
        assert_eq!(report.total_distributed, Decimal::from(30));
        assert_eq!(report.expected_stock, Decimal::from(20));
        assert_eq!(report.current_stock, Decimal::from(20));
        assert_eq!(report.divergence, Decimal::ZERO);
        assert!(report.is_consistent);
        assert_eq!(report.incomplete_donations, 0);
    }

    #[tokio::test]
    async fn report_flags_divergence_after_out_of_band_edit() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        ledger
            .add_donation(donation("Arroz", 40, "kg"))
            .await
            .unwrap();
        let item_id = ledger.get_inventory(Some(CENTRAL_LOCATION)).await.unwrap()[0]
            .meta
            .business_id
            .clone();

        // A manual stock correction that no donation or distribution backs.
        ledger
            .update_inventory_item(&item_id, |item| item.quantity = Decimal::from(25))
            .await
            .unwrap();

        let report = ledger
            .get_data_consistency_report(Some(CENTRAL_LOCATION))
            .await
            .unwrap();
        assert!(!report.is_consistent);
        assert_eq!(report.divergence, Decimal::from(15));
    }

    #[tokio::test]
    async fn report_counts_donations_that_bypassed_validation() {
        let (ledger, store, _guard) = create_test_ledger().await;

        ledger
            .add_donation(donation("Água mineral", 50, "L"))
            .await
            .unwrap();

        // Simulates a record imported directly into the store, skipping
        // the ledger's creation-time validation.
        let mut rogue = abrigo_sync::Stored::new(Donation {
            shelter_id: CENTRAL_LOCATION.to_string(),
            item_description: "   ".to_string(),
            quantity: Decimal::ZERO,
            unit: "un".to_string(),
            donor_name: None,
            category: None,
            donation_date: Utc::now(),
        });
        store.put(&mut rogue).await.unwrap();

        let report = ledger
            .get_data_consistency_report(Some(CENTRAL_LOCATION))
            .await
            .unwrap();
        assert_eq!(report.incomplete_donations, 1);
    }

    #[tokio::test]
    async fn movement_history_merges_both_directions_newest_first() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        ledger
            .add_donation(donation("Água mineral", 50, "L"))
            .await
            .unwrap();
        ledger
            .add_distribution(distribution("água mineral", 20))
            .await
            .unwrap();

        let history = ledger
            .get_item_movement_history("Água Mineral", Some(CENTRAL_LOCATION))
            .await
            .unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, MovementKind::Saida);
        assert_eq!(history[1].kind, MovementKind::Entrada);
        assert!(history[0].description.contains("Família Silva"));
        assert!(history[1].description.contains("Defesa Civil"));
        assert!(history[0].date >= history[1].date);
    }

    #[tokio::test]
    async fn movement_history_is_scoped_to_item_and_location() {
        let (ledger, _store, _guard) = create_test_ledger().await;

        ledger
            .add_donation(donation("Água mineral", 50, "L"))
            .await
            .unwrap();
        ledger
            .add_donation(donation("Arroz", 20, "kg"))
            .await
            .unwrap();
        ledger
            .add_donation(NewDonation {
                shelter_id: Some("ABR-7".to_string()),
                ..donation("Água mineral", 5, "L")
            })
            .await
            .unwrap();

        let history = ledger
            .get_item_movement_history("Água mineral", Some(CENTRAL_LOCATION))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity, Decimal::from(50));
    }
}
