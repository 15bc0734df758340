//! Inventory ledger: donation intake, distribution, transfers, bulk clears
//!
//! Every mutating operation is one unit of work against the local store:
//! either all of its writes commit, or none do. A committed mutation then
//! triggers an opportunistic push; transport failures never surface to the
//! caller, whose local write has already succeeded.

use crate::audit::append_audit;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    AuditAction, Distribution, DistributionKind, Donation, InventoryItem, NewDistribution,
    NewDonation, CENTRAL_LOCATION, TRANSFER_ID_PREFIX,
};
use abrigo_sync::{Entity, LocalStore, Stored, StoreTx, SyncEngine, SyncError};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Domain service over the local store. Explicitly constructed with its
/// store handle; the sync engine is optional so read-mostly tools can run
/// without one.
pub struct ShelterLedger {
    pub(crate) store: Arc<LocalStore>,
    pub(crate) sync: Option<Arc<SyncEngine>>,
}

impl ShelterLedger {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store, sync: None }
    }

    pub fn with_sync(store: Arc<LocalStore>, sync: Arc<SyncEngine>) -> Self {
        Self {
            store,
            sync: Some(sync),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Opportunistic push after a committed mutation.
    pub(crate) async fn trigger_push(&self) {
        if let Some(sync) = &self.sync {
            sync.try_push().await;
        }
    }

    /// Receive a donation: insert the intake event, fold the quantity into
    /// the location's stock (creating the item if needed), and append one
    /// audit entry. Atomic.
    pub async fn add_donation(&self, input: NewDonation) -> LedgerResult<Stored<Donation>> {
        let description = input.item_description.trim().to_string();
        if description.is_empty() {
            return Err(LedgerError::Validation(
                "Donation requires an item description".to_string(),
            ));
        }
        if input.quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Donation quantity must be greater than zero".to_string(),
            ));
        }

        let location = input
            .shelter_id
            .clone()
            .unwrap_or_else(|| CENTRAL_LOCATION.to_string());

        let mut tx = self.store.begin().await?;

        let mut donation = Stored::new(Donation {
            shelter_id: location.clone(),
            item_description: description.clone(),
            quantity: input.quantity,
            unit: input.unit.clone(),
            donor_name: input.donor_name.clone(),
            category: input.category.clone(),
            donation_date: Utc::now(),
        });
        tx.put(&mut donation).await?;

        match find_active_item(&mut tx, &location, &description).await? {
            Some(mut item) => {
                item.data.quantity += input.quantity;
                tx.put(&mut item).await?;
            }
            None => {
                let mut item = Stored::new(InventoryItem {
                    shelter_id: location.clone(),
                    item_name: description.clone(),
                    category: input.category.clone(),
                    quantity: input.quantity,
                    unit: input.unit.clone(),
                    min_quantity: crate::models::default_min_quantity(),
                });
                tx.put(&mut item).await?;
            }
        }

        append_audit(
            &mut tx,
            AuditAction::DonationReceived,
            "donation",
            &donation.meta.business_id,
            format!(
                "{}: {} {} -> {}",
                description, input.quantity, input.unit, location
            ),
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            business_id = %donation.meta.business_id,
            location = %location,
            "Donation received"
        );

        self.trigger_push().await;
        Ok(donation)
    }

    /// Distribute stock to a recipient. The item is resolved by explicit
    /// reference or by name at the source location; the draw-down must not
    /// exceed the on-hand quantity. Atomic.
    pub async fn add_distribution(
        &self,
        input: NewDistribution,
    ) -> LedgerResult<Stored<Distribution>> {
        if input.quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Distribution quantity must be greater than zero".to_string(),
            ));
        }

        let location = input
            .shelter_id
            .clone()
            .unwrap_or_else(|| CENTRAL_LOCATION.to_string());

        let mut tx = self.store.begin().await?;

        let mut item = match &input.inventory_id {
            Some(id) => tx
                .get_by_business_id::<InventoryItem>(id)
                .await?
                .filter(Stored::is_active),
            None => None,
        };
        if item.is_none() {
            if let Some(name) = &input.item_name {
                item = find_active_item(&mut tx, &location, name).await?;
            }
        }
        let mut item = item.ok_or_else(|| {
            LedgerError::NotFound("No matching inventory item for distribution".to_string())
        })?;

        if item.data.quantity < input.quantity {
            return Err(LedgerError::InsufficientStock(format!(
                "{} has {} {}, requested {}",
                item.data.item_name, item.data.quantity, item.data.unit, input.quantity
            )));
        }

        item.data.quantity -= input.quantity;
        tx.put(&mut item).await?;

        let mut distribution = Stored::new(Distribution {
            shelter_id: item.data.shelter_id.clone(),
            inventory_id: item.meta.business_id.clone(),
            item_name: item.data.item_name.clone(),
            quantity: input.quantity,
            unit: input.unit.clone().or_else(|| Some(item.data.unit.clone())),
            recipient_name: input.recipient_name.clone(),
            destination_shelter_id: None,
            kind: DistributionKind::Distribution,
            distribution_date: Utc::now(),
        });
        tx.put(&mut distribution).await?;

        append_audit(
            &mut tx,
            AuditAction::Distribution,
            "distribution",
            &distribution.meta.business_id,
            format!(
                "{}: -{} {} -> {}",
                distribution.data.item_name,
                input.quantity,
                distribution.data.unit.as_deref().unwrap_or(""),
                input.recipient_name.as_deref().unwrap_or("N/A"),
            ),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok(distribution)
    }

    /// Move stock between locations. Decrements the source item, increments
    /// or creates the destination item (case-insensitive name match), and
    /// records the movement as a transfer-kind distribution. Atomic across
    /// both items and the movement record.
    pub async fn transfer_stock(
        &self,
        inventory_id: &str,
        destination: &str,
        quantity: Decimal,
    ) -> LedgerResult<Stored<Distribution>> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Transfer quantity must be greater than zero".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;

        let mut source = tx
            .get_by_business_id::<InventoryItem>(inventory_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| {
                LedgerError::NotFound(format!("Source inventory item {} not found", inventory_id))
            })?;

        if source.data.quantity < quantity {
            return Err(LedgerError::InsufficientStock(format!(
                "{} has {} {} at {}, requested {}",
                source.data.item_name,
                source.data.quantity,
                source.data.unit,
                source.data.shelter_id,
                quantity
            )));
        }

        source.data.quantity -= quantity;
        tx.put(&mut source).await?;

        match find_active_item(&mut tx, destination, &source.data.item_name).await? {
            Some(mut dest) => {
                dest.data.quantity += quantity;
                tx.put(&mut dest).await?;
            }
            None => {
                let mut dest = Stored::new(InventoryItem {
                    shelter_id: destination.to_string(),
                    item_name: source.data.item_name.clone(),
                    category: source.data.category.clone(),
                    quantity,
                    unit: source.data.unit.clone(),
                    min_quantity: source.data.min_quantity,
                });
                tx.put(&mut dest).await?;
            }
        }

        let from = source.data.shelter_id.clone();
        let mut movement = Stored::new_with_prefix(
            Distribution {
                shelter_id: from.clone(),
                inventory_id: source.meta.business_id.clone(),
                item_name: source.data.item_name.clone(),
                quantity,
                unit: Some(source.data.unit.clone()),
                recipient_name: Some(format!("TRANSFERÊNCIA -> {}", destination)),
                destination_shelter_id: Some(destination.to_string()),
                kind: DistributionKind::Transfer,
                distribution_date: Utc::now(),
            },
            TRANSFER_ID_PREFIX,
        );
        tx.put(&mut movement).await?;

        append_audit(
            &mut tx,
            AuditAction::StockTransfer,
            "distribution",
            &movement.meta.business_id,
            format!(
                "{}: {} {} {} -> {}",
                source.data.item_name, quantity, source.data.unit, from, destination
            ),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok(movement)
    }

    /// Edit an inventory item in place, auditing the quantity change.
    pub async fn update_inventory_item<F>(
        &self,
        business_id: &str,
        apply: F,
    ) -> LedgerResult<Stored<InventoryItem>>
    where
        F: FnOnce(&mut InventoryItem),
    {
        let mut tx = self.store.begin().await?;

        let mut item = tx
            .get_by_business_id::<InventoryItem>(business_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| {
                LedgerError::NotFound(format!("Inventory item {} not found", business_id))
            })?;

        let old_quantity = item.data.quantity;
        apply(&mut item.data);
        if item.data.quantity < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Inventory quantity cannot be negative".to_string(),
            ));
        }
        tx.put(&mut item).await?;

        append_audit(
            &mut tx,
            AuditAction::InventoryEdit,
            "inventory",
            &item.meta.business_id,
            format!(
                "{}: qty {} -> {}",
                item.data.item_name, old_quantity, item.data.quantity
            ),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok(item)
    }

    /// Soft-delete a single inventory item.
    pub async fn delete_inventory_item(&self, business_id: &str) -> LedgerResult<()> {
        let mut tx = self.store.begin().await?;

        let item = tx
            .get_by_business_id::<InventoryItem>(business_id)
            .await?
            .filter(Stored::is_active)
            .ok_or_else(|| {
                LedgerError::NotFound(format!("Inventory item {} not found", business_id))
            })?;

        let local_id = require_local_id(&item.meta)?;
        tx.soft_delete(InventoryItem::ENTITY, local_id).await?;

        append_audit(
            &mut tx,
            AuditAction::InventoryDelete,
            "inventory",
            &item.meta.business_id,
            format!(
                "Soft-deleted: {} ({} {})",
                item.data.item_name, item.data.quantity, item.data.unit
            ),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok(())
    }

    /// Soft-delete every active inventory item in scope, with one summary
    /// audit entry carrying the affected count.
    pub async fn clear_inventory(&self, location: Option<&str>) -> LedgerResult<usize> {
        let mut tx = self.store.begin().await?;

        let items = match location {
            Some(loc) => {
                tx.query_by_field::<InventoryItem>("shelter_id", loc)
                    .await?
            }
            None => tx.get_all::<InventoryItem>(false).await?,
        };
        let active: Vec<_> = items.into_iter().filter(Stored::is_active).collect();

        for item in &active {
            tx.soft_delete(InventoryItem::ENTITY, require_local_id(&item.meta)?)
                .await?;
        }

        let scope = location.unwrap_or("ALL");
        append_audit(
            &mut tx,
            AuditAction::ClearInventory,
            "inventory",
            scope,
            format!("Soft-deleted {} items from {}", active.len(), scope),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok(active.len())
    }

    /// Soft-delete every active donation and distribution, with one summary
    /// audit entry.
    pub async fn clear_reports(&self) -> LedgerResult<(usize, usize)> {
        let mut tx = self.store.begin().await?;

        let donations: Vec<_> = tx
            .get_all::<Donation>(false)
            .await?
            .into_iter()
            .filter(Stored::is_active)
            .collect();
        for donation in &donations {
            tx.soft_delete(Donation::ENTITY, require_local_id(&donation.meta)?)
                .await?;
        }

        let distributions: Vec<_> = tx
            .get_all::<Distribution>(false)
            .await?
            .into_iter()
            .filter(Stored::is_active)
            .collect();
        for distribution in &distributions {
            tx.soft_delete(Distribution::ENTITY, require_local_id(&distribution.meta)?)
                .await?;
        }

        append_audit(
            &mut tx,
            AuditAction::ClearReports,
            "reports",
            "ALL",
            format!(
                "Soft-deleted {} donations and {} distributions",
                donations.len(),
                distributions.len()
            ),
        )
        .await?;

        tx.commit().await?;
        self.trigger_push().await;
        Ok((donations.len(), distributions.len()))
    }

    /// Active inventory at one location, or everywhere.
    pub async fn get_inventory(
        &self,
        location: Option<&str>,
    ) -> LedgerResult<Vec<Stored<InventoryItem>>> {
        let items = match location {
            Some(loc) => {
                self.store
                    .query_by_field::<InventoryItem>("shelter_id", loc)
                    .await?
            }
            None => self.store.get_all::<InventoryItem>(true).await?,
        };
        Ok(items.into_iter().filter(Stored::is_active).collect())
    }

    /// Active inventory across every location.
    pub async fn get_global_inventory(&self) -> LedgerResult<Vec<Stored<InventoryItem>>> {
        self.get_inventory(None).await
    }

    /// Active items at or below their low-stock threshold.
    pub async fn get_low_stock_items(
        &self,
        location: Option<&str>,
    ) -> LedgerResult<Vec<Stored<InventoryItem>>> {
        Ok(self
            .get_inventory(location)
            .await?
            .into_iter()
            .filter(|i| i.data.quantity <= i.data.min_quantity)
            .collect())
    }

    /// Active donations at one location, or everywhere.
    pub async fn get_donations(
        &self,
        location: Option<&str>,
    ) -> LedgerResult<Vec<Stored<Donation>>> {
        let donations = match location {
            Some(loc) => self.store.query_by_field::<Donation>("shelter_id", loc).await?,
            None => self.store.get_all::<Donation>(true).await?,
        };
        Ok(donations.into_iter().filter(Stored::is_active).collect())
    }

    /// Active distributions (including transfers) at one source location,
    /// or everywhere.
    pub async fn get_distributions(
        &self,
        location: Option<&str>,
    ) -> LedgerResult<Vec<Stored<Distribution>>> {
        let distributions = match location {
            Some(loc) => {
                self.store
                    .query_by_field::<Distribution>("shelter_id", loc)
                    .await?
            }
            None => self.store.get_all::<Distribution>(true).await?,
        };
        Ok(distributions.into_iter().filter(Stored::is_active).collect())
    }
}

/// At most one active item exists per location and lowercased name; find it.
pub(crate) async fn find_active_item(
    tx: &mut StoreTx,
    location: &str,
    name: &str,
) -> LedgerResult<Option<Stored<InventoryItem>>> {
    let items = tx
        .query_by_field::<InventoryItem>("shelter_id", location)
        .await?;
    let needle = name.trim().to_lowercase();
    Ok(items
        .into_iter()
        .find(|item| item.is_active() && item.data.item_name.to_lowercase() == needle))
}

pub(crate) fn require_local_id(meta: &abrigo_sync::RecordMeta) -> LedgerResult<i64> {
    meta.local_id.ok_or_else(|| {
        LedgerError::Store(SyncError::Internal(
            "record loaded from store is missing its local id".to_string(),
        ))
    })
}
