//! Entity schemas for the shelter domain
//!
//! Every entity is an explicit tagged struct with an explicit constructor;
//! a missing field is a deserialization error, not a runtime fallback.

use abrigo_sync::Entity;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sentinel location for the central warehouse, as opposed to a shelter's
/// own stock.
pub const CENTRAL_LOCATION: &str = "CENTRAL";

/// Canonical low-stock threshold, applied at item creation time only.
pub fn default_min_quantity() -> Decimal {
    Decimal::new(5, 0)
}

/// Shelter operating state (domain lifecycle, distinct from soft deletion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelterStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shelter {
    pub name: String,
    pub capacity: i64,
    pub current_occupancy: i64,
    pub status: ShelterStatus,
}

impl Shelter {
    pub fn new(name: impl Into<String>, capacity: i64) -> Self {
        Self {
            name: name.into(),
            capacity,
            current_occupancy: 0,
            status: ShelterStatus::Active,
        }
    }
}

impl Entity for Shelter {
    const ENTITY: &'static str = "shelters";
    const ID_PREFIX: &'static str = "ABR";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupantStatus {
    Active,
    Exited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occupant {
    /// Business id of the owning shelter
    pub shelter_id: String,
    pub full_name: String,
    #[serde(default)]
    pub is_family_head: bool,
    pub status: OccupantStatus,
    pub entry_date: DateTime<Utc>,
    pub exit_date: Option<DateTime<Utc>>,
}

impl Occupant {
    pub fn new(shelter_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            shelter_id: shelter_id.into(),
            full_name: full_name.into(),
            is_family_head: false,
            status: OccupantStatus::Active,
            entry_date: Utc::now(),
            exit_date: None,
        }
    }
}

impl Entity for Occupant {
    const ENTITY: &'static str = "occupants";
    const ID_PREFIX: &'static str = "OCP";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    /// A shelter business id or [`CENTRAL_LOCATION`]
    pub shelter_id: String,
    /// Case-insensitive identity key within a location
    pub item_name: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit: String,
    #[serde(default = "default_min_quantity")]
    pub min_quantity: Decimal,
}

impl Entity for InventoryItem {
    const ENTITY: &'static str = "inventory";
    const ID_PREFIX: &'static str = "INV";
}

/// Immutable intake event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub shelter_id: String,
    pub item_description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub donor_name: Option<String>,
    pub category: Option<String>,
    pub donation_date: DateTime<Utc>,
}

impl Entity for Donation {
    const ENTITY: &'static str = "donations";
    const ID_PREFIX: &'static str = "DOA";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    #[default]
    Distribution,
    Transfer,
}

/// Outflow event: a handout to a recipient, or an inter-location transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    /// Source location
    pub shelter_id: String,
    /// Business id of the inventory item drawn down
    pub inventory_id: String,
    pub item_name: String,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub recipient_name: Option<String>,
    /// Set for transfers only
    pub destination_shelter_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: DistributionKind,
    pub distribution_date: DateTime<Utc>,
}

impl Entity for Distribution {
    const ENTITY: &'static str = "distributions";
    const ID_PREFIX: &'static str = "DIST";
}

/// Id prefix for transfer-kind distribution records.
pub const TRANSFER_ID_PREFIX: &str = "TRF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    DonationReceived,
    Distribution,
    StockTransfer,
    InventoryEdit,
    InventoryDelete,
    ClearInventory,
    ClearReports,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DonationReceived => "DONATION_RECEIVED",
            AuditAction::Distribution => "DISTRIBUTION",
            AuditAction::StockTransfer => "STOCK_TRANSFER",
            AuditAction::InventoryEdit => "INVENTORY_EDIT",
            AuditAction::InventoryDelete => "INVENTORY_DELETE",
            AuditAction::ClearInventory => "CLEAR_INVENTORY",
            AuditAction::ClearReports => "CLEAR_REPORTS",
        }
    }
}

/// Append-only audit trail entry. Never updated, never deleted, excluded
/// from bulk clears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl Entity for AuditLogEntry {
    const ENTITY: &'static str = "audit_log";
    const ID_PREFIX: &'static str = "AUD";
}

/// Input for a donation intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDonation {
    /// Defaults to [`CENTRAL_LOCATION`] when absent
    pub shelter_id: Option<String>,
    pub item_description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub donor_name: Option<String>,
    pub category: Option<String>,
}

/// Input for a distribution to a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDistribution {
    /// Source location; defaults to [`CENTRAL_LOCATION`] when absent
    pub shelter_id: Option<String>,
    /// Explicit item reference; when absent the item is resolved by name
    pub inventory_id: Option<String>,
    pub item_name: Option<String>,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub recipient_name: Option<String>,
}
