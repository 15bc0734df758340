//! Shelter and relief-supplies ledger for Abrigo
//!
//! Domain logic on top of the offline-first local store:
//! - Shelter and occupant lifecycle
//! - Donation intake, distribution and inter-location transfers
//! - Soft deletion with an append-only audit trail
//! - Derived consistency reporting and per-item movement history
//!
//! Every mutating operation is atomic over the collections it touches, and
//! committed mutations trigger an opportunistic push through the injected
//! sync engine.

pub mod audit;
pub mod error;
pub mod ledger;
pub mod models;
pub mod reporting;
pub mod shelters;

pub use error::{LedgerError, LedgerResult};
pub use ledger::ShelterLedger;
pub use models::{
    default_min_quantity, AuditAction, AuditLogEntry, Distribution, DistributionKind, Donation,
    InventoryItem, NewDistribution, NewDonation, Occupant, OccupantStatus, Shelter, ShelterStatus,
    CENTRAL_LOCATION, TRANSFER_ID_PREFIX,
};
pub use reporting::{ConsistencyReport, MovementEntry, MovementKind};
