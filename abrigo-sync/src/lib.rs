//! Offline-first data layer for Abrigo
//!
//! Provides:
//! - Local SQLite store with per-entity record collections
//! - Record identity resolution across local and remote key schemes
//! - Push/pull synchronization with a local-wins-while-pending merge policy
//! - List merging for UIs reading two sources of truth
//!
//! The store, the remote client and the engine are explicitly constructed
//! handles wired together by the application shell; nothing here is global.

pub mod engine;
pub mod error;
pub mod identity;
pub mod merge;
pub mod record;
pub mod remote;
pub mod store;

pub use engine::{Connectivity, SyncConfig, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use identity::CandidateKeys;
pub use merge::{merge_lists, merge_policy, ListEntry, MergeDecision};
pub use record::{generate_business_id, Entity, RawRecord, RecordMeta, RecordStatus, Stored};
pub use remote::{HttpRemoteStore, InMemoryRemote, RemoteConfig, RemoteRecord, RemoteStore};
pub use store::{LocalStore, LocalStoreConfig, StoreTx};
