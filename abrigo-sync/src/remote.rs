//! Remote store interface
//!
//! The hosted backend is an external collaborator: all the engine needs is
//! per-entity upsert-by-business-key and per-entity select. Any transport
//! satisfying that contract conforms; the HTTP client here is the default.

use crate::error::{SyncError, SyncResult};
use crate::record::{RawRecord, RecordStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// A record as exchanged with the remote store. The payload travels as-is;
/// `remote_id` is the remote store's own primary key, echoed back on upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default)]
    pub remote_id: Option<String>,
    pub business_id: String,
    #[serde(default)]
    pub legacy_id: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
}

impl RawRecord {
    /// Shape a local record for the wire. `local_id` never leaves the
    /// device.
    pub fn to_remote(&self) -> RemoteRecord {
        RemoteRecord {
            remote_id: self.meta.remote_id.clone(),
            business_id: self.meta.business_id.clone(),
            legacy_id: self.meta.legacy_id.clone(),
            status: self.meta.status,
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
            data: self.data.clone(),
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert a record keyed by its business identifier. Returns the server
    /// copy, including the remote primary id.
    async fn upsert(&self, entity: &str, record: &RemoteRecord) -> SyncResult<RemoteRecord>;

    /// All remote records of an entity, optionally only those changed since
    /// the given instant.
    async fn fetch_all(
        &self,
        entity: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRecord>>;

    /// One remote record by business identifier.
    async fn fetch_by_business_id(
        &self,
        entity: &str,
        business_id: &str,
    ) -> SyncResult<Option<RemoteRecord>>;
}

/// Configuration for the HTTP remote store client
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Server base URL
    pub base_url: String,
    /// Authentication token
    pub auth_token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            auth_token: None,
            timeout_secs: 30,
        }
    }
}

/// HTTP client for the hosted backend.
pub struct HttpRemoteStore {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpRemoteStore {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert(&self, entity: &str, record: &RemoteRecord) -> SyncResult<RemoteRecord> {
        let url = format!("{}/{}/upsert", self.config.base_url, entity);
        let response = self
            .authorize(self.client.post(&url).json(record))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "Upsert of {} failed with status: {}",
                entity,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(e.to_string()))
    }

    async fn fetch_all(
        &self,
        entity: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRecord>> {
        let url = format!("{}/{}", self.config.base_url, entity);
        let mut request = self.client.get(&url);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "Fetch of {} failed with status: {}",
                entity,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(e.to_string()))
    }

    async fn fetch_by_business_id(
        &self,
        entity: &str,
        business_id: &str,
    ) -> SyncResult<Option<RemoteRecord>> {
        let url = format!("{}/{}/{}", self.config.base_url, entity, business_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "Fetch of {}/{} failed with status: {}",
                entity,
                business_id,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(e.to_string()))
    }
}

/// In-memory remote store used by tests and local demos to simulate the
/// hosted backend, including outages and per-record rejections.
#[derive(Default)]
pub struct InMemoryRemote {
    records: Mutex<HashMap<(String, String), RemoteRecord>>,
    offline: AtomicBool,
    reject: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend becoming unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject upserts of one business id (per-record failure).
    pub fn reject_business_id(&self, business_id: &str) {
        self.reject
            .lock()
            .expect("remote lock poisoned")
            .push(business_id.to_string());
    }

    /// Seed a record as if another device had pushed it.
    pub fn seed(&self, entity: &str, record: RemoteRecord) {
        let mut record = record;
        if record.remote_id.is_none() {
            record.remote_id = Some(format!(
                "srv-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1
            ));
        }
        self.records
            .lock()
            .expect("remote lock poisoned")
            .insert((entity.to_string(), record.business_id.clone()), record);
    }

    pub fn record_count(&self, entity: &str) -> usize {
        self.records
            .lock()
            .expect("remote lock poisoned")
            .keys()
            .filter(|(e, _)| e == entity)
            .count()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("remote unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn upsert(&self, entity: &str, record: &RemoteRecord) -> SyncResult<RemoteRecord> {
        self.check_online()?;

        if self
            .reject
            .lock()
            .expect("remote lock poisoned")
            .contains(&record.business_id)
        {
            return Err(SyncError::Transport(format!(
                "rejected by server: {}",
                record.business_id
            )));
        }

        let mut stored = record.clone();
        let mut records = self.records.lock().expect("remote lock poisoned");
        let key = (entity.to_string(), record.business_id.clone());

        // Keep a stable server id across re-upserts.
        stored.remote_id = records
            .get(&key)
            .and_then(|existing| existing.remote_id.clone())
            .or(stored.remote_id)
            .or_else(|| {
                Some(format!(
                    "srv-{}",
                    self.next_id.fetch_add(1, Ordering::SeqCst) + 1
                ))
            });

        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn fetch_all(
        &self,
        entity: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRecord>> {
        self.check_online()?;

        let records = self.records.lock().expect("remote lock poisoned");
        Ok(records
            .iter()
            .filter(|((e, _), _)| e == entity)
            .map(|(_, record)| record.clone())
            .filter(|record| match since {
                Some(since) => record.updated_at > since,
                None => true,
            })
            .collect())
    }

    async fn fetch_by_business_id(
        &self,
        entity: &str,
        business_id: &str,
    ) -> SyncResult<Option<RemoteRecord>> {
        self.check_online()?;

        let records = self.records.lock().expect("remote lock poisoned");
        Ok(records
            .get(&(entity.to_string(), business_id.to_string()))
            .cloned())
    }
}
