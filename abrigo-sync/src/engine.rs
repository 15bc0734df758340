//! Push/pull synchronization between the local store and the remote store
//!
//! Protocol flow:
//! 1. Push: upsert every unsynced local record to the remote, per-record
//!    best effort
//! 2. Pull: fetch remote records, resolve identity, apply the merge policy
//! 3. Confirm: mark pushed records synced, guarded against concurrent edits
//!
//! Both directions are idempotent and safe to re-enter; there is no lock,
//! only convergent upsert/skip-if-pending semantics.

use crate::error::{SyncError, SyncResult};
use crate::identity;
use crate::merge::{merge_policy, MergeDecision};
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared online/offline signal fed by the application shell.
#[derive(Clone, Default)]
pub struct Connectivity {
    inner: Arc<ConnectivityInner>,
}

#[derive(Default)]
struct ConnectivityInner {
    online: AtomicBool,
    notify: Notify,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let state = Self::default();
        state.inner.online.store(online, Ordering::SeqCst);
        state
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Flip the signal. Regaining connectivity wakes the background loop.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            self.inner.notify.notify_waiters();
        }
    }

    /// Resolves when connectivity is regained.
    pub async fn regained(&self) {
        self.inner.notify.notified().await;
    }
}

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entity collections to synchronize, in push order. The audit log is
    /// deliberately absent: it is a device-local trail.
    pub entities: Vec<String>,
    /// Maximum records pushed per entity per cycle
    pub batch_size: i64,
    /// Background full-sync interval
    pub background_interval: Duration,
    /// Restrict pulls to records changed since the last successful pull
    pub pull_changed_since: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entities: vec![
                "shelters".to_string(),
                "occupants".to_string(),
                "donations".to_string(),
                "inventory".to_string(),
                "distributions".to_string(),
            ],
            batch_size: 100,
            background_interval: Duration::from_secs(5 * 60),
            pull_changed_since: false,
        }
    }
}

/// Counters for one sync cycle
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub pushed: usize,
    pub push_failed: usize,
    pub pulled: usize,
    pub skipped_pending: usize,
}

impl SyncStats {
    fn absorb(&mut self, other: SyncStats) {
        self.pushed += other.pushed;
        self.push_failed += other.push_failed;
        self.pulled += other.pulled;
        self.skipped_pending += other.skipped_pending;
    }
}

/// Orchestrates push and pull between the local and remote stores.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            config,
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Push every unsynced record to the remote store, per entity, per
    /// record. A failing record is left unsynced and the cycle moves on;
    /// push is never all-or-nothing across a collection.
    pub async fn push_pending(&self) -> SyncResult<SyncStats> {
        let mut stats = SyncStats::default();

        for entity in &self.config.entities {
            let pending = self.store.list_unsynced(entity, self.config.batch_size).await?;

            for record in pending {
                let local_id = match record.meta.local_id {
                    Some(id) => id,
                    None => continue,
                };
                let seen_updated_at = record.meta.updated_at;

                match self.remote.upsert(entity, &record.to_remote()).await {
                    Ok(server_copy) => {
                        let confirmed = self
                            .store
                            .mark_synced_guarded(
                                entity,
                                local_id,
                                seen_updated_at,
                                server_copy.remote_id.as_deref(),
                            )
                            .await?;
                        if confirmed {
                            stats.pushed += 1;
                        } else {
                            // Edited again mid-push; the next cycle picks
                            // up the newer version.
                            stats.push_failed += 1;
                        }
                    }
                    Err(err) => {
                        stats.push_failed += 1;
                        tracing::warn!(
                            entity_type = %entity,
                            business_id = %record.meta.business_id,
                            error = %err,
                            "Push failed for record, leaving unsynced"
                        );
                    }
                }
            }
        }

        tracing::debug!(
            pushed = stats.pushed,
            failed = stats.push_failed,
            "Push cycle complete"
        );

        Ok(stats)
    }

    /// Pull one entity collection and merge it into the local store under
    /// the local-wins-while-pending policy.
    pub async fn pull_and_merge(&self, entity: &str) -> SyncResult<SyncStats> {
        let mut stats = SyncStats::default();

        let since = if self.config.pull_changed_since {
            self.last_pull(entity).await?
        } else {
            None
        };
        let pull_started = Utc::now();

        let remote_records = self.remote.fetch_all(entity, since).await?;

        for remote_record in &remote_records {
            let local = identity::resolve(&self.store, entity, remote_record).await?;
            let local_meta = local.as_ref().map(|r| &r.meta);

            match merge_policy(local_meta, remote_record) {
                MergeDecision::KeepLocal => {
                    stats.skipped_pending += 1;
                    tracing::debug!(
                        entity_type = %entity,
                        business_id = %remote_record.business_id,
                        "Keeping pending local edit over remote copy"
                    );
                }
                MergeDecision::TakeRemote => {
                    let local_id = local.and_then(|r| r.meta.local_id);
                    self.store
                        .apply_remote(entity, local_id, remote_record)
                        .await?;
                    stats.pulled += 1;
                }
            }
        }

        if self.config.pull_changed_since {
            self.store
                .set_meta(&last_pull_key(entity), &pull_started.to_rfc3339())
                .await?;
        }

        Ok(stats)
    }

    /// Pull every configured entity.
    pub async fn pull_all(&self) -> SyncResult<SyncStats> {
        let mut stats = SyncStats::default();
        for entity in &self.config.entities {
            stats.absorb(self.pull_and_merge(entity).await?);
        }
        Ok(stats)
    }

    /// Full cycle: pull first, then push.
    pub async fn sync(&self) -> SyncResult<SyncStats> {
        let mut stats = self.pull_all().await?;
        stats.absorb(self.push_pending().await?);
        Ok(stats)
    }

    /// Push trigger for domain mutations: gated on connectivity, transport
    /// failures are swallowed after logging. The local write has already
    /// committed; the records simply stay unsynced until the next cycle.
    pub async fn try_push(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        if let Err(err) = self.push_pending().await {
            tracing::warn!(error = %err, "Opportunistic push failed");
        }
    }

    /// Percentage of records confirmed remote, across all entities.
    pub async fn sync_progress(&self) -> SyncResult<u8> {
        let mut total: i64 = 0;
        let mut synced: i64 = 0;

        for entity in &self.config.entities {
            total += self.store.count(entity).await?;
            synced += self.store.count_synced(entity).await?;
        }

        if total == 0 {
            return Ok(100);
        }
        Ok(((synced * 100) / total) as u8)
    }

    /// Background loop: a full sync on start, on every connectivity regain,
    /// and on a periodic fallback tick.
    pub fn spawn_background(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.background_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = engine.connectivity.regained() => {}
                }

                if !engine.connectivity.is_online() {
                    continue;
                }

                match engine.sync().await {
                    Ok(stats) => {
                        if stats.pushed > 0 || stats.pulled > 0 {
                            tracing::debug!(
                                pushed = stats.pushed,
                                pulled = stats.pulled,
                                "Background sync complete"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Background sync failed");
                    }
                }
            }
        })
    }

    async fn last_pull(&self, entity: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let value = self.store.get_meta(&last_pull_key(entity)).await?;
        match value {
            Some(raw) => Ok(Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| SyncError::Internal(format!("Invalid last-pull value: {}", e)))?
                    .with_timezone(&Utc),
            )),
            None => Ok(None),
        }
    }
}

fn last_pull_key(entity: &str) -> String {
    format!("last_pull_{}", entity)
}
