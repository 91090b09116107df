//! Dataset update cycle
//!
//! One cycle per source: back up the live version, fetch the full dataset,
//! compare checksums, validate, diff, persist the dataset and its version,
//! then prune backups. Each step returns a `Result`; the cycle decides
//! whether a failure is fatal (fetch, checksum, validation, persistence)
//! or only logged (backup, diff base, pruning).
//!
//! Every call produces exactly one `UpdateOutcome`, published to all
//! subscribers.

use crate::backup_store::{BackupInfo, BackupStore, VersionMap, VersionRegistry};
use crate::cache_store::UnifiedCacheStore;
use crate::error::{StoreError, StoreResult};
use crate::subscriber::{SubscriberList, UpdateSubscriber};
use crate::validation::validate_food_data;
use chrono::{DateTime, Utc};
use nutri_common::version::{next_version_label, rollback_label, META_UPDATE_TYPE};
use nutri_common::{
    checksum, DatabaseStatus, DatasetVersion, RecordSet, UpdateConfig, UpdateOutcome, UpdateType,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Record-level changes between two dataset versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetDiff {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl DatasetDiff {
    pub fn between(old: &RecordSet, new: &RecordSet) -> Self {
        let mut diff = Self::default();
        for (key, record) in new {
            match old.get(key) {
                None => diff.added += 1,
                Some(previous) if previous != record => diff.updated += 1,
                Some(_) => {}
            }
        }
        diff.removed = old.keys().filter(|k| !new.contains_key(*k)).count();
        diff
    }
}

pub struct UpdateManager {
    store: Arc<UnifiedCacheStore>,
    registry: VersionRegistry,
    backups: BackupStore,
    update_interval: Duration,
    subscribers: SubscriberList,
}

/// Operator summary of every recorded source, as of `now`
pub fn database_status(versions: &VersionMap, now: DateTime<Utc>) -> BTreeMap<String, DatabaseStatus> {
    versions
        .iter()
        .map(|(source, version)| (source.clone(), version.status(now)))
        .collect()
}

impl UpdateManager {
    /// Manage the sources of `store`, keeping state under the store's root
    pub fn new(store: Arc<UnifiedCacheStore>, config: &UpdateConfig) -> Self {
        let registry = VersionRegistry::load(store.root());
        let backups = BackupStore::new(store.root(), config.max_backups);
        info!(
            "Update manager ready: sources [{}], interval {}h, keeping {} backups",
            store.sources().join(", "),
            config.update_interval_hours,
            config.max_backups
        );

        Self {
            store,
            registry,
            backups,
            update_interval: config.update_interval(),
            subscribers: SubscriberList::default(),
        }
    }

    pub fn with_subscriber(self, subscriber: Arc<dyn UpdateSubscriber>) -> Self {
        self.add_subscriber(subscriber);
        self
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn UpdateSubscriber>) {
        self.subscribers.add(subscriber);
    }

    /// Handle to the subscriber list; additions reach this manager
    pub fn subscribers(&self) -> SubscriberList {
        self.subscribers.clone()
    }

    /// Live view of the version registry
    pub fn watch_versions(&self) -> watch::Receiver<VersionMap> {
        self.registry.subscribe()
    }

    pub fn store(&self) -> &Arc<UnifiedCacheStore> {
        &self.store
    }

    pub fn sources(&self) -> Vec<String> {
        self.store.sources()
    }

    pub fn current_version(&self, source: &str) -> Option<&DatasetVersion> {
        self.registry.get(source)
    }

    /// Which sources are due for an update
    pub fn check_for_updates(&self) -> BTreeMap<String, bool> {
        let now = Utc::now();
        self.sources()
            .into_iter()
            .map(|source| {
                let due = match self.is_due(&source, now) {
                    Ok(due) => due,
                    Err(e) => {
                        error!("Update check for {} failed: {}", source, e);
                        false
                    }
                };
                (source, due)
            })
            .collect()
    }

    fn is_due(&self, source: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        if !self.store.has_source(source) {
            return Err(StoreError::UnknownSource(source.to_string()));
        }
        let Some(current) = self.registry.get(source) else {
            return Ok(true);
        };
        // A timestamp in the future counts as fresh
        let elapsed = now
            .signed_duration_since(current.last_updated)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Ok(elapsed >= self.update_interval)
    }

    /// Run one update cycle for `source`
    pub async fn update_database(&mut self, source: &str, force: bool) -> UpdateOutcome {
        let started = Instant::now();
        info!("Updating {} database (force={})", source, force);

        let outcome = self.run_cycle(source, force).await.with_duration(started.elapsed());
        self.subscribers.publish(&outcome);
        outcome
    }

    async fn run_cycle(&mut self, source: &str, force: bool) -> UpdateOutcome {
        if !self.store.has_source(source) {
            return UpdateOutcome::failure(source, None, vec![format!("Unknown source: {}", source)]);
        }

        let current = self.registry.get(source).cloned();
        let old_version = current.as_ref().map(|v| v.version.clone());

        if let Some(current) = &current {
            if let Err(e) = self.backup_live_dataset(source, &current.version) {
                warn!("Could not back up {} version {}: {}", source, current.version, e);
            }
        }

        let records = match self.store.fetch_dataset(source).await {
            Ok(records) => records,
            Err(e) => return UpdateOutcome::failure(source, old_version, vec![e.to_string()]),
        };

        let digest = match checksum(&records) {
            Ok(digest) => digest,
            Err(e) => {
                return UpdateOutcome::failure(
                    source,
                    old_version,
                    vec![StoreError::Checksum(e).to_string()],
                )
            }
        };

        if !force {
            if let Some(current) = &current {
                if current.checksum == digest {
                    info!("No changes detected for {}", source);
                    return UpdateOutcome::unchanged(source, &current.version);
                }
            }
        }

        let errors = validate_food_data(&records);
        if !errors.is_empty() {
            warn!("{} dataset failed validation with {} errors", source, errors.len());
            return UpdateOutcome::failure(source, old_version, errors);
        }

        let previous = match &current {
            Some(current) => self.backups.load(source, &current.version).unwrap_or_else(|e| {
                warn!("Could not load previous {} data for comparison: {}", source, e);
                RecordSet::new()
            }),
            None => RecordSet::new(),
        };
        let diff = DatasetDiff::between(&previous, &records);

        let now = Utc::now();
        let version = DatasetVersion {
            source: source.to_string(),
            version: next_version_label(old_version.as_deref(), now),
            last_updated: now,
            record_count: records.len(),
            checksum: digest,
            metadata: self.update_metadata(source, UpdateType::from_force(force), records.len()),
        };
        let new_label = version.version.clone();

        if let Err(e) = self.commit(source, &records, version) {
            return UpdateOutcome::failure(source, old_version, vec![e.to_string()]);
        }

        match self.backups.prune(source) {
            Ok(removed) if !removed.is_empty() => {
                debug!("Pruned {} old {} backups", removed.len(), source)
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to prune {} backups: {}", source, e),
        }

        info!(
            "Successfully updated {} database: {} foods ({})",
            source,
            records.len(),
            new_label
        );

        UpdateOutcome {
            success: true,
            source: source.to_string(),
            old_version,
            new_version: Some(new_label),
            records_added: diff.added,
            records_updated: diff.updated,
            records_removed: diff.removed,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn update_metadata(
        &self,
        source: &str,
        update_type: UpdateType,
        record_count: usize,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_UPDATE_TYPE.to_string(), json!(update_type.as_str()));
        metadata.insert(
            "api_source".to_string(),
            json!(self.store.display_name(source).unwrap_or_else(|| source.to_string())),
        );
        metadata.insert("record_count".to_string(), json!(record_count));
        metadata
    }

    /// Make `records` live and record `version` for them.
    ///
    /// Either both land or neither does: a failed registry save puts the
    /// previous live dataset back.
    fn commit(&mut self, source: &str, records: &RecordSet, version: DatasetVersion) -> StoreResult<()> {
        let checkpoint = self.store.checkpoint(source);
        self.store.persist_dataset(source, records)?;

        if let Err(e) = self.registry.replace(version) {
            error!("Failed to save version registry: {}", e);
            if let Err(restore_err) = self.store.restore(checkpoint) {
                error!("Failed to restore {} dataset: {}", source, restore_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot the live dataset before it is overwritten
    fn backup_live_dataset(&self, source: &str, version: &str) -> StoreResult<()> {
        let live = self.store.load_dataset(source)?;
        self.backups.write(source, version, &live)?;
        Ok(())
    }

    /// Restore `target` as the live dataset of `source`
    pub fn rollback_database(&mut self, source: &str, target: &str) -> bool {
        match self.try_rollback(source, target) {
            Ok(version) => {
                info!(
                    "Rolled back {} to {} as {} ({} records)",
                    source, target, version.version, version.record_count
                );
                true
            }
            Err(e) => {
                error!("Rollback of {} to {} failed: {}", source, target, e);
                false
            }
        }
    }

    fn try_rollback(&mut self, source: &str, target: &str) -> StoreResult<DatasetVersion> {
        if !self.store.has_source(source) {
            return Err(StoreError::UnknownSource(source.to_string()));
        }

        let records = self.backups.load(source, target)?;
        let digest = checksum(&records)?;
        let current = self.registry.get(source).cloned();

        if let Some(current) = &current {
            if current.version != target {
                if let Err(e) = self.backup_live_dataset(source, &current.version) {
                    warn!("Could not back up {} version {}: {}", source, current.version, e);
                }
            }
        }

        let now = Utc::now();
        let mut metadata = self.update_metadata(source, UpdateType::Rollback, records.len());
        metadata.insert(
            "rolled_back_from".to_string(),
            json!(current.as_ref().map(|v| v.version.clone())),
        );
        metadata.insert("rolled_back_to".to_string(), json!(target));

        let version = DatasetVersion {
            source: source.to_string(),
            version: rollback_label(target, now),
            last_updated: now,
            record_count: records.len(),
            checksum: digest,
            metadata,
        };

        self.commit(source, &records, version.clone())?;
        Ok(version)
    }

    /// Operator summary of every recorded source
    pub fn get_database_status(&self) -> BTreeMap<String, DatabaseStatus> {
        database_status(self.registry.all(), Utc::now())
    }

    pub fn list_backups(&self, source: &str) -> StoreResult<Vec<BackupInfo>> {
        self.backups.list(source)
    }

    /// Update every source that is due
    pub async fn run_scheduled_update(&mut self) -> BTreeMap<String, UpdateOutcome> {
        let mut outcomes = BTreeMap::new();
        for (source, due) in self.check_for_updates() {
            if due {
                let outcome = self.update_database(&source, false).await;
                outcomes.insert(source, outcome);
            }
        }
        outcomes
    }

    /// Release provider resources
    pub async fn close(&self) {
        self.store.close().await;
    }
}
