//! Version registry and backup snapshots
//!
//! `database_versions.json` maps each source to its live `DatasetVersion`.
//! Backups are full record sets named `{source}_backup_{version}.json`.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use nutri_common::paths::{self, VERSIONS_FILE};
use nutri_common::persist::{read_json, write_json_atomic};
use nutri_common::{DatasetVersion, RecordSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Source -> live version
pub type VersionMap = BTreeMap<String, DatasetVersion>;

/// Source -> live version, persisted as one JSON file.
///
/// Every accepted change is also published on a watch channel, so readers
/// never wait for the owner of the registry.
#[derive(Debug)]
pub struct VersionRegistry {
    path: PathBuf,
    versions: VersionMap,
    published: watch::Sender<VersionMap>,
}

impl VersionRegistry {
    /// Load the registry; a missing or corrupt file yields an empty one
    pub fn load(root: &Path) -> Self {
        let path = root.join(VERSIONS_FILE);
        let versions = if path.exists() {
            match read_json::<VersionMap>(&path) {
                Ok(versions) => {
                    info!("Loaded {} dataset versions", versions.len());
                    versions
                }
                Err(e) => {
                    error!("Version registry unreadable, starting empty: {:#}", e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        let (published, _) = watch::channel(versions.clone());
        Self {
            path,
            versions,
            published,
        }
    }

    pub fn get(&self, source: &str) -> Option<&DatasetVersion> {
        self.versions.get(source)
    }

    pub fn all(&self) -> &VersionMap {
        &self.versions
    }

    /// Live view of the registry, refreshed after every saved change
    pub fn subscribe(&self) -> watch::Receiver<VersionMap> {
        self.published.subscribe()
    }

    /// Make `version` the live version of its source.
    ///
    /// The file is written first; memory only changes once it is on disk.
    pub fn replace(&mut self, version: DatasetVersion) -> StoreResult<()> {
        let mut next = self.versions.clone();
        next.insert(version.source.clone(), version);
        write_json_atomic(&self.path, &next)?;
        self.published.send_replace(next.clone());
        self.versions = next;
        Ok(())
    }
}

/// One retained snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub version: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Per-source backup snapshots with a retention limit
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    max_backups: usize,
}

impl BackupStore {
    pub fn new(root: &Path, max_backups: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            max_backups,
        }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn exists(&self, source: &str, version: &str) -> bool {
        paths::backup_path(&self.root, source, version).exists()
    }

    /// Write the snapshot of `source` at `version`
    pub fn write(&self, source: &str, version: &str, records: &RecordSet) -> StoreResult<PathBuf> {
        let path = paths::backup_path(&self.root, source, version);
        write_json_atomic(&path, records)?;
        debug!("Backed up {} version {} ({} records)", source, version, records.len());
        Ok(path)
    }

    pub fn load(&self, source: &str, version: &str) -> StoreResult<RecordSet> {
        let path = paths::backup_path(&self.root, source, version);
        if !path.exists() {
            return Err(StoreError::MissingBackup {
                name: source.to_string(),
                version: version.to_string(),
            });
        }
        Ok(read_json(&path)?)
    }

    /// Backups of `source`, newest first
    pub fn list(&self, source: &str) -> StoreResult<Vec<BackupInfo>> {
        let mut backups = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(version) = file_name
                .to_str()
                .and_then(|name| paths::backup_version_from_name(source, name))
            else {
                continue;
            };

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            backups.push(BackupInfo {
                version,
                path: entry.path(),
                modified: metadata.modified()?.into(),
                size_bytes: metadata.len(),
            });
        }

        backups.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(backups)
    }

    /// Delete all but the newest `max_backups` snapshots of `source`.
    ///
    /// Returns the removed versions. A file that cannot be removed is logged
    /// and skipped.
    pub fn prune(&self, source: &str) -> StoreResult<Vec<String>> {
        let mut removed = Vec::new();
        for backup in self.list(source)?.into_iter().skip(self.max_backups) {
            match std::fs::remove_file(&backup.path) {
                Ok(()) => {
                    info!("Removed old backup {} for {}", backup.version, source);
                    removed.push(backup.version);
                }
                Err(e) => warn!("Failed to remove backup {:?}: {}", backup.path, e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutri_common::NormalizedFoodRecord;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn records(n: usize) -> RecordSet {
        (0..n)
            .map(|i| {
                let record = NormalizedFoodRecord {
                    name: format!("Food {}", i),
                    nutrients_per_100g: BTreeMap::new(),
                    cost_per_100g: 1.0,
                    tags: Default::default(),
                    availability_regions: Default::default(),
                    source: "Test".to_string(),
                    source_id: i.to_string(),
                    category: None,
                };
                (format!("food_{}", i), record)
            })
            .collect()
    }

    fn version(source: &str, label: &str) -> DatasetVersion {
        DatasetVersion {
            source: source.to_string(),
            version: label.to_string(),
            last_updated: Utc::now(),
            record_count: 0,
            checksum: "abc".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn test_registry_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let mut registry = VersionRegistry::load(dir.path());
        assert!(registry.all().is_empty());

        registry.replace(version("usda", "v1")).unwrap();
        registry.replace(version("usda", "v2")).unwrap();

        let reloaded = VersionRegistry::load(dir.path());
        assert_eq!(reloaded.get("usda").unwrap().version, "v2");
        assert_eq!(reloaded.all().len(), 1);
    }

    #[test]
    fn test_corrupt_registry_loads_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(VERSIONS_FILE), "{{{").unwrap();
        assert!(VersionRegistry::load(dir.path()).all().is_empty());
    }

    #[test]
    fn test_failed_registry_write_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let mut registry = VersionRegistry::load(dir.path());
        registry.replace(version("usda", "v1")).unwrap();

        // A directory in place of the temp file makes the write fail
        std::fs::create_dir(dir.path().join("database_versions.json.tmp")).unwrap();
        assert!(registry.replace(version("usda", "v2")).is_err());
        assert_eq!(registry.get("usda").unwrap().version, "v1");
    }

    #[test]
    fn test_subscribers_see_saved_changes_only() {
        let dir = TempDir::new().unwrap();
        let mut registry = VersionRegistry::load(dir.path());
        let view = registry.subscribe();
        assert!(view.borrow().is_empty());

        registry.replace(version("usda", "v1")).unwrap();
        assert_eq!(view.borrow()["usda"].version, "v1");

        std::fs::create_dir(dir.path().join("database_versions.json.tmp")).unwrap();
        assert!(registry.replace(version("usda", "v2")).is_err());
        assert_eq!(view.borrow()["usda"].version, "v1");
    }

    #[test]
    fn test_list_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path(), 5);
        let old = store.write("usda", "v1", &records(1)).unwrap();
        store.write("usda", "v2", &records(2)).unwrap();
        store.write("openfoodfacts", "v9", &records(1)).unwrap();
        set_mtime(&old, 3600);

        let listed: Vec<_> = store
            .list("usda")
            .unwrap()
            .into_iter()
            .map(|b| b.version)
            .collect();
        assert_eq!(listed, vec!["v2", "v1"]);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path(), 2);
        for (i, label) in ["v1", "v2", "v3", "v4"].iter().enumerate() {
            let path = store.write("usda", label, &records(1)).unwrap();
            set_mtime(&path, (10 - i as u64) * 60);
        }

        let mut removed = store.prune("usda").unwrap();
        removed.sort();
        assert_eq!(removed, vec!["v1", "v2"]);
        assert!(store.exists("usda", "v3"));
        assert!(store.exists("usda", "v4"));
    }

    #[test]
    fn test_load_missing_backup() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path(), 2);
        assert!(matches!(
            store.load("usda", "nope"),
            Err(StoreError::MissingBackup { .. })
        ));

        store.write("usda", "v1", &records(3)).unwrap();
        assert_eq!(store.load("usda", "v1").unwrap().len(), 3);
    }
}
