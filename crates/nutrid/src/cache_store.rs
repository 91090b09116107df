//! Unified food cache
//!
//! Cache-first lookups over every registered provider. The in-memory map is
//! snapshotted to `unified_food_cache.json` after each change; snapshot I/O
//! errors are logged and the in-memory state stays authoritative.

use crate::error::{StoreError, StoreResult};
use crate::provider::{DatasetQuery, SourceProvider};
use anyhow::Context;
use nutri_common::paths::{self, COMMON_FOODS_FILE, UNIFIED_CACHE_FILE};
use nutri_common::persist::{read_json, write_json_atomic};
use nutri_common::{food_key, NormalizedFoodRecord, RawFoodItem, RecordSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Results requested per consumer search
const SEARCH_PAGE_SIZE: usize = 5;

/// Default pause between canonical queries
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(100);

/// Live state of one source, captured before its dataset is replaced
#[derive(Debug, Clone)]
pub struct DatasetCheckpoint {
    source: String,
    dataset: Option<RecordSet>,
    common_foods: Option<RecordSet>,
    memory: RecordSet,
}

pub struct UnifiedCacheStore {
    root: PathBuf,
    providers: Vec<Arc<dyn SourceProvider>>,
    default_source: String,
    request_delay: Duration,
    memory: Mutex<RecordSet>,
}

impl UnifiedCacheStore {
    /// Open the cache under `root`, creating the directory if needed.
    ///
    /// The first provider becomes the default source.
    pub fn new(root: impl Into<PathBuf>, providers: Vec<Arc<dyn SourceProvider>>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {:?}", root))?;

        let default_source = providers
            .first()
            .map(|p| p.name().to_string())
            .unwrap_or_default();

        let memory = load_snapshot(&root.join(UNIFIED_CACHE_FILE));
        info!(
            "Food cache ready at {:?} ({} cached entries, default source '{}')",
            root,
            memory.len(),
            default_source
        );

        Ok(Self {
            root,
            providers,
            default_source,
            request_delay: DEFAULT_REQUEST_DELAY,
            memory: Mutex::new(memory),
        })
    }

    pub fn with_default_source(mut self, source: &str) -> Self {
        self.default_source = source.to_string();
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    /// Registered source names, in registration order
    pub fn sources(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.provider(source).is_some()
    }

    fn provider(&self, source: &str) -> Option<&Arc<dyn SourceProvider>> {
        self.providers.iter().find(|p| p.name() == source)
    }

    /// Provenance name of a source
    pub fn display_name(&self, source: &str) -> Option<String> {
        self.provider(source).map(|p| p.display_name().to_string())
    }

    fn memory(&self) -> MutexGuard<'_, RecordSet> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of entries in the in-memory map
    pub fn cached_entries(&self) -> usize {
        self.memory().len()
    }

    /// Search foods, cache-first.
    ///
    /// A cache hit returns the single best match stored for the query. Provider
    /// failures and unknown sources degrade to an empty list.
    pub async fn search_food(&self, query: &str, preferred_source: &str) -> Vec<NormalizedFoodRecord> {
        let key = format!("search_{}", query.trim().to_lowercase());
        if let Some(hit) = self.memory().get(&key).cloned() {
            debug!("Cache hit for '{}'", query);
            return vec![hit];
        }

        let Some(provider) = self.provider(preferred_source) else {
            warn!("Unknown food source '{}' for search '{}'", preferred_source, query);
            return Vec::new();
        };

        let records: Vec<NormalizedFoodRecord> =
            match provider.search_by_query(query, SEARCH_PAGE_SIZE).await {
                Ok(items) => items
                    .into_iter()
                    .map(|raw| NormalizedFoodRecord::from_raw(raw, provider.display_name()))
                    .collect(),
                Err(e) => {
                    warn!("Search '{}' on {} failed: {}", query, preferred_source, e);
                    return Vec::new();
                }
            };

        if let Some(best) = records.first() {
            self.memory().insert(key, best.clone());
            self.save_snapshot();
        }

        records
    }

    /// Search on the default source
    pub async fn search(&self, query: &str) -> Vec<NormalizedFoodRecord> {
        let source = self.default_source.clone();
        self.search_food(query, &source).await
    }

    /// Consumer helper: at most `max_results` records
    pub async fn search_foods_unified(&self, query: &str, max_results: usize) -> Vec<NormalizedFoodRecord> {
        let mut results = self.search(query).await;
        results.truncate(max_results);
        results
    }

    /// Look up one food by its source id, cache-first.
    ///
    /// Invalid ids and provider failures are logged and reported as not found.
    pub async fn get_food_by_id(&self, source: &str, id: &str) -> Option<NormalizedFoodRecord> {
        let key = format!("{}_{}", source, id);
        if let Some(hit) = self.memory().get(&key).cloned() {
            return Some(hit);
        }

        let Some(provider) = self.provider(source) else {
            warn!("Unknown food source '{}'", source);
            return None;
        };

        match provider.get_by_id(id).await {
            Ok(Some(raw)) => {
                let record = NormalizedFoodRecord::from_raw(raw, provider.display_name());
                self.memory().insert(key, record.clone());
                self.save_snapshot();
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Lookup of {} id '{}' failed: {}", source, id, e);
                None
            }
        }
    }

    /// Common foods of the default source.
    ///
    /// Served from `common_foods.json` when readable, otherwise rebuilt from
    /// the source's canonical queries (cache-first, failures skipped) and
    /// written back.
    pub async fn get_common_foods_database(&self) -> RecordSet {
        let path = self.root.join(COMMON_FOODS_FILE);
        if path.exists() {
            match read_json::<RecordSet>(&path) {
                Ok(db) => {
                    debug!("Loaded {} common foods from snapshot", db.len());
                    return db;
                }
                Err(e) => error!("Common foods snapshot unreadable, rebuilding: {:#}", e),
            }
        }

        let source = self.default_source.clone();
        let plan = match self.provider(&source) {
            Some(provider) => provider.dataset_queries(),
            None => {
                warn!("No default source registered, common foods database is empty");
                return RecordSet::new();
            }
        };

        info!("Building common foods database from {} ({} queries)", source, plan.len());
        let mut db = RecordSet::new();
        for query in &plan {
            let results = self.search_food(&query.query, &source).await;
            if results.is_empty() {
                warn!("No results for common food '{}'", query.query);
            }
            insert_results(&mut db, query, results);
            sleep(self.request_delay).await;
        }

        if let Err(e) = write_json_atomic(&path, &db) {
            error!("Failed to save common foods snapshot: {:#}", e);
        }
        info!("Common foods database built with {} items", db.len());
        db
    }

    /// Full dataset of `source`, straight from the provider.
    ///
    /// Failed queries are skipped; the fetch fails only when every query did.
    pub async fn fetch_dataset(&self, source: &str) -> StoreResult<RecordSet> {
        let provider = self
            .provider(source)
            .ok_or_else(|| StoreError::UnknownSource(source.to_string()))?;

        let plan = provider.dataset_queries();
        let mut records = RecordSet::new();
        let mut last_error = None;
        let mut failures = 0;

        for (i, query) in plan.iter().enumerate() {
            if i > 0 {
                sleep(self.request_delay).await;
            }
            match provider.search_by_query(&query.query, query.page_size).await {
                Ok(items) => {
                    let wrapped = items
                        .into_iter()
                        .map(|raw: RawFoodItem| NormalizedFoodRecord::from_raw(raw, provider.display_name()))
                        .collect();
                    insert_results(&mut records, query, wrapped);
                }
                Err(e) => {
                    warn!("Dataset query '{}' on {} failed: {}", query.query, source, e);
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if let Some(error) = last_error {
            if failures == plan.len() {
                return Err(StoreError::Provider {
                    provider: source.to_string(),
                    error,
                });
            }
        }

        debug!(
            "Fetched {} records for {} ({}/{} queries failed)",
            records.len(),
            source,
            failures,
            plan.len()
        );
        Ok(records)
    }

    /// Make `records` the live dataset of `source`
    pub fn persist_dataset(&self, source: &str, records: &RecordSet) -> StoreResult<()> {
        write_json_atomic(&paths::dataset_path(&self.root, source), records)?;

        {
            let mut memory = self.memory();
            for record in records.values() {
                memory.insert(format!("{}_{}", source, record.source_id), record.clone());
            }
        }
        self.save_snapshot();

        if source == self.default_source {
            if let Err(e) = write_json_atomic(&self.root.join(COMMON_FOODS_FILE), records) {
                error!("Failed to refresh common foods snapshot: {:#}", e);
            }
        }

        Ok(())
    }

    /// Live dataset of `source`
    pub fn load_dataset(&self, source: &str) -> StoreResult<RecordSet> {
        let path = paths::dataset_path(&self.root, source);
        if !path.exists() {
            return Err(StoreError::MissingDataset(source.to_string()));
        }
        Ok(read_json(&path)?)
    }

    /// Capture what `persist_dataset` would overwrite for `source`
    pub fn checkpoint(&self, source: &str) -> DatasetCheckpoint {
        let common_path = self.root.join(COMMON_FOODS_FILE);
        let common_foods = if source == self.default_source && common_path.exists() {
            read_json(&common_path).ok()
        } else {
            None
        };

        DatasetCheckpoint {
            source: source.to_string(),
            dataset: self.load_dataset(source).ok(),
            common_foods,
            memory: self.memory().clone(),
        }
    }

    /// Put back the state captured by `checkpoint`
    pub fn restore(&self, checkpoint: DatasetCheckpoint) -> StoreResult<()> {
        let DatasetCheckpoint {
            source,
            dataset,
            common_foods,
            memory,
        } = checkpoint;

        match &dataset {
            Some(records) => write_json_atomic(&paths::dataset_path(&self.root, &source), records)?,
            None => self.remove_dataset(&source)?,
        }

        *self.memory() = memory;
        self.save_snapshot();

        if source == self.default_source {
            let common_path = self.root.join(COMMON_FOODS_FILE);
            match &common_foods {
                Some(records) => write_json_atomic(&common_path, records)?,
                None if common_path.exists() => std::fs::remove_file(&common_path)?,
                None => {}
            }
        }

        info!("Restored previous {} dataset", source);
        Ok(())
    }

    /// Drop the live dataset file of `source`
    pub fn remove_dataset(&self, source: &str) -> StoreResult<()> {
        let path = paths::dataset_path(&self.root, source);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn save_snapshot(&self) {
        let snapshot = self.memory().clone();
        if let Err(e) = write_json_atomic(&self.root.join(UNIFIED_CACHE_FILE), &snapshot) {
            error!("Failed to save food cache: {:#}", e);
        }
    }

    /// Close every provider client
    pub async fn close(&self) {
        for provider in &self.providers {
            provider.close().await;
        }
        info!("Food cache closed");
    }
}

/// Store query results: the best match under the query key, or all of them
/// under their food keys
fn insert_results(set: &mut RecordSet, query: &DatasetQuery, results: Vec<NormalizedFoodRecord>) {
    match &query.key {
        Some(key) => {
            if let Some(best) = results.into_iter().next() {
                set.insert(key.clone(), best);
            }
        }
        None => {
            for record in results {
                let key = food_key(&record.name);
                if !key.is_empty() {
                    set.insert(key, record);
                }
            }
        }
    }
}

fn load_snapshot(path: &Path) -> RecordSet {
    if !path.exists() {
        return RecordSet::new();
    }
    match read_json::<RecordSet>(path) {
        Ok(map) => {
            info!("Loaded {} cached foods", map.len());
            map
        }
        Err(e) => {
            error!("Food cache snapshot unreadable, starting empty: {:#}", e);
            RecordSet::new()
        }
    }
}
