//! nutrid - Versioned nutrition data cache
//!
//! Cache-first food lookups over external nutrition databases, kept fresh by
//! a background scheduler with checksummed versions, backups and rollback.

pub mod backup_store;
pub mod cache_store;
pub mod error;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod signal_handlers;
pub mod subscriber;
pub mod update_manager;
pub mod validation;

pub use backup_store::{BackupInfo, BackupStore, VersionMap, VersionRegistry};
pub use cache_store::{DatasetCheckpoint, UnifiedCacheStore};
pub use error::{StoreError, StoreResult};
pub use provider::{DatasetQuery, FakeProvider, ProviderError, SourceProvider};
pub use retry::{RetryDecision, RetryTracker};
pub use scheduler::{SchedulerConfig, SchedulerStatus, UpdateScheduler};
pub use subscriber::{LoggingSubscriber, SubscriberList, UpdateSubscriber};
pub use update_manager::{database_status, DatasetDiff, UpdateManager};
pub use validation::validate_food_data;

use anyhow::{Context, Result};
use nutri_common::NutriConfig;
use std::sync::Arc;

/// Build the cache store and update manager described by `config`
pub fn build_update_manager(config: &NutriConfig) -> Result<UpdateManager> {
    let providers = provider::providers_from_config(&config.providers)
        .context("Failed to set up provider clients")?;
    let store = UnifiedCacheStore::new(&config.cache.root, providers)?
        .with_request_delay(config.providers.request_delay());
    Ok(UpdateManager::new(Arc::new(store), &config.updates))
}
