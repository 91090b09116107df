//! Nutri Common - Shared types for the nutrition data cache
//!
//! Normalized food records, dataset versions, update outcomes, checksums,
//! configuration and on-disk layout helpers used by `nutrid`.

pub mod checksum;
pub mod config;
pub mod paths;
pub mod persist;
pub mod record;
pub mod version;

pub use checksum::checksum;
pub use config::{CacheConfig, NutriConfig, ProviderConfig, UpdateConfig};
pub use record::{food_key, NormalizedFoodRecord, RawFoodItem, RecordSet, REQUIRED_NUTRIENTS};
pub use version::{DatabaseStatus, DatasetVersion, UpdateOutcome, UpdateType};
