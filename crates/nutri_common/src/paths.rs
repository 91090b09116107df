//! On-disk layout of the cache root
//!
//! Everything lives flat under one configurable directory:
//! - `unified_food_cache.json`   in-memory lookup map snapshot
//! - `common_foods.json`         common-foods snapshot
//! - `database_versions.json`    source -> DatasetVersion registry
//! - `{source}_dataset.json`     live dataset of a source
//! - `{source}_backup_{version}.json` retained snapshots

use std::path::{Path, PathBuf};

pub const UNIFIED_CACHE_FILE: &str = "unified_food_cache.json";
pub const COMMON_FOODS_FILE: &str = "common_foods.json";
pub const VERSIONS_FILE: &str = "database_versions.json";

/// Default cache root: `<user cache dir>/nutrid/food_db`
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("nutrid")
        .join("food_db")
}

pub fn dataset_path(root: &Path, source: &str) -> PathBuf {
    root.join(format!("{}_dataset.json", source))
}

pub fn backup_prefix(source: &str) -> String {
    format!("{}_backup_", source)
}

pub fn backup_path(root: &Path, source: &str, version: &str) -> PathBuf {
    root.join(format!("{}{}.json", backup_prefix(source), version))
}

/// Version label encoded in a backup file name, if it belongs to `source`
pub fn backup_version_from_name(source: &str, file_name: &str) -> Option<String> {
    file_name
        .strip_prefix(&backup_prefix(source))?
        .strip_suffix(".json")
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
