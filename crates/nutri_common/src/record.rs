//! Normalized food records
//!
//! Every provider maps its payloads into `RawFoodItem`; the cache wraps those
//! into `NormalizedFoodRecord` stamped with the provider's provenance name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Macro-nutrient keys a validated record must carry
pub const REQUIRED_NUTRIENTS: [&str; 3] = ["protein_g", "fat_g", "carbs_g"];

/// Full record set of one dataset, keyed by food key
pub type RecordSet = BTreeMap<String, NormalizedFoodRecord>;

/// Food record in the unified, provider-independent format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFoodRecord {
    /// Display name (never empty once validated)
    pub name: String,
    /// Nutrient name -> amount per 100 g/ml
    pub nutrients_per_100g: BTreeMap<String, f64>,
    /// Rough cost estimate per 100 units
    pub cost_per_100g: f64,
    /// Dietary flags such as VEG, VEGAN, GF
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Regions where the food is expected to be available
    #[serde(default)]
    pub availability_regions: BTreeSet<String>,
    /// Provenance, e.g. "USDA FoodData Central"
    pub source: String,
    /// Identifier inside the source
    pub source_id: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Provider-side item, already mapped to standard nutrient names
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFoodItem {
    pub source_id: String,
    pub name: String,
    pub category: Option<String>,
    pub nutrients_per_100g: BTreeMap<String, f64>,
    pub tags: BTreeSet<String>,
    pub availability_regions: BTreeSet<String>,
    pub cost_per_100g: f64,
}

impl NormalizedFoodRecord {
    /// Wrap a provider item, stamping it with the provider's display name
    pub fn from_raw(raw: RawFoodItem, source: &str) -> Self {
        Self {
            name: raw.name,
            nutrients_per_100g: raw.nutrients_per_100g,
            cost_per_100g: raw.cost_per_100g,
            tags: raw.tags,
            availability_regions: raw.availability_regions,
            source: source.to_string(),
            source_id: raw.source_id,
            category: raw.category,
        }
    }

    /// Nutrient amount, if present
    pub fn nutrient(&self, key: &str) -> Option<f64> {
        self.nutrients_per_100g.get(key).copied()
    }
}

/// Standardized key for a food name: lowercase, spaces to underscores,
/// anything but alphanumerics and underscores dropped.
pub fn food_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}
