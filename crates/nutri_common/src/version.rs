//! Dataset versions and update outcomes
//!
//! `DatasetVersion` is the single live metadata record per source.
//! `UpdateOutcome` is the immutable result of one update attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metadata key holding the update type
pub const META_UPDATE_TYPE: &str = "update_type";

/// How a version came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Regular interval-driven update
    Scheduled,
    /// Operator-forced update
    Forced,
    /// Restored from a backup snapshot
    Rollback,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Forced => "forced",
            Self::Rollback => "rollback",
        }
    }

    pub fn from_force(force: bool) -> Self {
        if force {
            Self::Forced
        } else {
            Self::Scheduled
        }
    }
}

/// Live, authoritative metadata for one source's dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub source: String,
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub record_count: usize,
    /// Hex digest over the canonical record set
    pub checksum: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DatasetVersion {
    /// Update type recorded in metadata, if any
    pub fn update_type(&self) -> Option<UpdateType> {
        self.metadata
            .get(META_UPDATE_TYPE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Hours elapsed since this version was written
    pub fn hours_since_update(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.last_updated).num_seconds() as f64 / 3600.0
    }

    /// Operator-facing summary
    pub fn status(&self, now: DateTime<Utc>) -> DatabaseStatus {
        let short: String = self.checksum.chars().take(8).collect();
        DatabaseStatus {
            version: self.version.clone(),
            last_updated: self.last_updated,
            hours_since_update: self.hours_since_update(now),
            record_count: self.record_count,
            checksum: format!("{}...", short),
            metadata: self.metadata.clone(),
        }
    }
}

/// Read-only summary of a `DatasetVersion`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatus {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub hours_since_update: f64,
    pub record_count: usize,
    /// Truncated checksum for display
    pub checksum: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Result of one update attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub source: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    pub records_added: usize,
    pub records_updated: usize,
    pub records_removed: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl UpdateOutcome {
    /// Failed attempt; the stored version is untouched
    pub fn failure(source: &str, old_version: Option<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            source: source.to_string(),
            old_version,
            new_version: None,
            records_added: 0,
            records_updated: 0,
            records_removed: 0,
            errors,
            duration: Duration::ZERO,
        }
    }

    /// Successful attempt that found nothing new
    pub fn unchanged(source: &str, version: &str) -> Self {
        Self {
            success: true,
            source: source.to_string(),
            old_version: Some(version.to_string()),
            new_version: Some(version.to_string()),
            records_added: 0,
            records_updated: 0,
            records_removed: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// True when the update succeeded without producing a new version
    pub fn is_noop(&self) -> bool {
        self.success && self.new_version.is_some() && self.new_version == self.old_version
    }

    /// Compact change summary, e.g. "+3 ~1 -0"
    pub fn change_summary(&self) -> String {
        format!(
            "+{} ~{} -{}",
            self.records_added, self.records_updated, self.records_removed
        )
    }
}

/// Next version label, strictly greater than `previous`.
///
/// Labels are UTC timestamps with microseconds (`YYYYMMDD_HHMMSS_ffffff`) so
/// they sort chronologically as plain strings.
pub fn next_version_label(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let label = now.format("%Y%m%d_%H%M%S_%6f").to_string();
    match previous {
        Some(prev) if label.as_str() <= prev => format!("{}_1", prev),
        _ => label,
    }
}

/// Label for a version produced by rolling back to `target`
pub fn rollback_label(target: &str, now: DateTime<Utc>) -> String {
    format!("{}_rollback_{}", target, now.format("%H%M%S"))
}
