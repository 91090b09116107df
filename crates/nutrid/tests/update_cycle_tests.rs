//! Update cycle tests
//!
//! Drive `UpdateManager` against a `FakeProvider` in a temporary cache root.
//! No network access.

use nutri_common::paths::{dataset_path, COMMON_FOODS_FILE, VERSIONS_FILE};
use nutri_common::{RawFoodItem, UpdateConfig, UpdateOutcome, UpdateType};
use nutrid::{FakeProvider, SourceProvider, UnifiedCacheStore, UpdateManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

fn manager_with(dir: &TempDir, config: UpdateConfig) -> (Arc<FakeProvider>, UpdateManager) {
    let fake = Arc::new(FakeProvider::new("usda", "USDA FoodData Central"));
    let providers = vec![Arc::clone(&fake) as Arc<dyn SourceProvider>];
    let store = UnifiedCacheStore::new(dir.path(), providers)
        .unwrap()
        .with_request_delay(Duration::ZERO);
    (fake, UpdateManager::new(Arc::new(store), &config))
}

fn manager(dir: &TempDir) -> (Arc<FakeProvider>, UpdateManager) {
    manager_with(dir, UpdateConfig::default())
}

fn items(ids: &[&str]) -> Vec<RawFoodItem> {
    ids.iter()
        .map(|id| FakeProvider::item(id, &format!("Food {}", id), 10.0, 5.0, 20.0))
        .collect()
}

fn backup_count(dir: &TempDir, source: &str) -> usize {
    let prefix = format!("{}_backup_", source);
    std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .count()
}

// ============================================================================
// Update scenarios
// ============================================================================

#[tokio::test]
async fn test_first_update_creates_version_without_backup() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b", "c"]));

    let outcome = manager.update_database("usda", false).await;

    assert!(outcome.success, "{:?}", outcome.errors);
    assert_eq!(outcome.records_added, 3);
    assert!(outcome.old_version.is_none());

    let version = manager.current_version("usda").unwrap();
    assert_eq!(Some(&version.version), outcome.new_version.as_ref());
    assert_eq!(version.record_count, 3);
    assert_eq!(version.checksum.len(), 64);
    assert_eq!(version.update_type(), Some(UpdateType::Scheduled));
    assert_eq!(
        version.metadata.get("api_source"),
        Some(&serde_json::json!("USDA FoodData Central"))
    );

    assert_eq!(backup_count(&dir, "usda"), 0);
    assert!(dataset_path(dir.path(), "usda").exists());
}

#[tokio::test]
async fn test_forced_update_backs_up_prior_version_and_diffs() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b", "c"]));
    let first = manager.update_database("usda", false).await;

    fake.set_dataset(items(&["a", "b", "d"]));
    let second = manager.update_database("usda", true).await;

    assert!(second.success);
    assert_eq!(second.old_version, first.new_version);
    assert_ne!(second.new_version, first.new_version);
    assert_eq!(second.records_added, 1);
    assert_eq!(second.records_removed, 1);
    assert_eq!(second.records_updated, 0);

    assert_eq!(backup_count(&dir, "usda"), 1);
    let backups = manager.list_backups("usda").unwrap();
    assert_eq!(Some(&backups[0].version), first.new_version.as_ref());
    assert_eq!(
        manager.current_version("usda").unwrap().update_type(),
        Some(UpdateType::Forced)
    );
}

#[tokio::test]
async fn test_unchanged_dataset_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b"]));

    let first = manager.update_database("usda", false).await;
    let second = manager.update_database("usda", false).await;

    assert!(second.success);
    assert!(second.is_noop());
    assert_eq!(second.new_version, first.new_version);
    assert_eq!(
        (second.records_added, second.records_updated, second.records_removed),
        (0, 0, 0)
    );
    assert_eq!(
        manager.current_version("usda").unwrap().version,
        first.new_version.unwrap()
    );
}

#[tokio::test]
async fn test_changed_record_counts_as_updated() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b"]));
    manager.update_database("usda", false).await;

    let mut changed = items(&["a", "b"]);
    changed[1].nutrients_per_100g.insert("protein_g".to_string(), 12.5);
    fake.set_dataset(changed);

    let outcome = manager.update_database("usda", false).await;
    assert!(outcome.success);
    assert!(!outcome.is_noop());
    assert_eq!(outcome.records_updated, 1);
    assert_eq!(outcome.records_added, 0);
}

#[tokio::test]
async fn test_missing_diff_base_counts_everything_as_added() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b"]));
    manager.update_database("usda", false).await;

    // Without a live dataset there is nothing to back up or diff against
    std::fs::remove_file(dataset_path(dir.path(), "usda")).unwrap();
    fake.set_dataset(items(&["a", "b", "c"]));

    let outcome = manager.update_database("usda", false).await;
    assert!(outcome.success);
    assert_eq!(outcome.records_added, 3);
    assert_eq!(backup_count(&dir, "usda"), 0);
}

// ============================================================================
// Failures leave state untouched
// ============================================================================

#[tokio::test]
async fn test_validation_failure_reports_all_errors() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    let mut bad = items(&["a", "b"]);
    bad[0].nutrients_per_100g.insert("protein_g".to_string(), -1.0);
    bad[1].nutrients_per_100g.remove("fat_g");
    fake.set_dataset(bad);

    let outcome = manager.update_database("usda", false).await;

    assert!(!outcome.success);
    assert!(outcome.new_version.is_none());
    assert!(outcome.errors.iter().any(|e| e.contains("negative")));
    assert!(outcome.errors.iter().any(|e| e.contains("missing")));
    assert!(manager.current_version("usda").is_none());
    assert!(!dataset_path(dir.path(), "usda").exists());
}

#[tokio::test]
async fn test_validation_failure_keeps_previous_version() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));
    let good = manager.update_database("usda", false).await;

    let mut bad = items(&["a"]);
    bad[0].nutrients_per_100g.insert("carbs_g".to_string(), 150.0);
    fake.set_dataset(bad);
    let outcome = manager.update_database("usda", true).await;

    assert!(!outcome.success);
    assert!(outcome.errors.iter().any(|e| e.contains("unrealistic")));
    assert_eq!(outcome.old_version, good.new_version);
    assert_eq!(
        Some(&manager.current_version("usda").unwrap().version),
        good.new_version.as_ref()
    );
}

#[tokio::test]
async fn test_provider_outage_fails_the_cycle() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));
    fake.set_offline(true);

    let outcome = manager.update_database("usda", false).await;
    assert!(!outcome.success);
    assert_eq!(outcome.errors.len(), 1);
    assert!(manager.current_version("usda").is_none());
}

#[tokio::test]
async fn test_unknown_source_fails_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);

    let outcome = manager.update_database("nope", false).await;

    assert!(!outcome.success);
    assert!(outcome.errors[0].contains("Unknown source"));
    assert_eq!(fake.total_calls(), 0);
    assert!(!dir.path().join(VERSIONS_FILE).exists());
}

// ============================================================================
// Retention and rollback
// ============================================================================

#[tokio::test]
async fn test_retention_keeps_newest_backups() {
    let dir = TempDir::new().unwrap();
    let config = UpdateConfig {
        max_backups: 2,
        ..UpdateConfig::default()
    };
    let (fake, mut manager) = manager_with(&dir, config);
    fake.set_dataset(items(&["a"]));

    let mut labels = Vec::new();
    for _ in 0..5 {
        let outcome = manager.update_database("usda", true).await;
        assert!(outcome.success);
        labels.push(outcome.new_version.unwrap());
    }

    assert_eq!(backup_count(&dir, "usda"), 2);
    let kept: Vec<String> = manager
        .list_backups("usda")
        .unwrap()
        .into_iter()
        .map(|b| b.version)
        .collect();
    assert_eq!(kept, vec![labels[3].clone(), labels[2].clone()]);
}

#[tokio::test]
async fn test_rollback_to_missing_version_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));
    manager.update_database("usda", false).await;
    let before = manager.current_version("usda").cloned();

    assert!(!manager.rollback_database("usda", "19990101_000000_000000"));
    assert_eq!(manager.current_version("usda").cloned(), before);
    assert!(!manager.rollback_database("nope", "v1"));
}

#[tokio::test]
async fn test_rollback_restores_backup() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b", "c"]));
    let first = manager.update_database("usda", false).await;
    let first_label = first.new_version.unwrap();
    let first_checksum = manager.current_version("usda").unwrap().checksum.clone();

    fake.set_dataset(items(&["x"]));
    let second = manager.update_database("usda", false).await;
    let second_label = second.new_version.unwrap();

    assert!(manager.rollback_database("usda", &first_label));

    let current = manager.current_version("usda").unwrap();
    assert!(current.version.starts_with(&format!("{}_rollback_", first_label)));
    assert_eq!(current.update_type(), Some(UpdateType::Rollback));
    assert_eq!(current.record_count, 3);
    assert_eq!(current.checksum, first_checksum);
    assert_eq!(
        current.metadata.get("rolled_back_to"),
        Some(&serde_json::json!(first_label))
    );
    assert_eq!(
        current.metadata.get("rolled_back_from"),
        Some(&serde_json::json!(second_label))
    );

    let live = manager.store().load_dataset("usda").unwrap();
    assert_eq!(live.len(), 3);
}

// ============================================================================
// Persistence failures
// ============================================================================

/// Put a directory where the atomic writer wants its temp file
fn block_temp_file(target: &std::path::Path) -> std::path::PathBuf {
    let blocker = target.with_extension("json.tmp");
    std::fs::create_dir(&blocker).unwrap();
    blocker
}

#[tokio::test]
async fn test_failed_registry_save_restores_live_dataset() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["oats"]));
    let v1 = manager.update_database("usda", false).await.new_version.unwrap();
    let v1_data = manager.store().load_dataset("usda").unwrap();
    let v1_common = std::fs::read_to_string(dir.path().join(COMMON_FOODS_FILE)).unwrap();

    let blocker = block_temp_file(&dir.path().join(VERSIONS_FILE));
    fake.set_dataset(items(&["rice", "beans"]));
    let failed = manager.update_database("usda", true).await;

    assert!(!failed.success);
    assert_eq!(failed.old_version.as_deref(), Some(v1.as_str()));
    assert_eq!(manager.current_version("usda").unwrap().version, v1);
    assert_eq!(manager.store().load_dataset("usda").unwrap(), v1_data);
    assert_eq!(
        std::fs::read_to_string(dir.path().join(COMMON_FOODS_FILE)).unwrap(),
        v1_common
    );

    // Records of the failed cycle are not served from memory either
    let calls = fake.total_calls();
    assert!(manager.store().get_food_by_id("usda", "rice").await.is_none());
    assert_eq!(fake.total_calls(), calls + 1);

    // The next cycle backs up the real v1 data, so rollback returns to it
    std::fs::remove_dir(&blocker).unwrap();
    assert!(manager.update_database("usda", true).await.success);
    assert_eq!(manager.store().load_dataset("usda").unwrap().len(), 2);

    assert!(manager.rollback_database("usda", &v1));
    assert_eq!(manager.store().load_dataset("usda").unwrap(), v1_data);
}

#[tokio::test]
async fn test_failed_dataset_write_keeps_version() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));
    let v1 = manager.update_database("usda", false).await.new_version.unwrap();
    let v1_data = manager.store().load_dataset("usda").unwrap();

    block_temp_file(&dataset_path(dir.path(), "usda"));
    fake.set_dataset(items(&["a", "b"]));
    let failed = manager.update_database("usda", false).await;

    assert!(!failed.success);
    assert!(!failed.errors.is_empty());
    assert_eq!(manager.current_version("usda").unwrap().version, v1);
    assert_eq!(manager.store().load_dataset("usda").unwrap(), v1_data);
}

#[tokio::test]
async fn test_failed_registry_save_during_rollback_keeps_live_dataset() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a", "b"]));
    let v1 = manager.update_database("usda", false).await.new_version.unwrap();
    fake.set_dataset(items(&["c"]));
    let v2 = manager.update_database("usda", false).await.new_version.unwrap();
    let v2_data = manager.store().load_dataset("usda").unwrap();

    block_temp_file(&dir.path().join(VERSIONS_FILE));
    assert!(!manager.rollback_database("usda", &v1));

    assert_eq!(manager.current_version("usda").unwrap().version, v2);
    assert_eq!(manager.store().load_dataset("usda").unwrap(), v2_data);
}

// ============================================================================
// Scheduling helpers, subscribers, persistence
// ============================================================================

#[tokio::test]
async fn test_check_for_updates_respects_interval() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));

    assert_eq!(manager.check_for_updates().get("usda"), Some(&true));
    manager.update_database("usda", false).await;
    assert_eq!(manager.check_for_updates().get("usda"), Some(&false));

    let dir = TempDir::new().unwrap();
    let config = UpdateConfig {
        update_interval_hours: 0,
        ..UpdateConfig::default()
    };
    let (fake, mut manager) = manager_with(&dir, config);
    fake.set_dataset(items(&["a"]));
    manager.update_database("usda", false).await;
    assert_eq!(manager.check_for_updates().get("usda"), Some(&true));
}

#[tokio::test]
async fn test_run_scheduled_update_only_runs_due_sources() {
    let dir = TempDir::new().unwrap();
    let (fake, mut manager) = manager(&dir);
    fake.set_dataset(items(&["a"]));

    let outcomes = manager.run_scheduled_update().await;
    assert!(outcomes["usda"].success);

    let outcomes = manager.run_scheduled_update().await;
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn test_every_outcome_reaches_subscribers() {
    let dir = TempDir::new().unwrap();
    let (fake, manager) = manager(&dir);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let mut manager = manager
        .with_subscriber(Arc::new(|_: &UpdateOutcome| -> anyhow::Result<()> {
            anyhow::bail!("subscriber is broken")
        }))
        .with_subscriber(Arc::new(move |_: &UpdateOutcome| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

    fake.set_dataset(items(&["a"]));
    assert!(manager.update_database("usda", false).await.success);
    assert!(manager.update_database("usda", false).await.is_noop());
    fake.set_offline(true);
    assert!(!manager.update_database("usda", true).await.success);

    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let label = {
        let (fake, mut manager) = manager(&dir);
        fake.set_dataset(items(&["a", "b"]));
        manager.update_database("usda", false).await.new_version.unwrap()
    };

    let (_fake, manager) = manager(&dir);
    let status = manager.get_database_status();
    let usda = &status["usda"];
    assert_eq!(usda.version, label);
    assert_eq!(usda.record_count, 2);
    assert!(usda.checksum.ends_with("..."));
    assert_eq!(usda.checksum.len(), 11);
    assert!(usda.hours_since_update < 1.0);
}
