//! nutrid - Nutrition data cache daemon
//!
//! Keeps the local food database fresh and answers operator commands.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use nutri_common::{NutriConfig, UpdateOutcome};
use nutrid::{build_update_manager, SchedulerConfig, UpdateScheduler};
use std::collections::BTreeMap;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => NutriConfig::load_from(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => NutriConfig::load(),
    };

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Update { source, force } => update(config, source, force).await,
        Commands::Rollback { source, version } => rollback(config, &source, &version).await,
        Commands::Status { json } => status(config, json),
        Commands::Backups { source } => backups(config, &source),
        Commands::Search {
            query,
            source,
            limit,
        } => search(config, &query, source, limit).await,
    }
}

async fn run(config: NutriConfig) -> Result<()> {
    info!("nutrid v{} starting", env!("CARGO_PKG_VERSION"));

    let manager = build_update_manager(&config)?;
    let scheduler = UpdateScheduler::new(manager, SchedulerConfig::from(&config.updates));
    scheduler.start();
    scheduler.wait_until_stopped().await;

    info!("nutrid stopped");
    Ok(())
}

async fn update(config: NutriConfig, source: Option<String>, force: bool) -> Result<()> {
    let mut manager = build_update_manager(&config)?;
    let sources = match source {
        Some(source) => vec![source],
        None => manager.sources(),
    };

    let mut outcomes = BTreeMap::new();
    for source in sources {
        let outcome = manager.update_database(&source, force).await;
        outcomes.insert(source, outcome);
    }
    manager.close().await;

    print_outcomes(&outcomes);
    if outcomes.values().any(|o| !o.success) {
        bail!("One or more updates failed");
    }
    Ok(())
}

fn print_outcomes(outcomes: &BTreeMap<String, UpdateOutcome>) {
    for (source, outcome) in outcomes {
        if outcome.success {
            println!(
                "{}: {} -> {} ({}) in {:.1}s",
                source,
                outcome.old_version.as_deref().unwrap_or("none"),
                outcome.new_version.as_deref().unwrap_or("none"),
                outcome.change_summary(),
                outcome.duration.as_secs_f64()
            );
        } else {
            println!("{}: FAILED", source);
            for error in &outcome.errors {
                println!("  - {}", error);
            }
        }
    }
}

async fn rollback(config: NutriConfig, source: &str, version: &str) -> Result<()> {
    let mut manager = build_update_manager(&config)?;
    let restored = manager.rollback_database(source, version);
    manager.close().await;

    if !restored {
        bail!("Rollback of {} to {} failed", source, version);
    }
    println!("{} rolled back to {}", source, version);
    Ok(())
}

fn status(config: NutriConfig, json: bool) -> Result<()> {
    let manager = build_update_manager(&config)?;
    let status = manager.get_database_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if status.is_empty() {
        println!("No datasets recorded yet in {:?}", config.cache.root);
        return Ok(());
    }
    for (source, db) in &status {
        println!("{}", source);
        println!("  version:      {}", db.version);
        println!(
            "  updated:      {} ({:.1}h ago)",
            db.last_updated.format("%Y-%m-%d %H:%M:%S UTC"),
            db.hours_since_update
        );
        println!("  records:      {}", db.record_count);
        println!("  checksum:     {}", db.checksum);
    }
    Ok(())
}

fn backups(config: NutriConfig, source: &str) -> Result<()> {
    let manager = build_update_manager(&config)?;
    let backups = manager
        .list_backups(source)
        .with_context(|| format!("Failed to list backups of {}", source))?;

    if backups.is_empty() {
        println!("No backups for {}", source);
    }
    for backup in backups {
        println!(
            "{}  {}  {} bytes",
            backup.version,
            backup.modified.format("%Y-%m-%d %H:%M:%S UTC"),
            backup.size_bytes
        );
    }
    Ok(())
}

async fn search(config: NutriConfig, query: &str, source: Option<String>, limit: usize) -> Result<()> {
    let manager = build_update_manager(&config)?;
    let store = manager.store();
    let source = source.unwrap_or_else(|| store.default_source().to_string());

    let mut results = store.search_food(query, &source).await;
    results.truncate(limit);
    store.close().await;

    if results.is_empty() {
        println!("No foods found for '{}'", query);
    }
    for food in results {
        let macros: Vec<String> = ["protein_g", "fat_g", "carbs_g"]
            .iter()
            .filter_map(|k| food.nutrient(k).map(|v| format!("{} {:.1}", k, v)))
            .collect();
        println!("{} [{}:{}] {}", food.name, food.source, food.source_id, macros.join(", "));
    }
    Ok(())
}
