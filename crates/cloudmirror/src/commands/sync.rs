use anyhow::Context;
use cloudmirror_cloud::{ResourceType, Vendor};
use cloudmirror_cloud_snapshot::SnapshotProvider;
use cloudmirror_config::Config;
use cloudmirror_core::{
    FileStore, OrchestratorRequest, SyncOrchestrator, SyncOutcome, SyncReport,
    SyncSettings, TrackerConfig,
};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SyncArgs {
    pub vendor: Vendor,
    pub account: String,
    pub regions: Vec<String>,
    pub resource_types: Vec<ResourceType>,
    pub inventory: PathBuf,
    pub state: PathBuf,
}

/// Orchestrator settings taken from the config file
pub fn settings(config: &Config) -> SyncSettings {
    let sync = &config.cloud_resource.sync;
    SyncSettings {
        concurrency: sync.concurrency,
        page_size: sync.page_size,
        tracker: TrackerConfig {
            cooldown: sync.cooldown(),
            lease_ttl: sync.lease_ttl(),
        },
    }
}

pub async fn handle(config: &Config, args: SyncArgs) -> anyhow::Result<()> {
    if !config.cloud_resource.sync.enable {
        anyhow::bail!("Resource sync is disabled (cloud_resource.sync.enable = false)");
    }

    let provider = Arc::new(SnapshotProvider::new(&args.inventory, args.vendor));

    let regions = if args.regions.is_empty() {
        provider
            .snapshot()
            .regions(&args.account)
            .await
            .with_context(|| format!("Failed to read regions of account {}", args.account))?
    } else {
        args.regions
    };
    if regions.is_empty() {
        anyhow::bail!("No regions found for account {}", args.account);
    }

    println!(
        "{}",
        format!("Syncing {} account {}...", args.vendor, args.account).blue()
    );
    println!("Regions: {}", regions.join(", ").cyan());

    let store = FileStore::open(&args.state)
        .await
        .with_context(|| format!("Failed to open local store at {}", args.state.display()))?;

    let orchestrator = SyncOrchestrator::new(Arc::new(store), settings(config)).with_provider(provider);
    let restored = orchestrator.restore_statuses().await?;
    tracing::debug!(restored, "restored sync statuses");

    let cancel = super::cancel_on_ctrl_c();
    let request = OrchestratorRequest::new(args.vendor, &args.account, regions)
        .with_types(args.resource_types);
    let report = orchestrator.sync(request, &cancel).await?;

    print_report(&report);

    if let Some(e) = report.first_error() {
        anyhow::bail!("Sync of {} account {} failed: {}", args.vendor, args.account, e);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!();
    println!(
        "{}",
        format!(
            "{:<20} {:<10} {:>8} {:>8} {:>10} {:>8} {:>10}",
            "TYPE", "RESULT", "CREATED", "UPDATED", "UNCHANGED", "DELETED", "ELAPSED"
        )
        .bold()
    );
    println!("{}", "─".repeat(80).dimmed());

    for summary in &report.resources {
        let result = match &summary.outcome {
            SyncOutcome::Synced => "synced".green(),
            SyncOutcome::Skipped(_) => "skipped".yellow(),
            SyncOutcome::Failed(_) => "failed".red(),
        };
        println!(
            "{:<20} {:<10} {:>8} {:>8} {:>10} {:>8} {:>10}",
            summary.resource_type.to_string(),
            result,
            summary.stats.created,
            summary.stats.updated,
            summary.stats.unchanged,
            summary.stats.deleted,
            format!("{:.1?}", summary.elapsed),
        );

        match &summary.outcome {
            SyncOutcome::Skipped(reason) => println!("  {}", reason.to_string().dimmed()),
            SyncOutcome::Failed(e) => println!("  {}", e.to_string().red()),
            SyncOutcome::Synced => {}
        }
    }

    let totals = report.totals();
    println!("{}", "─".repeat(80).dimmed());
    println!(
        "{} created, {} updated, {} deleted, {} relation(s) changed in {:.1?}",
        totals.created,
        totals.updated,
        totals.deleted,
        totals.relations_added + totals.relations_removed,
        report.elapsed
    );

    if report.is_success() {
        println!("{}", "✓ Sync finished".green());
    }
}
