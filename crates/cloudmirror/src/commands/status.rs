use anyhow::Context;
use chrono::{DateTime, Utc};
use cloudmirror_cloud::{ResourceType, Vendor};
use cloudmirror_core::{FileStore, LocalStore, StatusRecord, SyncState};
use colored::Colorize;
use std::path::Path;

pub async fn handle(
    vendor: Vendor,
    account: &str,
    resource_type: Option<ResourceType>,
    state: &Path,
) -> anyhow::Result<()> {
    let store = FileStore::open(state)
        .await
        .with_context(|| format!("Failed to open local store at {}", state.display()))?;

    let mut statuses: Vec<StatusRecord> = store
        .load_statuses()
        .await?
        .into_iter()
        .filter(|record| record.scope.vendor == vendor && record.scope.account_id == account)
        .filter(|record| resource_type.is_none_or(|ty| record.scope.resource_type == ty))
        .collect();
    statuses.sort_by_key(|record| (record.scope.resource_type.sync_rank(), record.scope.region.clone()));

    println!("Account: {} ({})", account.cyan(), vendor);
    println!();

    if statuses.is_empty() {
        println!("{}", "No sync recorded for this account".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<20} {:<14} {:<12} {:>4} {:<20} {}",
            "TYPE", "REGION", "STATE", "GEN", "LAST SUCCESS", "LAST ERROR"
        )
        .bold()
    );
    println!("{}", "─".repeat(90).dimmed());

    for record in &statuses {
        let status = &record.status;
        let state = match status.state {
            SyncState::Success => status.state.to_string().green(),
            SyncState::Syncing => status.state.to_string().blue(),
            SyncState::Failed => status.state.to_string().red(),
            SyncState::NotStarted => status.state.to_string().dimmed(),
        };
        println!(
            "{:<20} {:<14} {:<12} {:>4} {:<20} {}",
            record.scope.resource_type.to_string(),
            record.scope.region.as_deref().unwrap_or("*"),
            state,
            status.generation,
            format_time(status.last_success_at),
            status.last_error.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time() {
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(format_time(Some(time)), "2026-03-01 08:30:00");
        assert_eq!(format_time(None), "-");
    }
}
