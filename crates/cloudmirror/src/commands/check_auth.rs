use cloudmirror_cloud::{ResourceProvider, Vendor};
use cloudmirror_cloud_snapshot::SnapshotProvider;
use colored::Colorize;
use std::path::Path;

pub async fn handle(vendor: Vendor, account: &str, inventory: &Path) -> anyhow::Result<()> {
    println!("{}", format!("Checking access to {} account {}...", vendor, account).blue());

    let provider = SnapshotProvider::new(inventory, vendor);
    let status = provider.check_auth(account).await?;

    if status.authenticated {
        println!("{} {}", "✓".green(), status.account_info.unwrap_or_default());
        return Ok(());
    }

    let reason = status.error.unwrap_or_else(|| "unknown reason".to_string());
    println!("{} {}", "✗".red(), reason);
    anyhow::bail!("Account {} is not accessible", account)
}
