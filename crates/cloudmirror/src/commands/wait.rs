use cloudmirror_cloud::{ListFilter, ResourceProvider, ResourceType, Vendor};
use cloudmirror_cloud_snapshot::SnapshotProvider;
use cloudmirror_config::Config;
use cloudmirror_core::{PollOptions, PollOutcome, Poller, StatePollingHandler, StatePredicate};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct WaitArgs {
    pub vendor: Vendor,
    pub account: String,
    pub region: String,
    pub resource_type: ResourceType,
    pub ids: Vec<String>,
    pub success: Vec<String>,
    pub failed: Vec<String>,
    pub inventory: PathBuf,
    pub interval: Option<u64>,
    pub timeout: Option<u64>,
}

impl WaitArgs {
    fn options(&self, config: &Config) -> PollOptions {
        PollOptions::new(
            self.interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.poller.interval()),
            self.timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.poller.timeout()),
        )
    }

    fn predicate(&self) -> StatePredicate {
        let success: Vec<&str> = self.success.iter().map(String::as_str).collect();
        let failed: Vec<&str> = self.failed.iter().map(String::as_str).collect();
        StatePredicate::reach(&success).or_fail(&failed)
    }
}

pub async fn handle(config: &Config, args: WaitArgs) -> anyhow::Result<()> {
    let options = args.options(config);
    if options.interval.is_zero() {
        anyhow::bail!("Poll interval must be greater than 0");
    }

    println!(
        "{}",
        format!(
            "Waiting for {} {} to reach {}...",
            args.ids.len(),
            args.resource_type,
            args.success.join("|")
        )
        .blue()
    );

    let provider: Arc<dyn ResourceProvider> = Arc::new(SnapshotProvider::new(&args.inventory, args.vendor));
    let filter = ListFilter::new(&args.account, &args.region, args.resource_type);
    let poller = Poller::new(StatePollingHandler::new(provider, filter, args.predicate()), options);

    let cancel = super::cancel_on_ctrl_c();
    let outcome = match poller.poll_until_done(&args.ids, &cancel).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(outcome) = e.outcome() {
                print_outcome(outcome);
            }
            return Err(e.into());
        }
    };

    print_outcome(&outcome);

    if !outcome.failed_ids.is_empty() {
        anyhow::bail!(
            "{} target(s) failed: {}",
            outcome.failed_ids.len(),
            outcome.failure_message.as_deref().unwrap_or("no reason reported")
        );
    }

    println!("{}", "✓ All targets reached the expected state".green());
    Ok(())
}

fn print_outcome(outcome: &PollOutcome) {
    println!();
    print_ids("success", &outcome.success_ids, |s| s.green().to_string());
    print_ids("failed", &outcome.failed_ids, |s| s.red().to_string());
    print_ids("unknown", &outcome.unknown_ids, |s| s.yellow().to_string());
}

fn print_ids(label: &str, ids: &BTreeSet<String>, paint: impl Fn(&str) -> String) {
    if ids.is_empty() {
        return;
    }
    let joined = ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
    println!("{:<8} {}", paint(label), joined);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> WaitArgs {
        WaitArgs {
            vendor: Vendor::TCloud,
            account: "acc-1".into(),
            region: "ap-guangzhou".into(),
            resource_type: ResourceType::Cvm,
            ids: vec!["ins-1".into()],
            success: vec!["RUNNING".into()],
            failed: vec!["LAUNCH_FAILED".into()],
            inventory: PathBuf::from("inventory"),
            interval: None,
            timeout: Some(5),
        }
    }

    #[test]
    fn test_options_fall_back_to_config() {
        let options = args().options(&Config::default());
        assert_eq!(options.interval, Duration::from_secs(3));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
