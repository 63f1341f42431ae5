#![allow(dead_code)]
#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const DEFAULT_CONFIG: &str = r#"
cloud_resource:
  sync:
    enable: true
    sync_frequency_limiting_time_min: 10
    concurrency: 2
    page_size: 2
poller:
  interval_secs: 1
  timeout_secs: 5
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let project = Self { root };
        project.write_config(DEFAULT_CONFIG);
        project
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("cloudmirror.yaml")
    }

    pub fn inventory(&self) -> PathBuf {
        self.root.path().join("inventory")
    }

    pub fn state(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn write_config(&self, content: &str) {
        fs::write(self.config_path(), content).unwrap();
    }

    pub fn write_inventory(
        &self,
        vendor: &str,
        account: &str,
        region: &str,
        resource_type: &str,
        resources: serde_json::Value,
    ) {
        let dir = self.inventory().join(vendor).join(account).join(region);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.json", resource_type)),
            serde_json::to_string_pretty(&resources).unwrap(),
        )
        .unwrap();
    }

    /// Parsed `.cloudmirror/state.json` of the state directory
    pub fn read_state(&self) -> serde_json::Value {
        let path = self.state().join(".cloudmirror").join("state.json");
        let content = fs::read_to_string(path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    /// Drop recorded sync statuses so the next run is not frequency limited
    pub fn clear_statuses(&self) {
        let mut state = self.read_state();
        state["statuses"] = serde_json::json!([]);
        let path = self.state().join(".cloudmirror").join("state.json");
        fs::write(path, serde_json::to_string_pretty(&state).unwrap()).unwrap();
    }

    /// The binary, run inside the project with its config file
    pub fn cloudmirror(&self) -> Command {
        let mut cmd = Command::cargo_bin("cloudmirror").unwrap();
        cmd.current_dir(self.root.path())
            .env("CLOUDMIRROR_CONFIG_PATH", self.config_path())
            .env_remove("CLOUDMIRROR_INVENTORY")
            .env_remove("CLOUDMIRROR_STATE")
            .env_remove("RUST_LOG");
        cmd
    }
}
