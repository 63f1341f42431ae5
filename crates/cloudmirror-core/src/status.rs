//! Per-scope sync status with frequency limiting
//!
//! Every scope moves through `NotStarted → Syncing → Success | Failed` and
//! back to `Syncing` for the next run. At most one run per scope is Syncing at
//! any time, and a new run is refused until the cool-down since the last
//! terminal transition has elapsed.

use crate::error::{Result, SyncError};
use crate::model::Scope;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// State of a scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    NotStarted,
    Syncing,
    Success,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::NotStarted => write!(f, "not_started"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Success => write!(f, "success"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStatus {
    pub state: SyncState,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// A Syncing run whose lease passed is treated as abandoned
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_terminal_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Incremented on every transition to Syncing
    #[serde(default)]
    pub generation: u64,
}

impl ScopeStatus {
    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|expires| now >= expires)
    }
}

/// Status of one scope, as persisted by the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub scope: Scope,
    pub status: ScopeStatus,
}

/// Tracker timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Minimum time between the end of a run and the start of the next one
    pub cooldown: Duration,

    /// How long a Syncing run stays valid without a heartbeat
    pub lease_ttl: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10 * 60),
            lease_ttl: Duration::from_secs(30 * 60),
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Keyed map of scope statuses with per-scope locks
///
/// The map lock is only held for lookups and inserts; transitions lock the
/// scope's own entry, so different scopes never wait on each other.
#[derive(Debug, Default)]
pub struct SyncStatusTracker {
    config: TrackerConfig,
    scopes: RwLock<HashMap<Scope, Arc<Mutex<ScopeStatus>>>>,
}

impl SyncStatusTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    fn entry(&self, scope: &Scope) -> Arc<Mutex<ScopeStatus>> {
        if let Some(entry) = self.scopes.read().get(scope) {
            return entry.clone();
        }
        self.scopes
            .write()
            .entry(scope.clone())
            .or_default()
            .clone()
    }

    /// Reject a start while Syncing or within the cool-down
    fn admit(&self, scope: &Scope, status: &ScopeStatus, now: DateTime<Utc>) -> Result<()> {
        if status.state == SyncState::Syncing && !status.lease_expired(now) {
            return Err(SyncError::AlreadySyncing(scope.clone()));
        }

        let last_terminal = match status.state {
            SyncState::Syncing => None,
            _ => status.last_terminal_at,
        };
        if let Some(last) = last_terminal {
            let elapsed = now.signed_duration_since(last);
            let cooldown = to_delta(self.config.cooldown);
            if elapsed < cooldown {
                let retry_after = (cooldown - elapsed).to_std().unwrap_or_default();
                return Err(SyncError::FrequencyLimited {
                    scope: scope.clone(),
                    retry_after,
                });
            }
        }

        Ok(())
    }

    /// Whether a new run of the scope would be admitted now
    pub fn can_start(&self, scope: &Scope) -> bool {
        let entry = self.entry(scope);
        let status = entry.lock();
        self.admit(scope, &status, Utc::now()).is_ok()
    }

    /// Atomically move the scope to Syncing; returns the run's generation
    pub fn mark_syncing(&self, scope: &Scope) -> Result<u64> {
        let entry = self.entry(scope);
        let mut status = entry.lock();
        let now = Utc::now();
        self.admit(scope, &status, now)?;

        if status.state == SyncState::Syncing {
            tracing::warn!(
                scope = %scope,
                generation = status.generation,
                "sync lease expired, taking over abandoned run"
            );
        }

        status.state = SyncState::Syncing;
        status.started_at = Some(now);
        status.lease_expires_at = now.checked_add_signed(to_delta(self.config.lease_ttl));
        status.generation += 1;
        Ok(status.generation)
    }

    /// Start a run and return a guard that ends it
    pub fn try_start(&self, scope: &Scope) -> Result<SyncPermit> {
        let generation = self.mark_syncing(scope)?;
        Ok(SyncPermit {
            scope: scope.clone(),
            entry: self.entry(scope),
            generation,
            lease_ttl: self.config.lease_ttl,
            resolved: AtomicBool::new(false),
        })
    }

    /// Renew the lease of the current run
    pub fn heartbeat(&self, scope: &Scope) -> bool {
        let entry = self.entry(scope);
        let mut status = entry.lock();
        renew(&mut status, self.config.lease_ttl)
    }

    pub fn mark_success(&self, scope: &Scope) -> Result<()> {
        let entry = self.entry(scope);
        let mut status = entry.lock();
        if status.state != SyncState::Syncing {
            return Err(SyncError::InvalidParameter(format!(
                "{} is {}, not syncing",
                scope, status.state
            )));
        }
        finish(&mut status, None);
        Ok(())
    }

    pub fn mark_failed(&self, scope: &Scope, error: impl Into<String>) -> Result<()> {
        let entry = self.entry(scope);
        let mut status = entry.lock();
        if status.state != SyncState::Syncing {
            return Err(SyncError::InvalidParameter(format!(
                "{} is {}, not syncing",
                scope, status.state
            )));
        }
        finish(&mut status, Some(error.into()));
        Ok(())
    }

    /// Current status; unknown scopes are NotStarted
    pub fn get(&self, scope: &Scope) -> ScopeStatus {
        self.scopes
            .read()
            .get(scope)
            .map(|entry| entry.lock().clone())
            .unwrap_or_default()
    }

    /// Every known scope, sorted by scope
    pub fn snapshot(&self) -> Vec<StatusRecord> {
        let mut records: Vec<StatusRecord> = self
            .scopes
            .read()
            .iter()
            .map(|(scope, entry)| StatusRecord {
                scope: scope.clone(),
                status: entry.lock().clone(),
            })
            .collect();
        records.sort_by(|a, b| a.scope.cmp(&b.scope));
        records
    }

    /// Load persisted statuses
    ///
    /// Scopes currently Syncing in this process are left untouched. Restored
    /// Syncing entries keep their lease and expire naturally.
    pub fn restore(&self, records: impl IntoIterator<Item = StatusRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            let entry = self.entry(&record.scope);
            let mut status = entry.lock();
            if status.state == SyncState::Syncing {
                continue;
            }
            *status = record.status;
            restored += 1;
        }
        tracing::debug!("restored {} sync statuses", restored);
        restored
    }
}

fn renew(status: &mut ScopeStatus, lease_ttl: Duration) -> bool {
    if status.state != SyncState::Syncing {
        return false;
    }
    status.lease_expires_at = Utc::now().checked_add_signed(to_delta(lease_ttl));
    true
}

fn finish(status: &mut ScopeStatus, error: Option<String>) {
    let now = Utc::now();
    status.last_terminal_at = Some(now);
    status.lease_expires_at = None;
    match error {
        None => {
            status.state = SyncState::Success;
            status.last_success_at = Some(now);
            status.last_error = None;
        }
        Some(message) => {
            status.state = SyncState::Failed;
            status.last_error = Some(message);
        }
    }
}

/// RAII guard of a Syncing run
///
/// Dropping the permit without calling [`SyncPermit::succeed`] or
/// [`SyncPermit::fail`] marks the scope Failed. A permit whose run was taken
/// over after its lease expired no longer affects the scope.
#[derive(Debug)]
pub struct SyncPermit {
    scope: Scope,
    entry: Arc<Mutex<ScopeStatus>>,
    generation: u64,
    lease_ttl: Duration,
    resolved: AtomicBool,
}

impl SyncPermit {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Renew the lease; false if the run is no longer owned by this permit
    pub fn heartbeat(&self) -> bool {
        let mut status = self.entry.lock();
        if status.generation != self.generation {
            return false;
        }
        renew(&mut status, self.lease_ttl)
    }

    pub fn succeed(&self) -> bool {
        self.resolve(None)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.resolve(Some(error.into()))
    }

    fn resolve(&self, error: Option<String>) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut status = self.entry.lock();
        if status.generation != self.generation || status.state != SyncState::Syncing {
            tracing::warn!(
                scope = %self.scope,
                generation = self.generation,
                "ignoring result of a run that was taken over"
            );
            return false;
        }
        finish(&mut status, error);
        true
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        if !self.resolved.load(Ordering::Acquire) {
            tracing::warn!(scope = %self.scope, "sync permit dropped before completion");
            self.resolve(Some("sync abandoned before completion".to_string()));
        }
    }
}
