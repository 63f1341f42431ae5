//! Bounded-time polling of asynchronous provider operations
//!
//! A submitted operation (create, start, attach, ...) completes at the
//! provider some time later. [`Poller`] repeatedly asks a [`PollingHandler`]
//! for the state of the targets that are still pending, until every target is
//! classified as success or failed, the deadline passes, or the caller
//! cancels.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use cloudmirror_cloud::{
    BatchOperationResult, CloudError, CloudResource, ListFilter, Operation, ResourceProvider,
    ResourceRef,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Classification of every polled target
///
/// A target is in at most one of the three sets. Once in `success_ids` or
/// `failed_ids` it never moves again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub success_ids: BTreeSet<String>,
    pub failed_ids: BTreeSet<String>,
    pub unknown_ids: BTreeSet<String>,

    /// First failure reason reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl PollOutcome {
    fn pending(targets: &[String]) -> Self {
        Self {
            unknown_ids: targets.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Whether no target is left unknown
    pub fn is_resolved(&self) -> bool {
        self.unknown_ids.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.is_resolved() && self.failed_ids.is_empty()
    }

    pub fn total(&self) -> usize {
        self.success_ids.len() + self.failed_ids.len() + self.unknown_ids.len()
    }

    /// Fold one polling round into the accumulated outcome
    ///
    /// Only targets still unknown can move; IDs the round reports that are not
    /// pending targets are ignored.
    fn absorb(&mut self, round: PollOutcome) {
        let pending: Vec<String> = self.unknown_ids.iter().cloned().collect();
        for id in pending {
            if round.success_ids.contains(&id) {
                self.unknown_ids.remove(&id);
                self.success_ids.insert(id);
            } else if round.failed_ids.contains(&id) {
                self.unknown_ids.remove(&id);
                self.failed_ids.insert(id);
            }
        }
        if self.failure_message.is_none() {
            self.failure_message = round.failure_message;
        }
    }

    /// Record IDs the provider rejected at submission time
    fn record_batch_failures(&mut self, result: &BatchOperationResult) {
        for id in &result.failed_ids {
            if !self.success_ids.contains(id) {
                self.unknown_ids.remove(id);
                self.failed_ids.insert(id.clone());
            }
        }
        if self.failure_message.is_none() {
            self.failure_message = result.first_error.clone();
        }
    }
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} unknown",
            self.success_ids.len(),
            self.failed_ids.len(),
            self.unknown_ids.len()
        )
    }
}

/// Call-site specific polling capability
#[async_trait]
pub trait PollingHandler: Send + Sync {
    /// Provider view returned by one polling round
    type Snapshot: Send;

    /// Query the provider for the given targets
    async fn poll(&self, cloud_ids: &[String]) -> cloudmirror_cloud::Result<Self::Snapshot>;

    /// Classify a snapshot; the flag reports whether the handler considers
    /// the operation finished
    fn done(&self, snapshot: &Self::Snapshot) -> (bool, PollOutcome);
}

/// Poll interval and overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Start / stop / reboot / reset password of instances
    pub fn batch_operate() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Creation of instances
    pub fn batch_create() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Drives a [`PollingHandler`] until every target is resolved
pub struct Poller<H> {
    handler: H,
    options: PollOptions,
}

impl<H: PollingHandler> Poller<H> {
    pub fn new(handler: H, options: PollOptions) -> Self {
        Self { handler, options }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Poll until every target is success or failed, or the handler reports
    /// the batch done
    ///
    /// Errors carry the partial outcome with unresolved targets in
    /// `unknown_ids`.
    pub async fn poll_until_done(
        &self,
        cloud_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        let mut targets: Vec<String> = Vec::with_capacity(cloud_ids.len());
        for id in cloud_ids {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }

        let mut outcome = PollOutcome::pending(&targets);
        if targets.is_empty() {
            return Ok(outcome);
        }

        let deadline = Instant::now() + self.options.timeout;
        let mut round = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::PollCancelled { outcome });
            }

            round += 1;
            let pending: Vec<String> = targets
                .iter()
                .filter(|id| outcome.unknown_ids.contains(*id))
                .cloned()
                .collect();

            match self.handler.poll(&pending).await {
                Ok(snapshot) => {
                    let (handler_done, classified) = self.handler.done(&snapshot);
                    outcome.absorb(classified);
                    tracing::debug!(
                        round,
                        handler_done,
                        "poll round finished: {}",
                        outcome
                    );
                    // The handler may end the batch with targets still unknown
                    if handler_done || outcome.is_resolved() {
                        return Ok(outcome);
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(round, "transient error while polling, will retry: {}", e);
                }
                Err(e) => {
                    tracing::error!(round, "polling aborted: {}", e);
                    return Err(SyncError::PollAborted { outcome, source: e });
                }
            }

            if Instant::now() + self.options.interval > deadline {
                tracing::warn!(
                    "polling timed out after {:?}: {}",
                    self.options.timeout,
                    outcome
                );
                return Err(SyncError::PollTimeout { outcome });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SyncError::PollCancelled { outcome });
                }
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }
    }
}

/// Classification of a single resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failed(Option<String>),
    Pending,
}

/// Decides whether a resource reached the state an operation waits for
pub trait ResourceClassifier: Send + Sync {
    fn classify(&self, resource: &CloudResource) -> Classification;

    /// Classification of a target the provider did not return
    fn classify_missing(&self, _cloud_id: &str) -> Classification {
        Classification::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StateGoal {
    Reach(Vec<String>),
    Leave(Vec<String>),
    Gone,
}

/// Classification by provider status string
///
/// Status comparison is case-insensitive since vendors disagree on casing
/// (`RUNNING`, `running`, `Running`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePredicate {
    goal: StateGoal,
    failed: Vec<String>,
}

fn owned(states: &[&str]) -> Vec<String> {
    states.iter().map(|s| s.to_string()).collect()
}

fn status_in(status: Option<&str>, states: &[String]) -> bool {
    status.is_some_and(|s| states.iter().any(|state| state.eq_ignore_ascii_case(s)))
}

impl StatePredicate {
    /// Success once the status is one of `states`
    pub fn reach(states: &[&str]) -> Self {
        Self {
            goal: StateGoal::Reach(owned(states)),
            failed: Vec::new(),
        }
    }

    /// Success once the status is no longer one of `states`
    pub fn leave(states: &[&str]) -> Self {
        Self {
            goal: StateGoal::Leave(owned(states)),
            failed: Vec::new(),
        }
    }

    /// Success once the provider no longer reports the resource
    pub fn gone() -> Self {
        Self {
            goal: StateGoal::Gone,
            failed: Vec::new(),
        }
    }

    /// Statuses that resolve the target as failed
    pub fn or_fail(mut self, states: &[&str]) -> Self {
        self.failed.extend(owned(states));
        self
    }

    pub fn cvm_create() -> Self {
        Self::reach(&["RUNNING"]).or_fail(&["LAUNCH_FAILED"])
    }

    /// Start, reboot and password reset all end in `RUNNING`
    pub fn cvm_running() -> Self {
        Self::reach(&["RUNNING"])
    }

    pub fn cvm_stopped() -> Self {
        Self::reach(&["STOPPED"])
    }

    pub fn disk_created() -> Self {
        Self::leave(&["CREATING"]).or_fail(&["ERROR"])
    }
}

impl ResourceClassifier for StatePredicate {
    fn classify(&self, resource: &CloudResource) -> Classification {
        let status = resource.status.as_deref();

        if status_in(status, &self.failed) {
            let message = resource
                .status_message
                .clone()
                .or_else(|| status.map(|s| format!("{} entered state {}", resource.cloud_id, s)));
            return Classification::Failed(message);
        }

        let reached = match &self.goal {
            StateGoal::Reach(states) => status_in(status, states),
            StateGoal::Leave(states) => status.is_some() && !status_in(status, states),
            StateGoal::Gone => false,
        };
        if reached {
            Classification::Success
        } else {
            Classification::Pending
        }
    }

    fn classify_missing(&self, _cloud_id: &str) -> Classification {
        match self.goal {
            StateGoal::Gone => Classification::Success,
            _ => Classification::Pending,
        }
    }
}

/// Classification by presence of an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPredicate {
    target: ResourceRef,
    attached: bool,
}

impl AttachmentPredicate {
    /// Success once the polled resource reports `target` among its relations
    pub fn attached(target: ResourceRef) -> Self {
        Self {
            target,
            attached: true,
        }
    }

    /// Success once `target` disappeared from the polled resource's relations
    pub fn detached(target: ResourceRef) -> Self {
        Self {
            target,
            attached: false,
        }
    }
}

impl ResourceClassifier for AttachmentPredicate {
    fn classify(&self, resource: &CloudResource) -> Classification {
        if resource.relations.contains(&self.target) == self.attached {
            Classification::Success
        } else {
            Classification::Pending
        }
    }
}

impl<C: ResourceClassifier + ?Sized> ResourceClassifier for Box<C> {
    fn classify(&self, resource: &CloudResource) -> Classification {
        (**self).classify(resource)
    }

    fn classify_missing(&self, cloud_id: &str) -> Classification {
        (**self).classify_missing(cloud_id)
    }
}

/// One round of [`StatePollingHandler`]
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub requested: Vec<String>,
    pub resources: Vec<CloudResource>,
}

/// [`PollingHandler`] built on [`ResourceProvider::get_resource_state`]
pub struct StatePollingHandler<C> {
    provider: Arc<dyn ResourceProvider>,
    filter: ListFilter,
    classifier: C,
}

impl<C: ResourceClassifier> StatePollingHandler<C> {
    pub fn new(provider: Arc<dyn ResourceProvider>, filter: ListFilter, classifier: C) -> Self {
        Self {
            provider,
            filter,
            classifier,
        }
    }
}

#[async_trait]
impl<C: ResourceClassifier> PollingHandler for StatePollingHandler<C> {
    type Snapshot = StateSnapshot;

    async fn poll(&self, cloud_ids: &[String]) -> cloudmirror_cloud::Result<StateSnapshot> {
        let chunk_size = self.provider.vendor().query_limit().max(1);
        let mut resources = Vec::with_capacity(cloud_ids.len());
        for chunk in cloud_ids.chunks(chunk_size) {
            let mut part = self.provider.get_resource_state(&self.filter, chunk).await?;
            resources.append(&mut part);
        }
        Ok(StateSnapshot {
            requested: cloud_ids.to_vec(),
            resources,
        })
    }

    fn done(&self, snapshot: &StateSnapshot) -> (bool, PollOutcome) {
        let mut outcome = PollOutcome::default();
        for id in &snapshot.requested {
            let classification = match snapshot.resources.iter().find(|r| r.cloud_id == *id) {
                Some(resource) => self.classifier.classify(resource),
                None => self.classifier.classify_missing(id),
            };
            match classification {
                Classification::Success => {
                    outcome.success_ids.insert(id.clone());
                }
                Classification::Failed(message) => {
                    outcome.failed_ids.insert(id.clone());
                    if outcome.failure_message.is_none() {
                        outcome.failure_message = message;
                    }
                }
                Classification::Pending => {
                    outcome.unknown_ids.insert(id.clone());
                }
            }
        }
        (outcome.unknown_ids.is_empty(), outcome)
    }
}

/// Submit an operation and wait for the targets it was applied to
///
/// IDs the provider rejected at submission, or left out of its answer, are
/// reported as failed without being polled. Dry runs return as soon as the
/// provider accepted them.
pub async fn execute_operation<C: ResourceClassifier>(
    provider: Arc<dyn ResourceProvider>,
    op: &Operation,
    classifier: C,
    options: PollOptions,
    cancel: &CancellationToken,
) -> Result<PollOutcome> {
    op.validate()?;

    let mut batch = match provider.submit_operation(op).await {
        Ok(batch) => batch,
        Err(CloudError::PartialFailed {
            success_ids,
            message,
        }) => {
            let mut batch = BatchOperationResult::succeeded(success_ids);
            batch.first_error = Some(message);
            batch
        }
        Err(e) => return Err(e.into()),
    };

    // Targets the provider reported neither way did not take the operation
    for id in &op.cloud_ids {
        if !batch.success_ids.contains(id) && !batch.failed_ids.contains(id) {
            let reason = batch
                .first_error
                .clone()
                .unwrap_or_else(|| format!("{} was not accepted by the provider", id));
            batch.add_failure(id.clone(), reason);
        }
    }

    tracing::info!(
        operation = %op.kind,
        resource_type = %op.resource_type,
        region = %op.region,
        "operation submitted: {}",
        batch.summary()
    );

    if op.dry_run {
        let mut outcome = PollOutcome::default();
        outcome.success_ids = batch.success_ids.iter().cloned().collect();
        outcome.record_batch_failures(&batch);
        return Ok(outcome);
    }

    let filter = ListFilter::new(&op.account_id, &op.region, op.resource_type);
    let poller = Poller::new(StatePollingHandler::new(provider, filter, classifier), options);

    match poller.poll_until_done(&batch.success_ids, cancel).await {
        Ok(mut outcome) => {
            outcome.record_batch_failures(&batch);
            Ok(outcome)
        }
        Err(SyncError::PollTimeout { mut outcome }) => {
            outcome.record_batch_failures(&batch);
            Err(SyncError::PollTimeout { outcome })
        }
        Err(SyncError::PollCancelled { mut outcome }) => {
            outcome.record_batch_failures(&batch);
            Err(SyncError::PollCancelled { outcome })
        }
        Err(SyncError::PollAborted {
            mut outcome,
            source,
        }) => {
            outcome.record_batch_failures(&batch);
            Err(SyncError::PollAborted { outcome, source })
        }
        Err(e) => Err(e),
    }
}
