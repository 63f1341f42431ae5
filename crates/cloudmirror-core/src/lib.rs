//! CloudMirror sync core
//!
//! Keeps a local mirror of cloud resources in step with the providers and
//! drives asynchronous cloud operations to completion.
//!
//! - [`cursor`]: paged listing over any [`ResourceProvider`](cloudmirror_cloud::ResourceProvider)
//! - [`handler`]: per-type sync state machine with deletion of vanished resources
//! - [`orchestrator`]: multi-region, multi-type syncs in dependency order
//! - [`poller`]: wait for operation targets to reach a terminal state
//! - [`relation`]: relation edges recomputed from their owner
//! - [`status`]: per-scope mutual exclusion and cooldown
//! - [`store`]: local persistence, in memory or as a JSON state file

pub mod cursor;
pub mod error;
pub mod gate;
pub mod handler;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod relation;
pub mod status;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cursor::{CursorPage, DEFAULT_PAGE_SIZE, ResourceListCursor};
pub use error::{ErrorKind, Result, SyncError};
pub use gate::{ConcurrencyGate, DEFAULT_CONCURRENCY, GateResults, WorkerFailure};
pub use handler::{
    HandlerReport, PageStats, PartialFailurePolicy, ProviderSyncHandler, SyncHandler, SyncRequest,
    policy_for, run_sync_handler,
};
pub use model::{LocalResourceRecord, RecordKey, RelationEdge, Scope, SyncTarget};
pub use orchestrator::{
    OrchestratorRequest, ResourceSyncSummary, SkipReason, SyncOrchestrator, SyncOutcome,
    SyncReport, SyncSettings,
};
pub use poller::{
    AttachmentPredicate, Classification, PollOptions, PollOutcome, Poller, PollingHandler,
    ResourceClassifier, StatePollingHandler, StatePredicate, StateSnapshot, execute_operation,
};
pub use relation::{RelationKind, RelationPlan, RelationReconciler, RelationStats};
pub use status::{
    ScopeStatus, StatusRecord, SyncPermit, SyncState, SyncStatusTracker, TrackerConfig,
};
pub use store::{
    FileStore, LocalStore, MemoryStore, RelationReplacement, StateFiles, StoreState, WriteBatch,
    WriterLock,
};
