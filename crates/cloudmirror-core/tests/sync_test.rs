mod common;

use cloudmirror_cloud::{CloudResource, ResourceRef, ResourceType, Vendor};
use cloudmirror_core::testing::StaticProvider;
use cloudmirror_core::{
    ErrorKind, LocalStore, MemoryStore, OrchestratorRequest, Scope, SkipReason, SyncError,
    SyncOutcome, SyncState,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_full_sync_deletes_only_vanished_records() {
    let provider = Arc::new(StaticProvider::new(Vendor::TCloud).with_resources(
        ACCOUNT,
        REGION,
        resources(ResourceType::Disk, "disk", 250),
    ));
    let store = Arc::new(MemoryStore::new());
    seed(&store, Vendor::TCloud, REGION, &resources(ResourceType::Disk, "stale", 10)).await;
    // Same type in another region is out of scope
    seed(&store, Vendor::TCloud, "ap-shanghai", &resources(ResourceType::Disk, "other", 5)).await;

    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let reports = orchestrator
        .sync_resource(
            Vendor::TCloud,
            ACCOUNT,
            &regions(&[REGION]),
            ResourceType::Disk,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].pages, 3);
    assert_eq!(reports[0].stats.created, 250);
    assert_eq!(reports[0].deleted, 10);

    let scope = Scope::new(Vendor::TCloud, ACCOUNT, ResourceType::Disk);
    assert_eq!(store.list_cloud_ids(&scope.clone().with_region(REGION)).await.unwrap().len(), 250);
    assert_eq!(store.list_cloud_ids(&scope.with_region("ap-shanghai")).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_listing_failure_keeps_local_records() {
    let provider = Arc::new(
        StaticProvider::new(Vendor::Aws)
            .with_resources(ACCOUNT, REGION, resources(ResourceType::Eip, "eip", 250))
            .fail_list_page(2),
    );
    let store = Arc::new(MemoryStore::new());
    let stale = resources(ResourceType::Eip, "stale", 10);
    seed(&store, Vendor::Aws, REGION, &stale).await;

    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let err = orchestrator
        .sync_resource(
            Vendor::Aws,
            ACCOUNT,
            &regions(&[REGION]),
            ResourceType::Eip,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderFatal);

    let scope = Scope::new(Vendor::Aws, ACCOUNT, ResourceType::Eip).with_region(REGION);
    let stale_ids: Vec<String> = stale.iter().map(|r| r.cloud_id.clone()).collect();
    assert_eq!(store.get_by_cloud_ids(&scope, &stale_ids).await.unwrap().len(), 10);

    let status = orchestrator.status(&Scope::new(Vendor::Aws, ACCOUNT, ResourceType::Eip));
    assert_eq!(status.state, SyncState::Failed);
}

#[tokio::test]
async fn test_second_run_writes_nothing() {
    let provider = Arc::new(StaticProvider::new(Vendor::HuaWei).with_resources(
        ACCOUNT,
        REGION,
        resources(ResourceType::Subnet, "subnet", 120),
    ));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let cancel = CancellationToken::new();
    let request = OrchestratorRequest::new(Vendor::HuaWei, ACCOUNT, regions(&[REGION]))
        .with_types([ResourceType::Subnet]);

    orchestrator.sync(request.clone(), &cancel).await.unwrap();
    let written = store.records_written();
    let batches = store.batches();
    assert_eq!(written, 120);

    let report = orchestrator.sync(request, &cancel).await.unwrap();
    assert!(report.is_success());
    let summary = report.summary(ResourceType::Subnet).unwrap();
    assert_eq!(summary.stats.unchanged, 120);
    assert_eq!(summary.stats.created + summary.stats.updated + summary.stats.deleted, 0);
    assert_eq!(store.records_written(), written);
    assert_eq!(store.batches(), batches);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sync_of_same_scope_is_skipped() {
    let provider = Arc::new(
        StaticProvider::new(Vendor::Gcp)
            .with_resources(ACCOUNT, "us-east1", resources(ResourceType::Disk, "pd", 3))
            .with_list_delay(Duration::from_secs(1)),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let cancel = CancellationToken::new();
    let request = OrchestratorRequest::new(Vendor::Gcp, ACCOUNT, regions(&["us-east1"]))
        .with_types([ResourceType::Disk]);

    let (first, second) = tokio::join!(
        orchestrator.sync(request.clone(), &cancel),
        orchestrator.sync(request.clone(), &cancel)
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(matches!(
        first.summary(ResourceType::Disk).unwrap().outcome,
        SyncOutcome::Synced
    ));
    assert!(matches!(
        second.summary(ResourceType::Disk).unwrap().outcome,
        SyncOutcome::Skipped(SkipReason::AlreadySyncing)
    ));
    assert_eq!(provider.list_calls(), 1);
}

#[tokio::test]
async fn test_cooldown_makes_no_provider_calls() {
    let provider = Arc::new(StaticProvider::new(Vendor::Azure).with_resources(
        ACCOUNT,
        "eastus",
        resources(ResourceType::NetworkInterface, "nic", 4),
    ));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::from_secs(10 * 60));
    let cancel = CancellationToken::new();
    // Validation runs before the tracker is consulted
    let err = orchestrator
        .sync_resource(Vendor::Azure, ACCOUNT, &[], ResourceType::NetworkInterface, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    orchestrator
        .sync_resource(
            Vendor::Azure,
            ACCOUNT,
            &regions(&["eastus"]),
            ResourceType::NetworkInterface,
            &cancel,
        )
        .await
        .unwrap();
    let list_calls = provider.list_calls();
    let state_calls = provider.state_calls();

    let err = orchestrator
        .sync_resource(
            Vendor::Azure,
            ACCOUNT,
            &regions(&["eastus"]),
            ResourceType::NetworkInterface,
            &cancel,
        )
        .await
        .unwrap_err();
    match err {
        SyncError::FrequencyLimited { retry_after, .. } => {
            assert!(retry_after > Duration::from_secs(9 * 60));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(provider.list_calls(), list_calls);
    assert_eq!(provider.state_calls(), state_calls);
}

#[tokio::test]
async fn test_failed_type_skips_dependents_only() {
    let provider = Arc::new(
        StaticProvider::new(Vendor::TCloud)
            .with_resources(ACCOUNT, REGION, resources(ResourceType::Disk, "disk", 2))
            .with_resources(ACCOUNT, REGION, resources(ResourceType::Eip, "eip", 2))
            .fail_type(ResourceType::Vpc),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);

    let report = orchestrator
        .sync(
            OrchestratorRequest::new(Vendor::TCloud, ACCOUNT, regions(&[REGION])),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let order: Vec<ResourceType> = report.resources.iter().map(|s| s.resource_type).collect();
    assert_eq!(order, ResourceType::ALL.to_vec());
    assert_eq!(report.first_error().unwrap().kind(), ErrorKind::ProviderFatal);

    let skipped_by = |ty: ResourceType| match &report.summary(ty).unwrap().outcome {
        SyncOutcome::Skipped(SkipReason::DependencyFailed(dep)) => Some(*dep),
        _ => None,
    };
    assert!(report.summary(ResourceType::Vpc).unwrap().is_failed());
    assert_eq!(skipped_by(ResourceType::Subnet), Some(ResourceType::Vpc));
    assert_eq!(skipped_by(ResourceType::SecurityGroup), Some(ResourceType::Vpc));
    assert_eq!(skipped_by(ResourceType::RouteTable), Some(ResourceType::Vpc));
    assert_eq!(skipped_by(ResourceType::NetworkInterface), Some(ResourceType::Subnet));
    assert_eq!(skipped_by(ResourceType::Cvm), Some(ResourceType::Subnet));
    assert!(matches!(
        report.summary(ResourceType::Disk).unwrap().outcome,
        SyncOutcome::Synced
    ));
    assert_eq!(report.summary(ResourceType::Eip).unwrap().stats.created, 2);
}

#[tokio::test]
async fn test_multi_region_sync_and_relations() {
    let cvm = CloudResource::new(ResourceType::Cvm, "ins-1")
        .with_status("RUNNING")
        .with_relation(ResourceType::Disk, "disk-0")
        .with_relation(ResourceType::Disk, "disk-1")
        .with_relation(ResourceType::Eip, "eip-0");
    let provider = Arc::new(
        StaticProvider::new(Vendor::TCloud)
            .with_resources(ACCOUNT, REGION, resources(ResourceType::Disk, "disk", 2))
            .with_resources(ACCOUNT, REGION, resources(ResourceType::Eip, "eip", 1))
            .with_resources(ACCOUNT, REGION, [cvm])
            .with_resources(ACCOUNT, "ap-shanghai", resources(ResourceType::Disk, "sh-disk", 3)),
    );
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let cancel = CancellationToken::new();
    let request = OrchestratorRequest::new(
        Vendor::TCloud,
        ACCOUNT,
        regions(&[REGION, "ap-shanghai", REGION]),
    )
    .with_types([ResourceType::Cvm, ResourceType::Eip, ResourceType::Disk]);

    let report = orchestrator.sync(request.clone(), &cancel).await.unwrap();
    assert!(report.is_success());
    let disks = report.summary(ResourceType::Disk).unwrap();
    assert_eq!(disks.regions.len(), 2);
    assert_eq!(disks.stats.created, 5);
    assert_eq!(report.summary(ResourceType::Cvm).unwrap().stats.relations_added, 3);

    let owner = ResourceRef::new(ResourceType::Cvm, "ins-1");
    let edges = store.relations(Vendor::TCloud, ACCOUNT, &owner).await.unwrap();
    assert_eq!(edges.len(), 3);

    // Detaching in the cloud replaces the stored edge set
    provider.put_resources(
        ACCOUNT,
        REGION,
        [CloudResource::new(ResourceType::Cvm, "ins-1")
            .with_status("RUNNING")
            .with_relation(ResourceType::Disk, "disk-1")],
    );
    let report = orchestrator.sync(request, &cancel).await.unwrap();
    let cvm = report.summary(ResourceType::Cvm).unwrap();
    assert_eq!(cvm.stats.relations_removed, 2);

    let targets: Vec<String> = store
        .relations(Vendor::TCloud, ACCOUNT, &owner)
        .await
        .unwrap()
        .into_iter()
        .map(|edge| edge.to.cloud_id)
        .collect();
    assert_eq!(targets, vec!["disk-1"]);
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let provider = Arc::new(StaticProvider::new(Vendor::TCloud));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(&provider, &store, Duration::ZERO);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orchestrator
        .sync(
            OrchestratorRequest::new(Vendor::TCloud, ACCOUNT, regions(&[REGION])),
            &cancel,
        )
        .await
        .unwrap();
    assert!(report.resources.iter().all(|s| matches!(
        s.outcome,
        SyncOutcome::Skipped(SkipReason::Cancelled)
    )));
    assert_eq!(provider.list_calls(), 0);
}
