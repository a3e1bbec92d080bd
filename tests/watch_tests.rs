/// Watch tests
///
/// Live delivery, replay from a resource version, and the ordering
/// guarantees between the two under concurrent writers.
/// Run with: cargo test --test watch_tests
mod common;

use std::collections::HashSet;
use std::time::Duration;

use catalogdb::{
    BroadcasterConfig, Context, CreateOptions, DeleteOptions, EventType, ListOptions,
    ResourceVersion, Subscription, UpdateOptions, WatchEvent,
};
use common::{cluster, report, storage, storage_with};
use futures::StreamExt;
use serde_json::json;

async fn next_event(sub: &mut Subscription) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out waiting for a watch event")
        .expect("watch ended early")
}

#[tokio::test]
async fn test_live_watch_sees_exactly_one_added() {
    let cluster = cluster(1);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    reports
        .create(&ctx, "cluster-a", None, report("before", "default"), &CreateOptions::default())
        .await
        .unwrap();

    let mut sub = reports
        .watch(&ctx, "cluster-a", Some("default"), &ListOptions::new())
        .await
        .unwrap();
    assert_eq!(sub.pending_replay(), 0);

    let created = reports
        .create(&ctx, "cluster-a", None, report("polr", "default"), &CreateOptions::default())
        .await
        .unwrap();

    let event = next_event(&mut sub).await;
    assert_eq!(event.event_type, EventType::Added);
    assert_eq!(*event.document, created);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_resource_version_zero_is_live_only() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    reports
        .create(&ctx, "cluster-a", None, report("old", "default"), &CreateOptions::default())
        .await
        .unwrap();

    let sub = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new().resource_version("0"))
        .await
        .unwrap();
    assert_eq!(sub.pending_replay(), 0);
}

#[tokio::test]
async fn test_replay_then_live_in_order() {
    let cluster = cluster(1);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    for name in ["a", "b", "c"] {
        reports
            .create(&ctx, "cluster-a", None, report(name, "default"), &CreateOptions::default())
            .await
            .unwrap();
    }

    let mut sub = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new().resource_version("1"))
        .await
        .unwrap();
    assert_eq!(sub.pending_replay(), 3);

    reports
        .create(&ctx, "cluster-a", None, report("d", "default"), &CreateOptions::default())
        .await
        .unwrap();

    let mut replayed = Vec::new();
    for _ in 0..3 {
        let event = next_event(&mut sub).await;
        assert_eq!(event.event_type, EventType::Added);
        replayed.push(event.document.name().to_string());
    }
    replayed.sort();
    assert_eq!(replayed, vec!["a", "b", "c"]);

    let live = next_event(&mut sub).await;
    assert_eq!(live.document.name(), "d");
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_replay_honors_not_older_than() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let mut versions = Vec::new();
    for name in ["a", "b", "c"] {
        let doc = reports
            .create(&ctx, "cluster-a", None, report(name, "default"), &CreateOptions::default())
            .await
            .unwrap();
        versions.push(doc.resource_version().unwrap());
    }

    let options = ListOptions::new()
        .resource_version(versions[1])
        .resource_version_match(catalogdb::ResourceVersionMatch::NotOlderThan);
    let mut sub = reports.watch(&ctx, "cluster-a", None, &options).await.unwrap();

    let mut names = vec![
        next_event(&mut sub).await.document.name().to_string(),
        next_event(&mut sub).await.document.name().to_string(),
    ];
    names.sort();
    assert_eq!(names, vec!["b", "c"]);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_replay_honors_exact() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let mut versions = Vec::new();
    for name in ["a", "b", "c"] {
        let doc = reports
            .create(&ctx, "cluster-a", None, report(name, "default"), &CreateOptions::default())
            .await
            .unwrap();
        versions.push(doc.resource_version().unwrap());
    }

    let options = ListOptions::new()
        .resource_version(versions[1])
        .resource_version_match(catalogdb::ResourceVersionMatch::Exact);
    let mut sub = reports.watch(&ctx, "cluster-a", None, &options).await.unwrap();
    assert_eq!(sub.pending_replay(), 1);

    let replayed = next_event(&mut sub).await;
    assert_eq!(replayed.event_type, EventType::Added);
    assert_eq!(replayed.document.name(), "b");
    assert!(sub.try_recv().is_none());

    reports
        .create(&ctx, "cluster-a", None, report("d", "default"), &CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(next_event(&mut sub).await.document.name(), "d");
}

#[tokio::test]
async fn test_cluster_scoped_watch_ignores_namespace() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("ClusterPolicyReport").unwrap();
    let ctx = Context::background();

    reports
        .create(&ctx, "cluster-a", None, report("cpolr-a", ""), &CreateOptions::default())
        .await
        .unwrap();

    let mut sub = reports
        .watch(&ctx, "cluster-a", Some("team-a"), &ListOptions::new().resource_version("1"))
        .await
        .unwrap();
    assert_eq!(sub.pending_replay(), 1);
    assert_eq!(next_event(&mut sub).await.document.name(), "cpolr-a");

    reports
        .create(&ctx, "cluster-a", None, report("cpolr-b", ""), &CreateOptions::default())
        .await
        .unwrap();
    let live = next_event(&mut sub).await;
    assert_eq!(live.event_type, EventType::Added);
    assert_eq!(live.document.name(), "cpolr-b");

    let mut live_only = reports
        .watch(&ctx, "cluster-a", Some("team-a"), &ListOptions::new())
        .await
        .unwrap();
    reports
        .delete(&ctx, "cluster-a", "cpolr-a", None, &DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(next_event(&mut live_only).await.event_type, EventType::Deleted);
}

#[tokio::test]
async fn test_dropped_watches_are_released() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    for _ in 0..100 {
        let sub = reports
            .watch(&ctx, "quiet-tenant", None, &ListOptions::new())
            .await
            .unwrap();
        drop(sub);
    }
    for i in 0..10 {
        reports
            .create(&ctx, "busy", None, report(&format!("polr-{}", i), "default"), &CreateOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(reports.broadcaster().subscriber_count().await, 0);
}

#[tokio::test]
async fn test_update_and_delete_events() {
    let cluster = cluster(1);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let mut sub = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();

    let created = reports
        .create(&ctx, "cluster-a", None, report("polr", "default"), &CreateOptions::default())
        .await
        .unwrap();
    let (updated, was_created) = reports
        .update(
            &ctx,
            "cluster-a",
            None,
            created.clone().with_field("summary", json!({"pass": 5})),
            &UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert!(!was_created);
    reports
        .delete(&ctx, "cluster-a", "polr", Some("default"), &DeleteOptions::default())
        .await
        .unwrap();

    let events = vec![
        next_event(&mut sub).await,
        next_event(&mut sub).await,
        next_event(&mut sub).await,
    ];
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::Added, EventType::Modified, EventType::Deleted]);
    assert_eq!(*events[1].document, updated);

    let versions: Vec<ResourceVersion> = events
        .iter()
        .map(|e| e.document.resource_version().unwrap())
        .collect();
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_failed_and_dry_run_mutations_publish_nothing() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    reports
        .create(&ctx, "cluster-a", None, report("polr", "default"), &CreateOptions::default())
        .await
        .unwrap();
    let mut sub = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();

    let duplicate = reports
        .create(&ctx, "cluster-a", None, report("polr", "default"), &CreateOptions::default())
        .await;
    assert!(duplicate.unwrap_err().is_already_exists());

    reports
        .create(
            &ctx,
            "cluster-a",
            None,
            report("dry", "default"),
            &CreateOptions { dry_run: true },
        )
        .await
        .unwrap();
    reports
        .delete(&ctx, "cluster-a", "ghost", Some("default"), &DeleteOptions::default())
        .await
        .unwrap();
    reports
        .delete(&ctx, "cluster-a", "polr", Some("default"), &DeleteOptions { dry_run: true })
        .await
        .unwrap();

    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_watch_filters_by_tenant_namespace_and_labels() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let mut sub = reports
        .watch(
            &ctx,
            "cluster-a",
            Some("team-a"),
            &ListOptions::new().label_selector("app=web"),
        )
        .await
        .unwrap();

    let opts = CreateOptions::default();
    reports
        .create(&ctx, "cluster-b", None, report("other-tenant", "team-a").with_label("app", "web"), &opts)
        .await
        .unwrap();
    reports
        .create(&ctx, "cluster-a", None, report("other-ns", "team-b").with_label("app", "web"), &opts)
        .await
        .unwrap();
    reports
        .create(&ctx, "cluster-a", None, report("other-app", "team-a").with_label("app", "db"), &opts)
        .await
        .unwrap();
    reports
        .create(&ctx, "cluster-a", None, report("wanted", "team-a").with_label("app", "web"), &opts)
        .await
        .unwrap();

    assert_eq!(next_event(&mut sub).await.document.name(), "wanted");
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_invalid_resource_version_is_rejected() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();

    let err = reports
        .watch(
            &Context::background(),
            "cluster-a",
            None,
            &ListOptions::new().resource_version("yesterday"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, catalogdb::StoreError::InvalidArgument(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replay_and_live_never_overlap_under_concurrent_writes() {
    const WRITES: usize = 60;

    let cluster = cluster(1);
    let storage = storage(&cluster).await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let writer = {
        let reports = reports.clone();
        tokio::spawn(async move {
            for i in 0..WRITES {
                reports
                    .create(
                        &Context::background(),
                        "cluster-a",
                        None,
                        report(&format!("polr-{:03}", i), "default"),
                        &CreateOptions::default(),
                    )
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    while reports.store().list(&ctx, "cluster-a", None).await.unwrap().len() < WRITES / 4 {
        tokio::task::yield_now().await;
    }
    let mut sub = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new().resource_version("1"))
        .await
        .unwrap();
    let replayed = sub.pending_replay();
    writer.await.unwrap();

    let mut seen = HashSet::new();
    let mut live_versions = Vec::new();
    let mut max_replayed = ResourceVersion::BASELINE;
    for i in 0..WRITES {
        let event = next_event(&mut sub).await;
        assert_eq!(event.event_type, EventType::Added);
        assert!(seen.insert(event.document.name().to_string()), "duplicate event");

        let version = event.document.resource_version().unwrap();
        if i < replayed {
            max_replayed = max_replayed.max(version);
        } else {
            live_versions.push(version);
        }
    }

    assert_eq!(seen.len(), WRITES);
    assert!(sub.try_recv().is_none());
    assert!(live_versions.windows(2).all(|w| w[0] < w[1]));
    if let Some(first_live) = live_versions.first() {
        assert!(*first_live > max_replayed);
    }
}

#[tokio::test]
async fn test_slow_watcher_is_disconnected() {
    let cluster = cluster(0);
    let storage = storage_with(
        &cluster,
        BroadcasterConfig {
            capacity: 2,
            slow_consumer_timeout: Some(Duration::from_millis(10)),
        },
    )
    .await;
    let reports = storage.kind("PolicyReport").unwrap();
    let ctx = Context::background();

    let mut slow = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();
    let mut fast = reports
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();

    for i in 0..4 {
        reports
            .create(&ctx, "cluster-a", None, report(&format!("polr-{}", i), "default"), &CreateOptions::default())
            .await
            .unwrap();
        next_event(&mut fast).await;
    }

    let drained: Vec<WatchEvent> = (&mut slow).collect().await;
    assert_eq!(drained.len(), 2);
    assert_eq!(reports.broadcaster().subscriber_count().await, 1);
}

#[tokio::test]
async fn test_shutdown_ends_every_watch() {
    let cluster = cluster(0);
    let storage = storage(&cluster).await;
    let ctx = Context::background();

    let mut namespaced = storage
        .kind("PolicyReport")
        .unwrap()
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();
    let mut cluster_scoped = storage
        .kind("ClusterPolicyReport")
        .unwrap()
        .watch(&ctx, "cluster-a", None, &ListOptions::new())
        .await
        .unwrap();

    storage.shutdown().await;

    assert!(namespaced.recv().await.is_none());
    assert!(cluster_scoped.recv().await.is_none());
}
