//! Status cascade behavior across entities

use opsync::model::{EntityStatus, GroupFilter, HostFilter};
use opsync::status::StatusEngine;
use opsync::storage::InventoryStore;
use pretty_assertions::assert_eq;

use super::helpers::*;

#[tokio::test]
async fn recompute_monitor_related_is_stable_under_repetition() {
    let (store, _reconciler, _events) = test_context();
    let engine = StatusEngine::new(store.clone());

    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let healthy = store
        .add_host(test_host(monitor_id, "healthy", Some("1")))
        .await
        .unwrap();
    let unmaterialized = store
        .add_host(test_host(monitor_id, "local-only", None))
        .await
        .unwrap();
    store
        .add_item(test_item(healthy, "cpu load", Some("1001")))
        .await
        .unwrap();

    engine.recompute_monitor_related(monitor_id).await.unwrap();
    let snapshot = |hosts: Vec<opsync::model::Host>| {
        hosts
            .into_iter()
            .map(|h| (h.id, h.status, h.health_score))
            .collect::<Vec<_>>()
    };
    let first = snapshot(
        store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await
            .unwrap(),
    );

    engine.recompute_monitor_related(monitor_id).await.unwrap();
    let second = snapshot(
        store
            .search_hosts(&HostFilter::for_monitor(monitor_id))
            .await
            .unwrap(),
    );

    assert_eq!(first, second);
    assert_eq!(
        store.get_host(healthy).await.unwrap().status,
        EntityStatus::Active
    );
    assert_eq!(
        store.get_host(unmaterialized).await.unwrap().status,
        EntityStatus::Error
    );
}

#[tokio::test]
async fn active_hosts_always_have_syncable_monitors() {
    let (store, _reconciler, _events) = test_context();
    let engine = StatusEngine::new(store.clone());

    // one syncable monitor, one disabled
    let active_monitor = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let mut disabled = test_monitor("http://127.0.0.1:1", Some("cached"));
    disabled.enabled = false;
    let disabled_monitor = store.add_monitor(disabled).await.unwrap();

    store
        .add_host(test_host(active_monitor, "a-1", Some("1")))
        .await
        .unwrap();
    store
        .add_host(test_host(disabled_monitor, "d-1", Some("2")))
        .await
        .unwrap();

    engine.recompute_monitor_related(active_monitor).await.unwrap();
    engine.recompute_monitor_related(disabled_monitor).await.unwrap();

    for host in store.search_hosts(&HostFilter::default()).await.unwrap() {
        if host.status == EntityStatus::Active {
            let monitor = store.get_monitor(host.monitor_id).await.unwrap();
            assert!(monitor.enabled);
            assert!(matches!(
                monitor.status,
                EntityStatus::Active | EntityStatus::Syncing
            ));
        }
    }
}

#[tokio::test]
async fn syncing_marker_is_overwritten_by_recompute() {
    let (store, _reconciler, _events) = test_context();
    let engine = StatusEngine::new(store.clone());

    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-1", Some("1")))
        .await
        .unwrap();

    engine.set_monitor_syncing(monitor_id).await.unwrap();
    engine.set_host_syncing(host_id).await.unwrap();
    assert_eq!(
        store.get_monitor(monitor_id).await.unwrap().status,
        EntityStatus::Syncing
    );

    engine.recompute_monitor_related(monitor_id).await.unwrap();

    assert_eq!(
        store.get_monitor(monitor_id).await.unwrap().status,
        EntityStatus::Active
    );
    assert_eq!(
        store.get_host(host_id).await.unwrap().status,
        EntityStatus::Active
    );
}

#[tokio::test]
async fn group_detail_aggregates_member_hosts() {
    let (store, reconciler, _events) = test_context();

    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let group_id = store
        .add_group(opsync::model::Group {
            id: 0,
            name: "core".to_string(),
            description: String::new(),
            monitor_id: Some(monitor_id),
            external_id: Some("2".to_string()),
            enabled: true,
            status: EntityStatus::Active,
            status_reason: None,
            health_score: 100,
            last_sync_at: None,
            external_source: String::new(),
        })
        .await
        .unwrap();

    let mut host_ids = Vec::new();
    for i in 0..12 {
        let mut host = test_host(monitor_id, &format!("web-{i}"), Some(&format!("ext-{i}")));
        host.group_id = Some(group_id);
        let id = store.add_host(host).await.unwrap();
        host_ids.push(id);
    }
    // two hosts in error, the rest active
    for id in &host_ids[..2] {
        store
            .update_host_status(*id, EntityStatus::Error)
            .await
            .unwrap();
    }
    for id in &host_ids[..4] {
        store
            .add_item(test_item(*id, "cpu load", Some("1")))
            .await
            .unwrap();
    }

    let detail = reconciler.group_detail(group_id, 3).await.unwrap();

    assert_eq!(detail.summary.total_hosts, 12);
    assert_eq!(detail.summary.error_hosts, 2);
    assert_eq!(detail.summary.active_hosts, 10);
    assert_eq!(detail.summary.total_items, 4);
    assert_eq!(detail.hosts.len(), 12);
    assert_eq!(detail.group.id, group_id);
}

#[tokio::test]
async fn group_status_error_clears_when_members_recover() {
    let (store, _reconciler, _events) = test_context();
    let engine = StatusEngine::new(store.clone());

    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let group_id = store
        .add_group(opsync::model::Group {
            id: 0,
            name: "core".to_string(),
            description: String::new(),
            monitor_id: Some(monitor_id),
            external_id: Some("2".to_string()),
            enabled: true,
            status: EntityStatus::Active,
            status_reason: None,
            health_score: 100,
            last_sync_at: None,
            external_source: String::new(),
        })
        .await
        .unwrap();
    let mut host = test_host(monitor_id, "web-1", Some("1"));
    host.group_id = Some(group_id);
    let host_id = store.add_host(host).await.unwrap();

    store
        .update_host_status(host_id, EntityStatus::Error)
        .await
        .unwrap();
    engine.recompute_group(group_id).await.unwrap();
    assert_eq!(
        store.get_group(group_id).await.unwrap().status,
        EntityStatus::Error
    );

    store
        .update_host_status(host_id, EntityStatus::Active)
        .await
        .unwrap();
    engine.recompute_group(group_id).await.unwrap();
    let group = store.get_group(group_id).await.unwrap();
    assert_eq!(group.status, EntityStatus::Active);
    assert_eq!(group.status_reason, None);
}

#[tokio::test]
async fn sites_follow_the_same_aggregation_rules() {
    let (store, _reconciler, _events) = test_context();
    let engine = StatusEngine::new(store.clone());

    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let site_id = store
        .add_site(opsync::model::Site {
            id: 0,
            name: "eu-west".to_string(),
            description: String::new(),
            monitor_id: Some(monitor_id),
            external_id: Some("9".to_string()),
            enabled: true,
            status: EntityStatus::Active,
            status_reason: None,
            last_sync_at: None,
        })
        .await
        .unwrap();

    let mut host = test_host(monitor_id, "web-1", Some("1"));
    host.site_id = Some(site_id);
    let host_id = store.add_host(host).await.unwrap();

    store
        .update_host_status(host_id, EntityStatus::Syncing)
        .await
        .unwrap();
    let status = engine.recompute_site(site_id).await.unwrap();
    assert_eq!(status, EntityStatus::Syncing);

    let groups = store.search_groups(&GroupFilter::default()).await.unwrap();
    assert!(groups.is_empty());
}
