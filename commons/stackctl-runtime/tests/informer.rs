use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use stackctl_runtime::{
    Informer, MemoryStore, ResourceEvent, ResourceKey, wait_for_cache_sync,
};
use tokio_util::sync::CancellationToken;

fn deployment(name: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn replicas(d: &Deployment) -> i32 {
    d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

#[derive(Debug, PartialEq)]
enum Seen {
    Added(String),
    Updated(String, i32, i32),
    Deleted(String),
    Tombstone(String),
}

fn start(
    backing: &MemoryStore<Deployment>,
    resync: Option<Duration>,
) -> (Arc<Informer<Deployment>>, flume::Receiver<Seen>, CancellationToken) {
    let informer = Arc::new(
        Informer::new(Arc::new(backing.clone()))
            .with_namespace(Some("ns".into()))
            .with_resync(resync),
    );
    let (tx, rx) = flume::unbounded();
    informer.add_event_handler(move |ev| {
        let seen = match ev {
            ResourceEvent::Added(o) => Seen::Added(o.name_any()),
            ResourceEvent::Updated { old, new } => {
                Seen::Updated(new.name_any(), replicas(&old), replicas(&new))
            }
            ResourceEvent::Deleted(o) => Seen::Deleted(o.name_any()),
            ResourceEvent::Tombstone(t) => Seen::Tombstone(t.key.name.clone()),
        };
        let _ = tx.send(seen);
    });
    let cancel = CancellationToken::new();
    let inf = informer.clone();
    let token = cancel.clone();
    tokio::spawn(async move { inf.run(token).await });
    (informer, rx, cancel)
}

async fn next(rx: &flume::Receiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
        .await
        .expect("timed out waiting for event")
        .expect("handler dropped")
}

#[test_log::test(tokio::test)]
async fn initial_list_then_watch_events() {
    let backing = MemoryStore::<Deployment>::new();
    backing.create_object("ns", &deployment("a", 1)).unwrap();
    backing.create_object("elsewhere", &deployment("x", 1)).unwrap();

    let (informer, rx, cancel) = start(&backing, None);
    assert!(
        wait_for_cache_sync(&cancel, Duration::from_secs(5), &[&*informer]).await
    );
    assert_eq!(next(&rx).await, Seen::Added("a".into()));

    let mut a = backing.get_object("ns", "a").unwrap();
    a.spec.get_or_insert_with(DeploymentSpec::default).replicas = Some(2);
    backing.update_object("ns", &a).unwrap();
    assert_eq!(next(&rx).await, Seen::Updated("a".into(), 1, 2));

    backing.delete("ns", "a").unwrap();
    assert_eq!(next(&rx).await, Seen::Deleted("a".into()));

    assert!(informer.store().is_empty().await);
    cancel.cancel();
}

#[test_log::test(tokio::test)]
async fn relist_reports_missed_deletes_as_tombstones() {
    let backing = MemoryStore::<Deployment>::new();
    backing.create_object("ns", &deployment("keep", 1)).unwrap();
    backing.create_object("gone", &deployment("gone", 1)).unwrap();
    backing.create_object("ns", &deployment("gone", 1)).unwrap();

    let (informer, rx, cancel) = start(&backing, None);
    assert!(
        wait_for_cache_sync(&cancel, Duration::from_secs(5), &[&*informer]).await
    );
    let mut initial = vec![next(&rx).await, next(&rx).await];
    initial.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(
        initial,
        vec![Seen::Added("gone".into()), Seen::Added("keep".into())]
    );

    // drop the watch, then delete while nobody is listening
    backing.close_watches();
    backing.delete("ns", "gone").unwrap();

    let mut after = vec![next(&rx).await, next(&rx).await];
    after.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(
        after,
        vec![Seen::Tombstone("gone".into()), Seen::Updated("keep".into(), 1, 1)]
    );
    assert!(
        informer
            .store()
            .get(&ResourceKey::new("ns", "gone"))
            .await
            .is_none()
    );
    cancel.cancel();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn resync_redelivers_cached_objects() {
    let backing = MemoryStore::<Deployment>::new();
    backing.create_object("ns", &deployment("a", 7)).unwrap();

    let (informer, rx, cancel) = start(&backing, Some(Duration::from_secs(30)));
    assert!(
        wait_for_cache_sync(&cancel, Duration::from_secs(5), &[&*informer]).await
    );
    assert_eq!(next(&rx).await, Seen::Added("a".into()));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(next(&rx).await, Seen::Updated("a".into(), 7, 7));
    cancel.cancel();
}

#[test_log::test(tokio::test)]
async fn cache_sync_gives_up_when_cancelled() {
    let backing = MemoryStore::<Deployment>::new();
    let informer = Informer::new(Arc::new(backing));
    let cancel = CancellationToken::new();
    cancel.cancel();
    // never started, so it can only end through cancellation
    assert!(
        !wait_for_cache_sync(&cancel, Duration::from_secs(5), &[&informer]).await
    );
}
