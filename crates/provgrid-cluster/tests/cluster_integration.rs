//! Cluster integration tests.
//!
//! Multi-node scenarios over in-memory and redb storage: concurrent
//! updates, healing episodes, broadcast queries and round-robin
//! scheduling through the facade.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::Semaphore;

use provgrid_cluster::{Cluster, ClusterError, CreationStatus, Node, NodeUpdate, SchedulingIntent};
use provgrid_core::ClusterSettings;
use provgrid_health::{BoxFuture, FixedHealer, Healer};
use provgrid_scheduler::RoundRobinScheduler;
use provgrid_state::{MemoryStorage, RedbStorage, Storage, StorageResult};

fn memory_cluster(addrs: &[&str]) -> Cluster {
    let cluster = Cluster::new(Arc::new(MemoryStorage::new()))
        .with_scheduler(Arc::new(RoundRobinScheduler::new()));
    cluster
        .register_all(addrs.iter().map(|a| Node::new(*a)))
        .unwrap();
    cluster
}

fn addresses(nodes: &[Node]) -> Vec<String> {
    nodes.iter().map(|n| n.address.clone()).collect()
}

/// Memory storage whose writes take a while, so lock holders overlap.
struct SlowStorage {
    inner: MemoryStorage,
    write_delay: Duration,
}

impl Storage for SlowStorage {
    fn store_node(&self, node: &Node) -> StorageResult<()> {
        self.inner.store_node(node)
    }

    fn retrieve_node(&self, address: &str) -> StorageResult<Node> {
        self.inner.retrieve_node(address)
    }

    fn retrieve_nodes(&self) -> StorageResult<Vec<Node>> {
        self.inner.retrieve_nodes()
    }

    fn update_node(&self, node: &Node) -> StorageResult<()> {
        thread::sleep(self.write_delay);
        self.inner.update_node(node)
    }

    fn remove_node(&self, address: &str) -> StorageResult<()> {
        self.inner.remove_node(address)
    }
}

/// Healer that parks until the test lets it go.
struct BlockingHealer {
    calls: AtomicUsize,
    entered: Semaphore,
    release: Semaphore,
    disable_for: Duration,
}

impl BlockingHealer {
    fn new(disable_for: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            entered: Semaphore::new(0),
            release: Semaphore::new(0),
            disable_for,
        }
    }

    async fn wait_entered(&self) {
        self.entered.acquire().await.unwrap().forget();
    }
}

impl Healer for BlockingHealer {
    fn handle_error<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, Duration> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.add_permits(1);
            self.release.acquire().await.unwrap().forget();
            self.disable_for
        })
    }
}

/// Healer that records how many episodes overlap.
#[derive(Default)]
struct CountingHealer {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Healer for CountingHealer {
    fn handle_error<'a>(&'a self, _node: &'a Node) -> BoxFuture<'a, Duration> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Duration::ZERO
        })
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Debug, thiserror::Error)]
enum ContainerError {
    #[error("no such container")]
    Missing,
    #[error("daemon refused: {0}")]
    Refused(&'static str),
}

impl provgrid_cluster::NodeOpError for ContainerError {
    fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::Missing)
    }
}

// ── Registry ────────────────────────────────────────────────────

#[test]
fn duplicate_registration_leaves_set_unchanged() {
    let cluster = memory_cluster(&["http://a:4243", "http://b:4243"]);
    let err = cluster.register(Node::new("http://a:4243")).unwrap_err();

    assert!(matches!(err, ClusterError::DuplicateAddress(_)));
    assert_eq!(
        addresses(&cluster.unfiltered_nodes().unwrap()),
        ["http://a:4243", "http://b:4243"]
    );
}

#[test]
fn metadata_merge_deletes_empty_values() {
    let cluster = memory_cluster(&[]);
    cluster
        .register(Node::new("n").with_metadata("k1", "v1").with_metadata("k2", "v2"))
        .unwrap();

    cluster
        .update_node(
            NodeUpdate::new("n")
                .set("k1", "")
                .set("k2", "v9")
                .set("k3", "v10"),
        )
        .unwrap();

    let mut metadata: Vec<_> = cluster.node("n").unwrap().metadata.into_iter().collect();
    metadata.sort();
    assert_eq!(
        metadata,
        [
            ("k2".to_string(), "v9".to_string()),
            ("k3".to_string(), "v10".to_string())
        ]
    );
}

#[test]
fn error_status_cannot_regress() {
    let cluster = memory_cluster(&[]);
    cluster
        .register(Node::new("n").with_status(CreationStatus::Error))
        .unwrap();

    let err = cluster
        .update_node(NodeUpdate::new("n").status(CreationStatus::Pending))
        .unwrap_err();
    assert!(matches!(err, ClusterError::InvalidStatusTransition { .. }));
    assert_eq!(
        cluster.node("n").unwrap().creation_status,
        CreationStatus::Error
    );
}

// ── Concurrent Updates ──────────────────────────────────────────

#[test]
fn concurrent_updates_contend_without_deadlock() {
    let storage = Arc::new(SlowStorage {
        inner: MemoryStorage::new(),
        write_delay: Duration::from_millis(20),
    });
    let cluster = Cluster::new(storage);
    cluster.register(Node::new("n")).unwrap();

    let updaters = 100;
    let barrier = Arc::new(Barrier::new(updaters));
    let handles: Vec<_> = (0..updaters)
        .map(|i| {
            let cluster = cluster.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let key = format!("key{i}");
                (key.clone(), cluster.update_node(NodeUpdate::new("n").set(key, "v")))
            })
        })
        .collect();

    let mut persisted = vec![];
    let mut contended = 0;
    for handle in handles {
        match handle.join().unwrap() {
            (key, Ok(_)) => persisted.push(key),
            (_, Err(ClusterError::LockContention(_))) => contended += 1,
            (key, Err(e)) => panic!("unexpected error for {key}: {e}"),
        }
    }

    assert!(contended >= 1, "no update was rejected");
    assert!(!persisted.is_empty(), "no update went through");
    assert_eq!(persisted.len() + contended, updaters);

    let node = cluster.node("n").unwrap();
    assert_eq!(node.metadata.len(), persisted.len());
    for key in &persisted {
        assert_eq!(node.metadata[key], "v");
    }
}

// ── Healing ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healing_node_is_hidden_and_locked() {
    let healer = Arc::new(BlockingHealer::new(Duration::from_secs(60)));
    let cluster = memory_cluster(&["a", "b"]).with_healer(healer.clone());

    let episode = {
        let cluster = cluster.clone();
        tokio::spawn(async move { cluster.handle_node_error("a", "connection refused", true).await })
    };
    healer.wait_entered().await;

    let node = cluster.node("a").unwrap();
    assert!(node.is_healing());
    assert_eq!(node.healing.reason, "connection refused");
    assert!(node.healing.locked_until.unwrap() > Utc::now());
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["b"]);
    assert_eq!(cluster.unfiltered_nodes().unwrap().len(), 2);
    assert!(matches!(
        cluster.update_node(NodeUpdate::new("a").set("x", "y")),
        Err(ClusterError::LockContention(_))
    ));

    healer.release.add_permits(1);
    episode.await.unwrap().unwrap();

    let node = cluster.node("a").unwrap();
    assert!(!node.is_healing());
    assert_eq!(node.failure_count, 1);
    let until = node.disabled_until().unwrap();
    assert!(until > Utc::now() + TimeDelta::seconds(50));
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["b"]);
    assert_eq!(healer.calls.load(Ordering::SeqCst), 1);

    cluster.update_node(NodeUpdate::new("a").set("x", "y")).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn healing_one_node_does_not_block_another() {
    let healer = Arc::new(BlockingHealer::new(Duration::ZERO));
    let cluster = memory_cluster(&["a", "b", "c"]).with_healer(healer.clone());

    let episodes: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|addr| {
            let cluster = cluster.clone();
            tokio::spawn(async move { cluster.handle_node_error(addr, "boom", true).await })
        })
        .collect();

    // Both healers are running at once.
    healer.wait_entered().await;
    healer.wait_entered().await;
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["c"]);
    cluster.update_node(NodeUpdate::new("c").set("x", "y")).unwrap();

    healer.release.add_permits(2);
    for episode in episodes {
        episode.await.unwrap().unwrap();
    }
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_serialize() {
    let healer = Arc::new(CountingHealer::default());
    let cluster = memory_cluster(&["a"]).with_healer(healer.clone());

    let reports: Vec<_> = (0..8)
        .map(|i| {
            let cluster = cluster.clone();
            let counted = i % 3 != 0;
            tokio::spawn(async move {
                cluster
                    .handle_node_error("a", format!("failure {i}"), counted)
                    .await
            })
        })
        .collect();
    for report in reports {
        report.await.unwrap().unwrap();
    }

    assert_eq!(healer.calls.load(Ordering::SeqCst), 8);
    assert_eq!(healer.max_in_flight.load(Ordering::SeqCst), 1);

    let node = cluster.node("a").unwrap();
    // i = 0, 3, 6 do not count.
    assert_eq!(node.failure_count, 5);
    assert!(!node.is_healing());
    assert!(node.last_error().unwrap().starts_with("failure "));
}

#[tokio::test]
async fn expired_disable_makes_node_available_again() {
    let cluster = memory_cluster(&["a"]);
    let mut node = cluster.node("a").unwrap();
    node.set_disabled_until(Utc::now() + TimeDelta::seconds(2));
    cluster.unregister("a").unwrap();
    cluster.register(node).unwrap();
    assert!(cluster.nodes().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["a"]);
}

// ── Broadcast ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_returns_the_single_hit() {
    let cluster = memory_cluster(&["a", "b", "c", "d"]);
    let value = cluster
        .run_on_nodes(
            |node| async move {
                match node.address.as_str() {
                    "c" => Ok(42),
                    _ => Err(ContainerError::Missing),
                }
            },
            &[],
        )
        .await
        .unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn broadcast_all_missing() {
    let cluster = memory_cluster(&["a", "b"]);
    let result = cluster
        .run_on_nodes(|_node| async { Err::<(), _>(ContainerError::Missing) }, &[])
        .await;
    assert!(matches!(result, Err(ClusterError::NotFoundAcrossNodes)));
}

#[tokio::test]
async fn broadcast_wraps_real_failures() {
    let cluster = memory_cluster(&["a", "b"]);
    let err = cluster
        .run_on_nodes(
            |node| async move {
                if node.address == "b" {
                    Err::<(), _>(ContainerError::Refused("tls handshake"))
                } else {
                    Err(ContainerError::Missing)
                }
            },
            &[],
        )
        .await
        .unwrap_err();

    let node_err = match err {
        ClusterError::NodeOperationFailed(e) => e,
        other => panic!("expected a node failure, got {other}"),
    };
    assert_eq!(node_err.address(), "b");
    assert_eq!(
        node_err.to_string(),
        "error in node \"b\": daemon refused: tls handshake"
    );
    assert!(matches!(
        node_err.base_error().downcast_ref::<ContainerError>(),
        Some(ContainerError::Refused(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_honours_timeout() {
    let cluster = memory_cluster(&["a", "b"]).with_config(ClusterSettings {
        broadcast_timeout: Some(Duration::from_millis(50)),
        ..ClusterSettings::default()
    });

    let started = tokio::time::Instant::now();
    let result = cluster
        .run_on_nodes(
            |_node| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ContainerError>(())
            },
            &[],
        )
        .await;
    assert!(matches!(result, Err(ClusterError::NotFoundAcrossNodes)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn broadcast_to_explicit_addresses_skips_storage() {
    let cluster = memory_cluster(&[]);
    let targets = vec!["http://x:4243".to_string(), "http://y:4243".to_string()];

    let found = cluster
        .run_on_nodes(
            |node| async move {
                if node.address == "http://y:4243" {
                    Ok(node.address)
                } else {
                    Err(ContainerError::Missing)
                }
            },
            &targets,
        )
        .await
        .unwrap();
    assert_eq!(found, "http://y:4243");
    assert!(cluster.unfiltered_nodes().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_cancels_losers() {
    let cluster = memory_cluster(&["fast", "slow-1", "slow-2"]);
    let finished = Arc::new(AtomicUsize::new(0));

    let counter = finished.clone();
    let value = cluster
        .run_on_nodes(
            move |node| {
                let counter = counter.clone();
                async move {
                    if node.address != "fast" {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ContainerError>(node.address)
                }
            },
            &[],
        )
        .await
        .unwrap();
    assert_eq!(value, "fast");

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broadcast_treats_panics_as_missing() {
    let cluster = memory_cluster(&["a", "b"]);
    let result = cluster
        .run_on_nodes(
            |node| async move {
                if node.address == "a" {
                    panic!("lookup crashed");
                }
                Err::<(), _>(ContainerError::Missing)
            },
            &[],
        )
        .await;
    assert!(matches!(result, Err(ClusterError::NotFoundAcrossNodes)));
}

// ── Per-node Operations ─────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_operation_heals_node_in_background() {
    let cluster = memory_cluster(&["a", "b"])
        .with_healer(Arc::new(FixedHealer::new(Duration::from_secs(60))));

    let err = cluster
        .run_on_node("a", |_node| async {
            Err::<(), _>(ContainerError::Refused("connection reset"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NodeOperationFailed(_)));

    wait_until(|| {
        let node = cluster.node("a").unwrap();
        node.failure_count == 1 && !node.is_healing()
    })
    .await;

    let node = cluster.node("a").unwrap();
    assert_eq!(node.last_error(), Some("daemon refused: connection reset"));
    assert!(node.disabled_until().is_some());
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_operation_clears_failures() {
    let cluster = memory_cluster(&["a"]);
    cluster.handle_node_error("a", "boom", true).await.unwrap();
    assert_eq!(cluster.node("a").unwrap().failure_count, 1);

    let out = cluster
        .run_on_node("a", |node| async move { Ok::<_, io::Error>(node.address) })
        .await
        .unwrap();
    assert_eq!(out, "a");

    let node = cluster.node("a").unwrap();
    assert_eq!(node.failure_count, 0);
    assert!(node.last_error().is_none());
}

// ── Scheduling ──────────────────────────────────────────────────

#[test]
fn round_robin_through_the_facade() {
    let cluster = memory_cluster(&["A", "B"]);
    let intent = SchedulingIntent::new("container");
    let next = || cluster.schedule(&intent, None).unwrap().address;

    assert_eq!([next(), next(), next()], ["A", "B", "A"]);

    cluster.unregister("A").unwrap();
    assert_eq!([next(), next()], ["B", "B"]);

    cluster.unregister("B").unwrap();
    assert!(matches!(
        cluster.schedule(&intent, None),
        Err(ClusterError::NoNodesAvailable)
    ));
}

#[tokio::test]
async fn scheduler_skips_disabled_nodes() {
    let cluster = memory_cluster(&["A", "B", "C"])
        .with_healer(Arc::new(FixedHealer::new(Duration::from_secs(60))));
    cluster.handle_node_error("B", "down", true).await.unwrap();

    let intent = SchedulingIntent::new("container");
    for _ in 0..6 {
        assert_ne!(cluster.schedule(&intent, None).unwrap().address, "B");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_run_moves_past_failing_node() {
    let cluster = memory_cluster(&["a", "b", "c"]);
    let (node, value) = cluster
        .run_on_scheduled(&SchedulingIntent::new("box"), None, |node| async move {
            if node.address == "a" {
                Err(ContainerError::Refused("out of disk"))
            } else {
                Ok(format!("box on {}", node.address))
            }
        })
        .await
        .unwrap();

    assert_ne!(node.address, "a");
    assert_eq!(value, format!("box on {}", node.address));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduled_run_gives_up_after_configured_attempts() {
    let cluster = memory_cluster(&["a", "b", "c"]).with_config(ClusterSettings {
        schedule_attempts: 3,
        ..ClusterSettings::default()
    });
    let calls = AtomicUsize::new(0);

    let err = cluster
        .run_on_scheduled(&SchedulingIntent::new("box"), None, |_node| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ContainerError::Refused("quota exceeded")) }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::NodeOperationFailed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

// ── Persistence ─────────────────────────────────────────────────

#[test]
fn registry_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.redb");

    {
        let cluster = Cluster::new(Arc::new(RedbStorage::open(&path).unwrap()));
        cluster
            .register_all([Node::new("c"), Node::new("a"), Node::new("b")])
            .unwrap();
        cluster
            .update_node(NodeUpdate::new("a").set("pool", "east"))
            .unwrap();
    }

    let cluster = Cluster::new(Arc::new(RedbStorage::open(&path).unwrap()))
        .with_scheduler(Arc::new(RoundRobinScheduler::new()));
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["c", "a", "b"]);
    assert_eq!(cluster.node("a").unwrap().metadata["pool"], "east");
    assert_eq!(
        cluster
            .schedule(&SchedulingIntent::new("box"), None)
            .unwrap()
            .address,
        "c"
    );
}

#[test]
fn healing_left_by_a_crash_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nodes.redb");

    {
        let storage = RedbStorage::open(&path).unwrap();
        let mut crashed = Node::new("a");
        crashed.start_healing("daemon unreachable", Utc::now() - TimeDelta::minutes(1));
        storage.store_node(&crashed).unwrap();
        storage.store_node(&Node::new("b")).unwrap();
    }

    let cluster = Cluster::new(Arc::new(RedbStorage::open(&path).unwrap()));
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["b"]);

    assert_eq!(cluster.recover_stale_healing().unwrap(), ["a"]);
    assert_eq!(addresses(&cluster.nodes().unwrap()), ["a", "b"]);
}
