//! End-to-end cluster tests over real TCP on loopback.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use raft_cluster::{ClusterConfig, ClusterError, ClusterManager, FsmError, StateMachine};

/// Records every applied command so tests can compare node histories.
struct RecordingFsm {
    applied: Mutex<Vec<u64>>,
}

impl RecordingFsm {
    fn new() -> Arc<Self> {
        Arc::new(RecordingFsm {
            applied: Mutex::new(Vec::new()),
        })
    }

    fn applied(&self) -> Vec<u64> {
        self.applied.lock().unwrap().clone()
    }
}

impl StateMachine for RecordingFsm {
    fn apply(&self, command: &[u8]) -> Result<(), FsmError> {
        let value: u64 =
            bincode::deserialize(command).map_err(|e| FsmError::Decode(e.to_string()))?;
        self.applied.lock().unwrap().push(value);
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>, FsmError> {
        bincode::serialize(&*self.applied.lock().unwrap())
            .map_err(|e| FsmError::Encode(e.to_string()))
    }

    fn restore(&self, snapshot: &[u8]) -> Result<(), FsmError> {
        let values: Vec<u64> =
            bincode::deserialize(snapshot).map_err(|e| FsmError::Decode(e.to_string()))?;
        *self.applied.lock().unwrap() = values;
        Ok(())
    }
}

fn command(value: u64) -> Vec<u8> {
    bincode::serialize(&value).unwrap()
}

/// Reserves `n` distinct loopback addresses.
fn free_addrs(n: usize) -> Vec<String> {
    let listeners: Vec<_> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().to_string())
        .collect()
}

fn test_config(bind: &str, peers: &[String]) -> ClusterConfig {
    let mut config = ClusterConfig::new(bind.to_string(), bind.to_string(), peers.to_vec());
    config.heartbeat_timeout = Duration::from_millis(150);
    config.election_timeout = Duration::from_millis(150);
    config.snapshot_interval = Duration::from_secs(3600);
    config.snapshot_threshold = 100_000;
    config
}

async fn start_node(
    bind: &str,
    peers: &[String],
    config: Option<ClusterConfig>,
) -> (Arc<ClusterManager>, Arc<RecordingFsm>) {
    let fsm = RecordingFsm::new();
    let config = config.unwrap_or_else(|| test_config(bind, peers));
    let manager = ClusterManager::start(config, fsm.clone()).await.unwrap();
    (manager, fsm)
}

/// Polls `predicate` until it holds or the deadline passes.
async fn eventually(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    predicate()
}

#[tokio::test]
async fn single_node_elects_itself_and_applies() {
    let addrs = free_addrs(1);
    let (manager, fsm) = start_node(&addrs[0], &addrs, None).await;

    let leader = manager
        .wait_for_leader(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(leader, addrs[0]);
    assert!(manager.is_leader());
    assert_eq!(manager.state(), "Leader");

    for value in 1..=3 {
        manager.apply(command(value)).await.unwrap();
    }
    assert_eq!(fsm.applied(), vec![1, 2, 3]);

    manager.shutdown().await;
}

#[tokio::test]
async fn three_nodes_agree_on_the_command_order() {
    let addrs = free_addrs(3);
    let mut nodes = Vec::new();
    for addr in &addrs {
        nodes.push(start_node(addr, &addrs, None).await);
    }

    let leader_addr = nodes[0]
        .0
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();
    let leader = nodes
        .iter()
        .find(|(m, _)| m.node_id() == leader_addr)
        .expect("leader must be a cluster member");

    for value in 1..=5 {
        leader.0.apply(command(value)).await.unwrap();
    }

    let expected: Vec<u64> = (1..=5).collect();
    let converged = eventually(Duration::from_secs(10), || {
        nodes.iter().all(|(_, fsm)| fsm.applied() == expected)
    })
    .await;
    assert!(converged, "all nodes should apply the same command sequence");

    for (manager, _) in &nodes {
        manager.shutdown().await;
    }
}

#[tokio::test]
async fn followers_reject_apply() {
    let addrs = free_addrs(3);
    let mut nodes = Vec::new();
    for addr in &addrs {
        nodes.push(start_node(addr, &addrs, None).await);
    }

    let leader_addr = nodes[0]
        .0
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();

    // Every node must eventually learn who leads before we probe followers.
    for (manager, _) in &nodes {
        manager.wait_for_leader(Duration::from_secs(10)).await.unwrap();
    }

    let follower = nodes
        .iter()
        .find(|(m, _)| m.node_id() != leader_addr)
        .unwrap();
    let err = follower.0.apply(command(7)).await.unwrap_err();
    assert!(matches!(err, ClusterError::NotLeader { .. }));

    for (manager, _) in &nodes {
        manager.shutdown().await;
    }
}

#[tokio::test]
async fn surviving_nodes_elect_a_new_leader_after_failover() {
    let addrs = free_addrs(3);
    let mut nodes = Vec::new();
    for addr in &addrs {
        nodes.push(start_node(addr, &addrs, None).await);
    }

    let first_leader = nodes[0]
        .0
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();

    let leader_pos = nodes
        .iter()
        .position(|(m, _)| m.node_id() == first_leader)
        .unwrap();
    let (old_leader, _) = nodes.remove(leader_pos);
    old_leader.apply(command(1)).await.unwrap();
    old_leader.shutdown().await;

    // One of the two survivors must take over.
    let new_leader = eventually(Duration::from_secs(10), || {
        nodes.iter().any(|(m, _)| m.is_leader())
    })
    .await;
    assert!(new_leader, "a surviving node should win the election");

    let leader = nodes.iter().find(|(m, _)| m.is_leader()).unwrap();
    assert_ne!(leader.0.node_id(), first_leader);
    leader.0.apply(command(2)).await.unwrap();

    let converged = eventually(Duration::from_secs(10), || {
        nodes.iter().all(|(_, fsm)| fsm.applied() == vec![1, 2])
    })
    .await;
    assert!(converged, "survivors should share the full history");

    for (manager, _) in &nodes {
        manager.shutdown().await;
    }
}

#[tokio::test]
async fn late_joiner_catches_up_from_a_snapshot() {
    let addrs = free_addrs(3);

    let snapshot_config = |bind: &str| {
        let mut config = test_config(bind, &addrs);
        config.snapshot_threshold = 4;
        config
    };

    // Two of three peers form a quorum while the third stays down.
    let mut nodes = Vec::new();
    for addr in &addrs[..2] {
        nodes.push(start_node(addr, &addrs, Some(snapshot_config(addr))).await);
    }

    let leader_addr = nodes[0]
        .0
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();
    let leader = nodes
        .iter()
        .find(|(m, _)| m.node_id() == leader_addr)
        .unwrap();

    // Enough commands to cross the snapshot threshold and compact the log.
    for value in 1..=10 {
        leader.0.apply(command(value)).await.unwrap();
    }

    let late = start_node(&addrs[2], &addrs, Some(snapshot_config(&addrs[2]))).await;
    nodes.push(late);

    let expected: Vec<u64> = (1..=10).collect();
    let converged = eventually(Duration::from_secs(15), || {
        nodes.last().unwrap().1.applied() == expected
    })
    .await;
    assert!(converged, "late joiner should receive snapshot plus tail");

    for (manager, _) in &nodes {
        manager.shutdown().await;
    }
}
