use std::time::Duration;

use crate::error::ClusterError;

/// Configuration for one cluster node.
///
/// Membership is static: the peer set is fixed at startup, every peer is a
/// voter, and the node identifier equals the transport bind address so that
/// all nodes bootstrap the same configuration symmetrically.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Stable identifier for this node (by convention the bind address).
    pub node_id: String,

    /// Address to bind for inter-node traffic (host:port).
    pub bind_addr: String,

    /// All peer addresses, including this node's own.
    pub peers: Vec<String>,

    /// How long a follower waits without leader contact before electing.
    pub heartbeat_timeout: Duration,

    /// How long a candidate waits for votes before starting a new round.
    pub election_timeout: Duration,

    /// Cadence of automatic snapshots.
    pub snapshot_interval: Duration,

    /// Log entries applied since the last snapshot that force a new one.
    pub snapshot_threshold: u64,

    /// Bound on waiting for a submitted command to commit and apply.
    pub apply_timeout: Duration,
}

impl ClusterConfig {
    /// Creates a config with the default timings.
    pub fn new(node_id: String, bind_addr: String, peers: Vec<String>) -> Self {
        ClusterConfig {
            node_id,
            bind_addr,
            peers,
            heartbeat_timeout: Duration::from_secs(1),
            election_timeout: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(120),
            snapshot_threshold: 8192,
            apply_timeout: Duration::from_secs(5),
        }
    }

    /// Number of nodes that must agree before a command commits.
    pub fn quorum(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Checks that the configuration describes a bootable node.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.node_id.is_empty() {
            return Err(ClusterError::Config("node-id is required".into()));
        }
        if self.bind_addr.is_empty() {
            return Err(ClusterError::Config("bind address is required".into()));
        }
        validate_host_port(&self.bind_addr)?;

        if self.peers.is_empty() {
            return Err(ClusterError::Config("at least one peer is required".into()));
        }
        for peer in &self.peers {
            validate_host_port(peer)?;
        }
        if !self.peers.contains(&self.bind_addr) {
            return Err(ClusterError::Config(format!(
                "peer list must include own address {}",
                self.bind_addr
            )));
        }

        if self.heartbeat_timeout.is_zero() || self.election_timeout.is_zero() {
            return Err(ClusterError::Config(
                "heartbeat and election timeouts must be positive".into(),
            ));
        }

        Ok(())
    }
}

fn validate_host_port(addr: &str) -> Result<(), ClusterError> {
    let invalid = || ClusterError::Config(format!("invalid address {addr:?} (want host:port)"));

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}
