//! Public handle for a running cluster node.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::node::{NodeRequest, RaftNode, RaftRole, RaftStatus};
use crate::transport::Transport;
use crate::StateMachine;

/// Depth of the channel feeding peer messages into the node task.
const INBOUND_QUEUE: usize = 1024;

/// Manages one node of the consensus cluster: membership, elections,
/// replication and the `apply` primitive for submitting commands.
#[derive(Debug)]
pub struct ClusterManager {
    config: ClusterConfig,
    requests: mpsc::Sender<NodeRequest>,
    status: watch::Receiver<RaftStatus>,
    fault: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
}

impl ClusterManager {
    /// Validates the config, binds the transport and starts the node task.
    ///
    /// The given state machine receives every committed command, on this
    /// node and on every peer, in the same order.
    pub async fn start(
        config: ClusterConfig,
        fsm: Arc<dyn StateMachine>,
    ) -> Result<Arc<ClusterManager>, ClusterError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let transport = Transport::start(
            &config.bind_addr,
            &config.node_id,
            &config.peers,
            inbound_tx,
            cancel.clone(),
        )
        .await?;

        let (status_tx, status_rx) = watch::channel(RaftStatus::initial());
        let (fault_tx, fault_rx) = watch::channel(None);
        let (request_tx, request_rx) = mpsc::channel(INBOUND_QUEUE);

        let node = RaftNode::new(config.clone(), fsm, transport, status_tx, fault_tx);
        tokio::spawn(node.run(request_rx, inbound_rx, cancel.clone()));

        info!(
            node_id = %config.node_id,
            peers = config.peers.len(),
            "cluster node started"
        );

        Ok(Arc::new(ClusterManager {
            config,
            requests: request_tx,
            status: status_rx,
            fault: fault_rx,
            cancel,
        }))
    }

    /// Submits a command for replication.
    ///
    /// Resolves once the command is committed by a majority and applied on
    /// this node, fails with [`ClusterError::NotLeader`] anywhere but the
    /// leader, and with [`ClusterError::ApplyTimeout`] when consensus does
    /// not complete within the configured bound.
    pub async fn apply(&self, command: Vec<u8>) -> Result<(), ClusterError> {
        if self.cancel.is_cancelled() {
            return Err(ClusterError::Shutdown);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(NodeRequest::Apply {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClusterError::Shutdown)?;

        match tokio::time::timeout(self.config.apply_timeout, reply_rx).await {
            Err(_) => Err(ClusterError::ApplyTimeout(self.config.apply_timeout)),
            Ok(Err(_)) => Err(ClusterError::Shutdown),
            Ok(Ok(result)) => result,
        }
    }

    /// Whether this node currently holds leadership.
    pub fn is_leader(&self) -> bool {
        self.status.borrow().role == RaftRole::Leader
    }

    /// Address of the current leader, when one is known.
    pub fn leader_addr(&self) -> Option<String> {
        self.status.borrow().leader.clone()
    }

    /// Current role as a display string.
    pub fn state(&self) -> &'static str {
        self.status.borrow().role.as_str()
    }

    /// This node's stable identifier.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// The static peer set.
    pub fn peers(&self) -> &[String] {
        &self.config.peers
    }

    /// Waits until some node (possibly this one) holds leadership.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<String, ClusterError> {
        let mut status = self.status.clone();
        let wait = async move {
            loop {
                if let Some(leader) = status.borrow_and_update().leader.clone() {
                    return leader;
                }
                if status.changed().await.is_err() {
                    // Node task gone; let the timeout fire.
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClusterError::NoLeader(timeout))
    }

    /// Resolves if the node hits an unrecoverable state machine failure.
    /// Intended for `select!`-style supervision; never resolves otherwise.
    pub async fn fatal(&self) -> String {
        let mut fault = self.fault.clone();
        loop {
            if let Some(message) = fault.borrow_and_update().clone() {
                return message;
            }
            if fault.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Stops the node task and transport. Idempotent.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(node_id = %self.config.node_id, "shutting down cluster node");
        self.cancel.cancel();
    }
}
