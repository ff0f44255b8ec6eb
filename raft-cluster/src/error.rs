use std::time::Duration;

use thiserror::Error;

/// Failures raised by a replicated state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// A command could not be decoded into a known shape. Fatal to the node.
    #[error("decode command: {0}")]
    Decode(String),

    /// State could not be encoded for a snapshot.
    #[error("encode snapshot: {0}")]
    Encode(String),

    /// A well-formed command was rejected by the state machine.
    #[error("command rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("not the leader (leader: {})", leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    #[error("apply timed out after {0:?}")]
    ApplyTimeout(Duration),

    #[error("no leader elected within {0:?}")]
    NoLeader(Duration),

    #[error("cluster is shut down")]
    Shutdown,

    #[error("invalid cluster config: {0}")]
    Config(String),

    #[error("wire codec: {0}")]
    Codec(String),

    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    #[error("state machine: {0}")]
    Fsm(#[from] FsmError),
}
