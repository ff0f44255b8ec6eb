//! In-process Raft consensus for replicated window state.
//!
//! This crate keeps a small, deterministic state machine identical across a
//! static set of peers. Commands submitted on the leader are appended to an
//! in-memory log, shipped to followers over TCP, and applied to every node's
//! state machine in the same total order once a majority has stored them.
//!
//! Everything is volatile by design: log, term metadata and snapshots live
//! in process memory only. A full cluster restart re-elects from scratch and
//! rebuilds state through fresh commands.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = ClusterConfig::new(bind.clone(), bind, peers);
//! let manager = ClusterManager::start(config, fsm).await?;
//!
//! manager.wait_for_leader(Duration::from_secs(10)).await?;
//! if manager.is_leader() {
//!     manager.apply(command_bytes).await?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod log;
pub mod manager;
pub mod message;
mod node;
mod transport;

pub use config::ClusterConfig;
pub use error::{ClusterError, FsmError};
pub use manager::ClusterManager;
pub use node::{RaftRole, RaftStatus};

/// A deterministic state machine replicated by the cluster.
///
/// Implementations must be pure functions of the command stream: applying
/// the same commands in the same order on two nodes must produce identical
/// state, with no dependence on time, randomness or iteration order.
pub trait StateMachine: Send + Sync + 'static {
    /// Applies one committed command.
    ///
    /// A [`FsmError::Decode`] return is fatal to the node: a command that
    /// cannot be decoded into a known shape means the replicas can no longer
    /// be trusted to agree. [`FsmError::Rejected`] is a command-level
    /// failure reported to the submitter; the node keeps running.
    fn apply(&self, command: &[u8]) -> Result<(), FsmError>;

    /// Captures the full state as an opaque byte string.
    fn snapshot(&self) -> Result<Vec<u8>, FsmError>;

    /// Replaces the state with a previously captured snapshot.
    fn restore(&self, snapshot: &[u8]) -> Result<(), FsmError>;
}
