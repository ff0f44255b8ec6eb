//! Inter-node protocol messages and their wire codec.

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Wire protocol version; peers speaking a different version are rejected.
pub const WIRE_VERSION: u8 = 1;

/// One replicated log entry. Indices start at 1; index 0 means "nothing".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: Vec<u8>,
}

/// Raft protocol messages exchanged between peers.
///
/// Every message carries the sender's identifier so replies can be routed
/// without per-connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Candidate asking for a vote in `term`.
    RequestVote {
        term: u64,
        candidate_id: String,
        last_log_index: u64,
        last_log_term: u64,
    },

    /// Vote response; `vote_granted` is only meaningful for matching terms.
    RequestVoteReply {
        term: u64,
        voter_id: String,
        vote_granted: bool,
    },

    /// Log replication and heartbeat (empty `entries`) from the leader.
    AppendEntries {
        term: u64,
        leader_id: String,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },

    /// Follower's replication outcome. On failure `match_index` is a hint
    /// for where the follower's log actually ends.
    AppendEntriesReply {
        term: u64,
        follower_id: String,
        success: bool,
        match_index: u64,
    },

    /// Full state transfer for followers too far behind the compacted log.
    InstallSnapshot {
        term: u64,
        leader_id: String,
        last_included_index: u64,
        last_included_term: u64,
        data: Vec<u8>,
    },

    InstallSnapshotReply {
        term: u64,
        follower_id: String,
        match_index: u64,
    },
}

impl RaftMessage {
    /// The declared sender of this message.
    pub fn sender(&self) -> &str {
        match self {
            RaftMessage::RequestVote { candidate_id, .. } => candidate_id,
            RaftMessage::RequestVoteReply { voter_id, .. } => voter_id,
            RaftMessage::AppendEntries { leader_id, .. } => leader_id,
            RaftMessage::AppendEntriesReply { follower_id, .. } => follower_id,
            RaftMessage::InstallSnapshot { leader_id, .. } => leader_id,
            RaftMessage::InstallSnapshotReply { follower_id, .. } => follower_id,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    version: u8,
    message: RaftMessage,
}

/// Encodes a message for one transport frame.
pub fn encode_message(message: &RaftMessage) -> Result<Vec<u8>, ClusterError> {
    bincode::serialize(&WireEnvelope {
        version: WIRE_VERSION,
        message: message.clone(),
    })
    .map_err(|e| ClusterError::Codec(format!("encode message: {e}")))
}

/// Decodes one transport frame back into a message.
pub fn decode_message(frame: &[u8]) -> Result<RaftMessage, ClusterError> {
    let envelope: WireEnvelope = bincode::deserialize(frame)
        .map_err(|e| ClusterError::Codec(format!("decode message: {e}")))?;
    if envelope.version != WIRE_VERSION {
        return Err(ClusterError::Codec(format!(
            "unsupported wire version {}",
            envelope.version
        )));
    }
    Ok(envelope.message)
}
