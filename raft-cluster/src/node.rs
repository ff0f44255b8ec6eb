//! The per-node consensus runtime.
//!
//! All Raft state lives inside one task that owns it exclusively; the rest
//! of the process talks to it through channels. Elections use randomized
//! deadlines, commands commit on majority acknowledgement, and committed
//! entries are fed to the shared state machine in log order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClusterConfig;
use crate::error::{ClusterError, FsmError};
use crate::log::LogStore;
use crate::message::{LogEntry, RaftMessage};
use crate::transport::Transport;
use crate::StateMachine;

/// Cap on entries shipped in one AppendEntries message.
const MAX_APPEND_ENTRIES: usize = 512;

/// Role of a node within the quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
    Shutdown,
}

impl RaftRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaftRole::Follower => "Follower",
            RaftRole::Candidate => "Candidate",
            RaftRole::Leader => "Leader",
            RaftRole::Shutdown => "Shutdown",
        }
    }
}

/// Snapshot of the node's consensus position, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftStatus {
    pub role: RaftRole,
    pub term: u64,
    pub leader: Option<String>,
}

impl RaftStatus {
    pub(crate) fn initial() -> Self {
        RaftStatus {
            role: RaftRole::Follower,
            term: 0,
            leader: None,
        }
    }
}

/// Requests from the local process to the node task.
pub(crate) enum NodeRequest {
    Apply {
        command: Vec<u8>,
        reply: oneshot::Sender<Result<(), ClusterError>>,
    },
}

struct SnapshotMeta {
    last_included_index: u64,
    last_included_term: u64,
    data: Vec<u8>,
}

pub(crate) struct RaftNode {
    config: ClusterConfig,
    fsm: Arc<dyn StateMachine>,
    transport: Transport,

    // Volatile equivalents of Raft's persistent state.
    current_term: u64,
    voted_for: Option<String>,
    log: LogStore,

    role: RaftRole,
    leader: Option<String>,
    commit_index: u64,
    last_applied: u64,

    // Candidate state.
    votes: HashSet<String>,

    // Leader state.
    peer_ids: Vec<String>,
    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    pending: BTreeMap<u64, oneshot::Sender<Result<(), ClusterError>>>,

    snapshot: Option<SnapshotMeta>,
    applied_since_snapshot: u64,

    election_deadline: Instant,
    status_tx: watch::Sender<RaftStatus>,
    fault_tx: watch::Sender<Option<String>>,
}

impl RaftNode {
    pub(crate) fn new(
        config: ClusterConfig,
        fsm: Arc<dyn StateMachine>,
        transport: Transport,
        status_tx: watch::Sender<RaftStatus>,
        fault_tx: watch::Sender<Option<String>>,
    ) -> Self {
        let peer_ids = config
            .peers
            .iter()
            .filter(|p| **p != config.node_id)
            .cloned()
            .collect();

        RaftNode {
            fsm,
            transport,
            current_term: 0,
            voted_for: None,
            log: LogStore::new(),
            role: RaftRole::Follower,
            leader: None,
            commit_index: 0,
            last_applied: 0,
            votes: HashSet::new(),
            peer_ids,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            pending: BTreeMap::new(),
            snapshot: None,
            applied_since_snapshot: 0,
            election_deadline: Instant::now(),
            status_tx,
            fault_tx,
            config,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::Receiver<NodeRequest>,
        mut inbound: mpsc::Receiver<RaftMessage>,
        cancel: CancellationToken,
    ) {
        let heartbeat_period = (self.config.heartbeat_timeout / 5).max(Duration::from_millis(10));
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        let mut snapshots = tokio::time::interval(self.config.snapshot_interval);
        self.reset_follower_deadline();

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(request) = requests.recv() => self.handle_request(request),
                Some(message) = inbound.recv() => self.handle_message(message),
                _ = tokio::time::sleep_until(self.election_deadline) => {
                    self.handle_election_timeout();
                    Ok(())
                }
                _ = heartbeat.tick() => {
                    if self.role == RaftRole::Leader {
                        self.broadcast_append_entries();
                    }
                    Ok(())
                }
                _ = snapshots.tick() => {
                    self.maybe_snapshot(true);
                    Ok(())
                }
            };

            if let Err(fault) = step {
                error!(error = %fault, "fatal consensus failure, stopping node");
                self.fault_tx.send_replace(Some(fault.to_string()));
                cancel.cancel();
                break;
            }
        }

        self.fail_pending(|| ClusterError::Shutdown);
        self.role = RaftRole::Shutdown;
        self.leader = None;
        self.publish_status();
        info!(node_id = %self.config.node_id, "consensus node stopped");
    }

    // ---- local requests ----------------------------------------------------

    fn handle_request(&mut self, request: NodeRequest) -> Result<(), ClusterError> {
        match request {
            NodeRequest::Apply { command, reply } => {
                if self.role != RaftRole::Leader {
                    let _ = reply.send(Err(ClusterError::NotLeader {
                        leader: self.leader.clone(),
                    }));
                    return Ok(());
                }

                let entry = LogEntry {
                    index: self.log.last_index() + 1,
                    term: self.current_term,
                    command,
                };
                debug!(index = entry.index, term = entry.term, "appending command");
                self.pending.insert(entry.index, reply);
                self.log.append(entry);

                if self.config.quorum() == 1 {
                    self.advance_commit()?;
                } else {
                    self.broadcast_append_entries();
                }
                Ok(())
            }
        }
    }

    // ---- protocol messages -------------------------------------------------

    fn handle_message(&mut self, message: RaftMessage) -> Result<(), ClusterError> {
        let term = message_term(&message);
        if term > self.current_term {
            self.step_down(term);
        }

        match message {
            RaftMessage::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                self.handle_request_vote(term, candidate_id, last_log_index, last_log_term);
                Ok(())
            }
            RaftMessage::RequestVoteReply {
                term,
                voter_id,
                vote_granted,
            } => {
                self.handle_vote_reply(term, voter_id, vote_granted);
                Ok(())
            }
            RaftMessage::AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.handle_append_entries(
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            RaftMessage::AppendEntriesReply {
                term,
                follower_id,
                success,
                match_index,
            } => self.handle_append_reply(term, follower_id, success, match_index),
            RaftMessage::InstallSnapshot {
                term,
                leader_id,
                last_included_index,
                last_included_term,
                data,
            } => self.handle_install_snapshot(
                term,
                leader_id,
                last_included_index,
                last_included_term,
                data,
            ),
            RaftMessage::InstallSnapshotReply {
                term,
                follower_id,
                match_index,
            } => self.handle_append_reply(term, follower_id, true, match_index),
        }
    }

    fn handle_request_vote(
        &mut self,
        term: u64,
        candidate_id: String,
        last_log_index: u64,
        last_log_term: u64,
    ) {
        let mut granted = false;

        if term == self.current_term {
            let log_ok = last_log_term > self.log.last_term()
                || (last_log_term == self.log.last_term()
                    && last_log_index >= self.log.last_index());
            let vote_free = self
                .voted_for
                .as_ref()
                .map(|v| *v == candidate_id)
                .unwrap_or(true);

            if log_ok && vote_free && self.role != RaftRole::Leader {
                granted = true;
                self.voted_for = Some(candidate_id.clone());
                self.reset_follower_deadline();
            }
        }

        debug!(term, candidate = %candidate_id, granted, "vote requested");
        self.transport.send(
            &candidate_id,
            RaftMessage::RequestVoteReply {
                term: self.current_term,
                voter_id: self.config.node_id.clone(),
                vote_granted: granted,
            },
        );
    }

    fn handle_vote_reply(&mut self, term: u64, voter_id: String, vote_granted: bool) {
        if self.role != RaftRole::Candidate || term != self.current_term || !vote_granted {
            return;
        }
        self.votes.insert(voter_id);
        if self.votes.len() >= self.config.quorum() {
            self.become_leader();
        }
    }

    fn handle_append_entries(
        &mut self,
        term: u64,
        leader_id: String,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> Result<(), ClusterError> {
        if term < self.current_term {
            self.transport.send(
                &leader_id,
                RaftMessage::AppendEntriesReply {
                    term: self.current_term,
                    follower_id: self.config.node_id.clone(),
                    success: false,
                    match_index: 0,
                },
            );
            return Ok(());
        }

        // Equal term: accept the sender as leader for this term.
        if self.role != RaftRole::Follower {
            self.become_follower();
        }
        if self.leader.as_deref() != Some(leader_id.as_str()) {
            self.leader = Some(leader_id.clone());
            self.publish_status();
        }
        self.reset_follower_deadline();

        let (success, match_index) = match self.log.term_at(prev_log_index) {
            None if prev_log_index > self.log.last_index() => {
                // Our log is shorter; tell the leader where it ends.
                (false, self.log.last_index())
            }
            None => {
                // prev falls under our snapshot; resend from there.
                (false, self.log.snapshot_index())
            }
            Some(t) if t != prev_log_term => {
                self.log.truncate_from(prev_log_index);
                (false, prev_log_index.saturating_sub(1))
            }
            Some(_) => {
                for entry in entries.iter() {
                    // Anything at or below our snapshot point is already
                    // applied state.
                    if entry.index < self.log.first_index() {
                        continue;
                    }
                    match self.log.term_at(entry.index) {
                        Some(existing) if existing == entry.term => {}
                        Some(_) => {
                            self.log.truncate_from(entry.index);
                            self.log.append(entry.clone());
                        }
                        None => self.log.append(entry.clone()),
                    }
                }
                let matched = prev_log_index + entries.len() as u64;

                if leader_commit > self.commit_index {
                    self.commit_index = leader_commit.min(self.log.last_index());
                    self.apply_committed()?;
                }

                (true, matched)
            }
        };

        self.transport.send(
            &leader_id,
            RaftMessage::AppendEntriesReply {
                term: self.current_term,
                follower_id: self.config.node_id.clone(),
                success,
                match_index,
            },
        );
        Ok(())
    }

    fn handle_append_reply(
        &mut self,
        term: u64,
        follower_id: String,
        success: bool,
        match_index: u64,
    ) -> Result<(), ClusterError> {
        if self.role != RaftRole::Leader || term != self.current_term {
            return Ok(());
        }

        if success {
            let matched = self
                .match_index
                .get(&follower_id)
                .copied()
                .unwrap_or(0)
                .max(match_index);
            self.match_index.insert(follower_id.clone(), matched);
            self.next_index.insert(follower_id.clone(), matched + 1);
            self.advance_commit()?;

            if matched < self.log.last_index() {
                self.send_append_to(&follower_id);
            }
        } else {
            // Back off towards the follower's hint and retry immediately.
            let current = self
                .next_index
                .get(&follower_id)
                .copied()
                .unwrap_or(self.log.last_index() + 1);
            let backed = current.saturating_sub(1).max(1);
            let next = backed.min(match_index + 1).max(1);
            self.next_index.insert(follower_id.clone(), next);
            self.send_append_to(&follower_id);
        }
        Ok(())
    }

    fn handle_install_snapshot(
        &mut self,
        term: u64,
        leader_id: String,
        last_included_index: u64,
        last_included_term: u64,
        data: Vec<u8>,
    ) -> Result<(), ClusterError> {
        if term < self.current_term {
            self.transport.send(
                &leader_id,
                RaftMessage::InstallSnapshotReply {
                    term: self.current_term,
                    follower_id: self.config.node_id.clone(),
                    match_index: 0,
                },
            );
            return Ok(());
        }

        if self.role != RaftRole::Follower {
            self.become_follower();
        }
        self.leader = Some(leader_id.clone());
        self.reset_follower_deadline();
        self.publish_status();

        if last_included_index > self.last_applied {
            // A snapshot that cannot be restored leaves this node unable to
            // ever agree with its peers again.
            self.fsm
                .restore(&data)
                .map_err(ClusterError::Fsm)?;

            info!(
                index = last_included_index,
                term = last_included_term,
                "installed snapshot from leader"
            );
            self.log
                .reset_to_snapshot(last_included_index, last_included_term);
            self.commit_index = last_included_index;
            self.last_applied = last_included_index;
            self.applied_since_snapshot = 0;
            self.snapshot = Some(SnapshotMeta {
                last_included_index,
                last_included_term,
                data,
            });
        }

        self.transport.send(
            &leader_id,
            RaftMessage::InstallSnapshotReply {
                term: self.current_term,
                follower_id: self.config.node_id.clone(),
                match_index: self.last_applied,
            },
        );
        Ok(())
    }

    // ---- elections ---------------------------------------------------------

    fn handle_election_timeout(&mut self) {
        if self.role == RaftRole::Leader {
            self.reset_follower_deadline();
            return;
        }

        self.current_term += 1;
        self.role = RaftRole::Candidate;
        self.voted_for = Some(self.config.node_id.clone());
        self.votes = HashSet::from([self.config.node_id.clone()]);
        self.leader = None;
        self.publish_status();

        info!(term = self.current_term, "starting leader election");

        if self.votes.len() >= self.config.quorum() {
            self.become_leader();
            return;
        }

        let request = RaftMessage::RequestVote {
            term: self.current_term,
            candidate_id: self.config.node_id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in &self.peer_ids {
            self.transport.send(peer, request.clone());
        }

        self.reset_candidate_deadline();
    }

    fn become_leader(&mut self) {
        info!(term = self.current_term, "elected leader");
        self.role = RaftRole::Leader;
        self.leader = Some(self.config.node_id.clone());
        self.votes.clear();

        let next = self.log.last_index() + 1;
        for peer in &self.peer_ids {
            self.next_index.insert(peer.clone(), next);
            self.match_index.insert(peer.clone(), 0);
        }

        self.publish_status();
        self.broadcast_append_entries();
    }

    fn become_follower(&mut self) {
        self.role = RaftRole::Follower;
        self.votes.clear();
        self.fail_pending(|| ClusterError::NotLeader { leader: None });
        self.publish_status();
    }

    fn step_down(&mut self, term: u64) {
        debug!(term, "observed newer term, stepping down");
        self.current_term = term;
        self.voted_for = None;
        self.leader = None;
        self.become_follower();
        self.reset_follower_deadline();
    }

    // ---- replication -------------------------------------------------------

    fn broadcast_append_entries(&mut self) {
        for peer in self.peer_ids.clone() {
            self.send_append_to(&peer);
        }
    }

    fn send_append_to(&mut self, peer: &str) {
        let next = self
            .next_index
            .get(peer)
            .copied()
            .unwrap_or(self.log.last_index() + 1);

        // History up to the snapshot point is gone; ship the snapshot instead.
        if next <= self.log.snapshot_index() {
            if let Some(snapshot) = &self.snapshot {
                self.transport.send(
                    peer,
                    RaftMessage::InstallSnapshot {
                        term: self.current_term,
                        leader_id: self.config.node_id.clone(),
                        last_included_index: snapshot.last_included_index,
                        last_included_term: snapshot.last_included_term,
                        data: snapshot.data.clone(),
                    },
                );
            }
            return;
        }

        let prev = next.saturating_sub(1);
        let prev_term = match self.log.term_at(prev) {
            Some(term) => term,
            None => {
                // The follower needs history we compacted away.
                if let Some(snapshot) = &self.snapshot {
                    self.transport.send(
                        peer,
                        RaftMessage::InstallSnapshot {
                            term: self.current_term,
                            leader_id: self.config.node_id.clone(),
                            last_included_index: snapshot.last_included_index,
                            last_included_term: snapshot.last_included_term,
                            data: snapshot.data.clone(),
                        },
                    );
                }
                return;
            }
        };

        let entries = self.log.entries_from(next, MAX_APPEND_ENTRIES);
        self.transport.send(
            peer,
            RaftMessage::AppendEntries {
                term: self.current_term,
                leader_id: self.config.node_id.clone(),
                prev_log_index: prev,
                prev_log_term: prev_term,
                entries,
                leader_commit: self.commit_index,
            },
        );
    }

    fn advance_commit(&mut self) -> Result<(), ClusterError> {
        let mut candidate = self.commit_index;
        let mut n = self.commit_index + 1;
        while n <= self.log.last_index() {
            if self.log.term_at(n) == Some(self.current_term) {
                let replicas = 1 + self
                    .peer_ids
                    .iter()
                    .filter(|p| self.match_index.get(*p).copied().unwrap_or(0) >= n)
                    .count();
                if replicas >= self.config.quorum() {
                    candidate = n;
                }
            }
            n += 1;
        }

        if candidate > self.commit_index {
            self.commit_index = candidate;
            self.apply_committed()?;
        }
        Ok(())
    }

    fn apply_committed(&mut self) -> Result<(), ClusterError> {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let Some(entry) = self.log.entry(index).cloned() else {
                break;
            };

            match self.fsm.apply(&entry.command) {
                Ok(()) => {
                    self.last_applied = index;
                    self.applied_since_snapshot += 1;
                    if let Some(reply) = self.pending.remove(&index) {
                        let _ = reply.send(Ok(()));
                    }
                }
                Err(FsmError::Rejected(reason)) => {
                    warn!(index, %reason, "state machine rejected command");
                    self.last_applied = index;
                    self.applied_since_snapshot += 1;
                    if let Some(reply) = self.pending.remove(&index) {
                        let _ = reply.send(Err(ClusterError::Fsm(FsmError::Rejected(reason))));
                    }
                }
                Err(fatal) => {
                    if let Some(reply) = self.pending.remove(&index) {
                        let _ = reply.send(Err(ClusterError::Fsm(fatal.clone())));
                    }
                    return Err(ClusterError::Fsm(fatal));
                }
            }
        }

        self.maybe_snapshot(false);
        Ok(())
    }

    /// Captures a snapshot when due. Capture failures are best-effort: the
    /// next interval or threshold crossing retries.
    fn maybe_snapshot(&mut self, periodic: bool) {
        let due = if periodic {
            self.applied_since_snapshot > 0
        } else {
            self.applied_since_snapshot >= self.config.snapshot_threshold
        };
        if !due || self.last_applied == 0 {
            return;
        }

        match self.fsm.snapshot() {
            Ok(data) => {
                let term = self
                    .log
                    .term_at(self.last_applied)
                    .unwrap_or(self.current_term);
                debug!(index = self.last_applied, "captured state snapshot");
                self.snapshot = Some(SnapshotMeta {
                    last_included_index: self.last_applied,
                    last_included_term: term,
                    data,
                });
                self.log.compact_to(self.last_applied, term);
                self.applied_since_snapshot = 0;
            }
            Err(error) => warn!(%error, "snapshot capture failed, will retry"),
        }
    }

    // ---- plumbing ----------------------------------------------------------

    fn fail_pending(&mut self, make_error: impl Fn() -> ClusterError) {
        for (_, reply) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Err(make_error()));
        }
    }

    fn reset_follower_deadline(&mut self) {
        self.election_deadline = Instant::now() + jittered(self.config.heartbeat_timeout);
    }

    fn reset_candidate_deadline(&mut self) {
        self.election_deadline = Instant::now() + jittered(self.config.election_timeout);
    }

    fn publish_status(&self) {
        let status = RaftStatus {
            role: self.role,
            term: self.current_term,
            leader: self.leader.clone(),
        };
        // Keep the read borrow out of the send call's scope.
        let changed = *self.status_tx.borrow() != status;
        if changed {
            self.status_tx.send_replace(status);
        }
    }
}

/// Base duration plus a uniform random addition of up to the same length.
fn jittered(base: Duration) -> Duration {
    let millis = base.as_millis().max(1) as u64;
    base + Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

fn message_term(message: &RaftMessage) -> u64 {
    match message {
        RaftMessage::RequestVote { term, .. }
        | RaftMessage::RequestVoteReply { term, .. }
        | RaftMessage::AppendEntries { term, .. }
        | RaftMessage::AppendEntriesReply { term, .. }
        | RaftMessage::InstallSnapshot { term, .. }
        | RaftMessage::InstallSnapshotReply { term, .. } => *term,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_one_extra_base_length() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let value = jittered(base);
            assert!(value >= base);
            assert!(value < base * 2);
        }
    }

    #[test]
    fn every_message_kind_exposes_its_term() {
        let message = RaftMessage::AppendEntries {
            term: 9,
            leader_id: "a:1".into(),
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        };
        assert_eq!(message_term(&message), 9);

        let message = RaftMessage::InstallSnapshotReply {
            term: 4,
            follower_id: "b:1".into(),
            match_index: 2,
        };
        assert_eq!(message_term(&message), 4);
    }

    #[test]
    fn roles_render_their_protocol_names() {
        assert_eq!(RaftRole::Leader.as_str(), "Leader");
        assert_eq!(RaftRole::Follower.as_str(), "Follower");
        assert_eq!(RaftRole::Candidate.as_str(), "Candidate");
        assert_eq!(RaftRole::Shutdown.as_str(), "Shutdown");
    }
}
