//! The single piece of mutable state behind every generated manifest.

use serde::{Deserialize, Serialize};

use crate::command::AdvanceScope;
use crate::error::EngineError;

/// Version tag carried by encoded snapshots.
const SNAPSHOT_VERSION: u8 = 1;

/// Sliding-window state shared by all variants.
///
/// `positions[v]` is the window start index into variant `v`'s segment ring
/// and always stays within `[0, totals[v])`. `sequence` is the global HLS
/// media-sequence counter: it only ever grows, and it grows by exactly one
/// per applied advance, whatever the advance scope, so players see
/// synchronized sequence numbers across variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    positions: Vec<usize>,
    totals: Vec<usize>,
    sequence: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u8,
    state: WindowState,
}

impl WindowState {
    pub fn new() -> Self {
        WindowState::default()
    }

    /// Whether an `Initialize` has been applied.
    pub fn is_initialized(&self) -> bool {
        !self.totals.is_empty()
    }

    /// Records per-variant segment counts and zeroes the window.
    ///
    /// Re-initializing with identical totals is a no-op, which makes the
    /// command idempotent under log replay without ever rewinding
    /// `sequence`. Differing totals are rejected.
    pub fn initialize(&mut self, totals: &[usize]) -> Result<(), EngineError> {
        if self.is_initialized() {
            if self.totals == totals {
                return Ok(());
            }
            return Err(EngineError::AlreadyInitialized);
        }

        self.positions = vec![0; totals.len()];
        self.totals = totals.to_vec();
        self.sequence = 0;
        Ok(())
    }

    /// Moves the window forward by one segment.
    ///
    /// An out-of-range variant index leaves the state untouched: the command
    /// stream stays tolerant of membership or config skew between nodes.
    pub fn advance(&mut self, scope: AdvanceScope) {
        match scope {
            AdvanceScope::AllVariants => {
                for v in 0..self.totals.len() {
                    self.step(v);
                }
            }
            AdvanceScope::Variant(index) => {
                if index >= self.totals.len() {
                    return;
                }
                self.step(index);
            }
        }
        self.sequence += 1;
    }

    fn step(&mut self, variant: usize) {
        let total = self.totals[variant];
        if total > 0 {
            self.positions[variant] = (self.positions[variant] + 1) % total;
        }
    }

    /// Window start position for `variant`, when known.
    pub fn position(&self, variant: usize) -> Option<usize> {
        self.positions.get(variant).copied()
    }

    /// Segment count recorded for `variant`, when known.
    pub fn total(&self, variant: usize) -> Option<usize> {
        self.totals.get(variant).copied()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn variant_count(&self) -> usize {
        self.totals.len()
    }

    /// Encodes the full state for a snapshot.
    pub fn to_snapshot(&self) -> Result<Vec<u8>, String> {
        bincode::serialize(&SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            state: self.clone(),
        })
        .map_err(|e| e.to_string())
    }

    /// Decodes a snapshot produced by [`WindowState::to_snapshot`].
    pub fn from_snapshot(data: &[u8]) -> Result<WindowState, String> {
        let envelope: SnapshotEnvelope = bincode::deserialize(data).map_err(|e| e.to_string())?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(format!(
                "unsupported snapshot version {}",
                envelope.version
            ));
        }
        Ok(envelope.state)
    }
}
