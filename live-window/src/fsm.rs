//! The replicated state machine wrapping [`WindowState`].

use parking_lot::RwLock;
use raft_cluster::{FsmError, StateMachine};
use tracing::debug;

use crate::command::Command;
use crate::state::WindowState;

/// Window state behind a reader-writer lock.
///
/// Readers (manifest generation, health reporting) take the read lock and
/// see a consistent snapshot; the only writer is command application, which
/// holds the write lock for a single O(variant-count) transition.
#[derive(Debug, Default)]
pub struct WindowFsm {
    state: RwLock<WindowState>,
}

impl WindowFsm {
    pub fn new() -> Self {
        WindowFsm::default()
    }

    /// A copy of the current state, read atomically.
    pub fn state(&self) -> WindowState {
        self.state.read().clone()
    }

    /// Applies a decoded command directly (the non-clustered path).
    pub fn apply_command(&self, command: &Command) -> Result<(), FsmError> {
        let mut state = self.state.write();
        match command {
            Command::Initialize { totals } => {
                debug!(variants = totals.len(), "initializing window state");
                state
                    .initialize(totals)
                    .map_err(|e| FsmError::Rejected(e.to_string()))
            }
            Command::AdvanceWindow { scope } => {
                state.advance(*scope);
                debug!(sequence = state.sequence(), "advanced window");
                Ok(())
            }
        }
    }
}

impl StateMachine for WindowFsm {
    fn apply(&self, command: &[u8]) -> Result<(), FsmError> {
        let command = Command::decode(command)?;
        self.apply_command(&command)
    }

    fn snapshot(&self) -> Result<Vec<u8>, FsmError> {
        self.state.read().to_snapshot().map_err(FsmError::Encode)
    }

    fn restore(&self, snapshot: &[u8]) -> Result<(), FsmError> {
        let restored = WindowState::from_snapshot(snapshot).map_err(FsmError::Decode)?;
        *self.state.write() = restored;
        Ok(())
    }
}
