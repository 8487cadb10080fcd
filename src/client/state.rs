use crate::error::{Result, SdError};
use std::fmt;
use std::sync::Mutex;

/// What a client instance is doing right now. Every operation that talks to
/// the server on the caller's behalf must start from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Idle,
    ModelSelecting,
    Generating,
    /// Generation outstanding while the progress monitor runs.
    Polling,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Idle => "idle",
            ClientState::ModelSelecting => "selecting model",
            ClientState::Generating => "generating",
            ClientState::Polling => "generating (polling progress)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: Mutex<ClientState>,
}

impl StateCell {
    pub fn get(&self) -> ClientState {
        *self.lock()
    }

    /// Leaves `Idle` for `next`, or reports the state that blocks the call.
    pub fn begin(&self, next: ClientState) -> Result<StateGuard<'_>> {
        let mut state = self.lock();
        if *state != ClientState::Idle {
            log::warn!("Rejecting call, client is busy ({})", *state);
            return Err(SdError::AlreadyInProgress(*state));
        }
        *state = next;
        Ok(StateGuard { cell: self })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Returns the cell to `Idle` when dropped, whatever path the call took.
pub(crate) struct StateGuard<'a> {
    cell: &'a StateCell,
}

impl StateGuard<'_> {
    pub fn transition(&self, next: ClientState) {
        let mut state = self.cell.lock();
        log::trace!("Client state {} -> {}", *state, next);
        *state = next;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.cell.lock() = ClientState::Idle;
    }
}
