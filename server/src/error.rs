use std::sync::{Arc, Mutex};

use log::error;
use thiserror::Error;

use crate::client::{ClientEvent, ClientState};

/// Errors raised by the client lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClientStateError {
    /// The event does not apply to the client's current state. Fatal to that
    /// client only; the caller must tear its connection down.
    #[error("invalid client state transition: {event:?} not accepted in state {state:?}")]
    InvalidTransition {
        state: ClientState,
        event: ClientEvent,
    },
}

/// Errors reported by the map while loading or generating a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Stored world data was written by an incompatible version.
    #[error("world data version mismatch: {0}")]
    VersionMismatch(String),

    /// Stored block data could not be decoded.
    #[error("invalid block data: {0}")]
    InvalidData(String),

    /// The generator itself reported failure.
    #[error("generator failure: {0}")]
    Failed(String),
}

/// Error returned by the scripting-layer "on generated" hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("on_generated hook failed: {0}")]
pub struct HookError(pub String);

/// Cross-thread fatal-error latch.
///
/// Worker threads record fatal conditions here instead of unwinding into the
/// dispatch control path; the server thread polls it. The first error wins,
/// later ones are logged and dropped.
#[derive(Clone, Default)]
pub struct AsyncFatal {
    inner: Arc<Mutex<Option<String>>>,
}

impl AsyncFatal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message: impl Into<String>) {
        let message = message.into();
        let mut slot = self.inner.lock().unwrap();
        if slot.is_none() {
            *slot = Some(message);
        } else {
            error!("async fatal error already set, dropping: {}", message);
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn take(&self) -> Option<String> {
        self.inner.lock().unwrap().take()
    }
}
