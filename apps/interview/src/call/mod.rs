// Interview call session: the state machine between user intent
// (join / leave / toggles) and the realtime client.
// Transport, codecs and routing live behind `transport`; nothing here reimplements them.

pub mod events;
pub mod session;
pub mod state;
pub mod tracks;
pub mod transport;

#[cfg(test)]
pub mod testing;

use thiserror::Error;

use crate::backend::BackendError;
use crate::call::transport::{DeviceError, TransportError};

/// Why a join attempt ended in `CallState::Error`.
///
/// The display text is what the user sees next to the retry button.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Realtime app id is not configured. Please contact support.")]
    NotConfigured,

    #[error("Could not get call credentials: {0}")]
    Token(#[source] BackendError),

    #[error("Failed to join call: {0}")]
    Join(#[source] TransportError),

    #[error("Failed to publish local media: {0}")]
    Publish(#[source] TransportError),

    #[error("Could not access media device: {0}")]
    Device(#[source] DeviceError),

    #[error("The interviewer could not be reached: {0}")]
    Summon(#[source] BackendError),

    #[error("Timed out while {step}. Please try again.")]
    Timeout { step: &'static str },
}
