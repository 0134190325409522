//! Error hierarchy for the listener sharing coordinator.
//!
//! Errors are grouped by layer: registry protocol violations, infrastructure
//! failures (I/O, descriptor transport, coordinator availability) and
//! configuration problems.

use config::ConfigError;

use crate::ErrorCode;
use crate::WorkerId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (sockets, descriptor passing, channels)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Attach/detach protocol failures reported to the requesting worker
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A worker attached to a bind target it already holds
    #[error("Worker {worker} is already attached to {key}")]
    DuplicateAttach { worker: WorkerId, key: String },

    /// The bind permission does not cover the target; nothing was created
    #[error("Worker {worker} is not permitted to bind {key}")]
    PermissionDenied { worker: WorkerId, key: String },

    /// The OS declined to create the listening resource
    #[error("Failed to create listening resource for {key}: {code}")]
    ResourceCreationFailed { key: String, code: ErrorCode },

    /// The issued handle could not be delivered to the worker
    #[error("Failed to transfer handle for {key} to worker {worker}")]
    TransferFailed {
        worker: WorkerId,
        key: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Request channel to the coordinator is closed
    #[error("Coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    #[error("Metrics encoding failed: {0}")]
    Metrics(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Token was never issued or has already been redeemed
    #[error("No pending handle for token {0}")]
    UnknownToken(String),

    /// No descriptor channel registered for the worker
    #[error("No channel registered for {0}")]
    UnknownWorker(WorkerId),

    /// sendmsg/recvmsg failures
    #[error("Descriptor passing failed: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Transfer frame carried no descriptor")]
    MissingDescriptor,

    #[error("Malformed transfer frame: {0}")]
    Protocol(String),

    #[error("Transport channel closed")]
    Closed,
}

// ============== Conversion Implementations ============== //
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::System(SystemError::Transport(e))
    }
}

impl From<prometheus::Error> for Error {
    fn from(e: prometheus::Error) -> Self {
        Error::System(SystemError::Metrics(e.to_string()))
    }
}
