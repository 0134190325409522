//! Delivery of issued listener handles from the coordinator to workers.
//!
//! The coordinator hands a handle to [`HandleTransport::send`] and replies
//! to the worker with the returned [`TransferToken`]. The worker redeems the
//! token through its [`HandleReceiver`]. In-process workers share a
//! [`LocalHandleTransport`]; worker processes receive descriptors over a
//! unix domain socket ([`UnixSocketTransport`] / [`UnixHandleReceiver`]).
mod local;
mod unix_socket;
pub use local::*;
pub use unix_socket::*;


use std::fmt;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::ListenerHandle;
use crate::TransportError;
use crate::WorkerId;

/// Opaque claim on a handle in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferToken(String);

impl TransferToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferToken {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinator side. Takes ownership of the handle; on error the handle is
/// closed.
#[cfg_attr(test, automock)]
pub trait HandleTransport: Send + Sync + 'static {
    fn send(
        &self,
        worker: WorkerId,
        handle: ListenerHandle,
    ) -> Result<TransferToken, TransportError>;

    /// Withdraws a handle that will never be redeemed and closes it.
    /// Returns false when the token is unknown or already redeemed.
    fn revoke(
        &self,
        worker: WorkerId,
        token: &TransferToken,
    ) -> bool;

    /// Drops everything held for an exited worker. Returns the number of
    /// unredeemed handles closed.
    fn release_worker(
        &self,
        worker: WorkerId,
    ) -> usize;
}

/// Worker side.
#[cfg_attr(test, automock)]
pub trait HandleReceiver: Send + Sync + 'static {
    fn receive(
        &self,
        token: &TransferToken,
    ) -> Result<ListenerHandle, TransportError>;
}
