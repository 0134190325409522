use dashmap::DashMap;
use nanoid::nanoid;
use tracing::trace;

use super::HandleReceiver;
use super::HandleTransport;
use super::TransferToken;
use crate::ListenerHandle;
use crate::TransportError;
use crate::WorkerId;

/// Transport for workers living in the coordinator's process. Handles are
/// parked under a random token until redeemed.
#[derive(Debug, Default)]
pub struct LocalHandleTransport {
    pending: DashMap<String, (WorkerId, ListenerHandle)>,
}

impl LocalHandleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles sent but not yet received.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl HandleTransport for LocalHandleTransport {
    fn send(
        &self,
        worker: WorkerId,
        handle: ListenerHandle,
    ) -> Result<TransferToken, TransportError> {
        let id = nanoid!();
        trace!(%worker, token = %id, "parking handle");
        self.pending.insert(id.clone(), (worker, handle));
        Ok(TransferToken::new(id))
    }

    fn revoke(
        &self,
        worker: WorkerId,
        token: &TransferToken,
    ) -> bool {
        let revoked = self
            .pending
            .remove_if(token.as_str(), |_, (owner, _)| *owner == worker)
            .is_some();
        if revoked {
            trace!(%worker, %token, "parked handle revoked");
        }
        revoked
    }

    fn release_worker(
        &self,
        worker: WorkerId,
    ) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, (owner, _)| *owner != worker);
        let released = before - self.pending.len();
        if released > 0 {
            trace!(%worker, released, "parked handles dropped");
        }
        released
    }
}

impl HandleReceiver for LocalHandleTransport {
    fn receive(
        &self,
        token: &TransferToken,
    ) -> Result<ListenerHandle, TransportError> {
        match self.pending.remove(token.as_str()) {
            Some((_, (worker, handle))) => {
                trace!(%worker, %token, "handle redeemed");
                Ok(handle)
            }
            None => Err(TransportError::UnknownToken(token.to_string())),
        }
    }
}
