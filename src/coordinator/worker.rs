use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use super::CoordinatorHandle;
use crate::BindTarget;
use crate::ErrorCode;
use crate::HandleReceiver;
use crate::ListenerHandle;
use crate::RegistryError;
use crate::Result;
use crate::WorkerId;

/// Worker-side helper: asks the coordinator for a listener and redeems the
/// reply through the worker's end of the transport.
#[derive(Clone)]
pub struct Worker {
    id: WorkerId,
    coordinator: CoordinatorHandle,
    receiver: Arc<dyn HandleReceiver>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        coordinator: CoordinatorHandle,
        receiver: Arc<dyn HandleReceiver>,
    ) -> Self {
        Self {
            id,
            coordinator,
            receiver,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Obtains this worker's handle on the shared listener for `target`.
    ///
    /// When no handle can be produced the worker is detached again, so a
    /// later call may retry.
    pub async fn listen(
        &self,
        target: &BindTarget,
    ) -> Result<ListenerHandle> {
        let reply = self.coordinator.attach(self.id, target.clone()).await?;

        let token = match (reply.token, reply.errno) {
            (Some(token), _) => token,
            (None, _) if reply.denied => {
                debug!(worker = %self.id, %target, "listen not permitted");
                return Err(RegistryError::PermissionDenied {
                    worker: self.id,
                    key: target.to_string(),
                }
                .into());
            }
            (None, errno) => {
                let code = ErrorCode::from_raw(errno);
                debug!(worker = %self.id, %target, "listen failed: {}", code);
                self.coordinator.detach(self.id, target.clone()).await?;
                return Err(RegistryError::ResourceCreationFailed {
                    key: target.to_string(),
                    code,
                }
                .into());
            }
        };

        match self.receiver.receive(&token) {
            Ok(handle) => Ok(handle),
            Err(source) => {
                warn!(worker = %self.id, %target, "handle receive failed: {}", source);
                self.coordinator.detach(self.id, target.clone()).await?;
                Err(RegistryError::TransferFailed {
                    worker: self.id,
                    key: target.to_string(),
                    source,
                }
                .into())
            }
        }
    }

    /// [`listen`](Self::listen) for TCP targets, registered with the tokio
    /// reactor.
    pub async fn listen_tcp(
        &self,
        target: &BindTarget,
    ) -> Result<tokio::net::TcpListener> {
        let handle = self.listen(target).await?;
        handle.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(handle.into_tcp_listener()?)?;
        Ok(listener)
    }

    pub async fn unlisten(
        &self,
        target: &BindTarget,
    ) -> Result<bool> {
        self.coordinator.detach(self.id, target.clone()).await
    }

    /// Releases every target this worker still holds.
    pub async fn exit(self) -> Result<Vec<BindTarget>> {
        self.coordinator.worker_exited(self.id).await
    }
}
