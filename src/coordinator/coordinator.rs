use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::AttachReply;
use super::CoordinatorHandle;
use super::WorkerRequest;
use crate::Attachment;
use crate::BindPermission;
use crate::BindTarget;
use crate::HandleRegistry;
use crate::HandleTransport;
use crate::RegistryError;
use crate::Result;
use crate::WorkerId;
use crate::ATTACH_FAILURES_METRIC;

/// Owner of the handle registry. Serves worker requests from a single task
/// so registry mutations and handle transfers happen in request order.
pub struct Coordinator {
    registry: Arc<HandleRegistry>,
    transport: Arc<dyn HandleTransport>,
    permission: BindPermission,

    request_tx: mpsc::Sender<WorkerRequest>,
    request_rx: mpsc::Receiver<WorkerRequest>,

    // Shutdown signal
    shutdown_signal: watch::Receiver<()>,
}

impl Coordinator {
    pub(crate) fn new(
        registry: Arc<HandleRegistry>,
        transport: Arc<dyn HandleTransport>,
        permission: BindPermission,
        request_capacity: usize,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
        Self {
            registry,
            transport,
            permission,
            request_tx,
            request_rx,
            shutdown_signal,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.request_tx.clone())
    }

    pub fn registry(&self) -> Arc<HandleRegistry> {
        self.registry.clone()
    }

    /// Serves requests until the shutdown signal fires, then closes every
    /// registration.
    pub async fn run(&mut self) -> Result<()> {
        info!("coordinator started");
        loop {
            tokio::select! {
                biased;
                // P0: shutdown received
                _ = self.shutdown_signal.changed() => {
                    warn!("coordinator shutdown signal received.");
                    break;
                }
                // P1: worker requests
                Some(request) = self.request_rx.recv() => {
                    trace!(?request, "receive worker request");
                    self.handle_request(request);
                }
            }
        }

        let closed = self.registry.close_all();
        info!(closed, "coordinator stopped");
        Ok(())
    }

    pub(crate) fn handle_request(
        &self,
        request: WorkerRequest,
    ) {
        match request {
            WorkerRequest::Attach { worker, target, reply } => {
                let result = self.attach(worker, &target);
                if let Err(Ok(undelivered)) = reply.send(result) {
                    self.roll_back(worker, &target, undelivered);
                }
            }
            WorkerRequest::Detach { worker, target, reply } => {
                let _ = reply.send(self.detach(worker, &target));
            }
            WorkerRequest::WorkerExited { worker, reply } => {
                let _ = reply.send(self.on_worker_exit(worker));
            }
        }
    }

    /// Permission check, registry attach and handle transfer.
    ///
    /// A denied target yields an `EACCES` reply and leaves the registry
    /// untouched. A handle that cannot be transferred is rolled back with a
    /// detach before the error is returned.
    pub fn attach(
        &self,
        worker: WorkerId,
        target: &BindTarget,
    ) -> Result<AttachReply> {
        if !self.permission.is_granted(target) {
            warn!(%worker, %target, "bind not permitted");
            ATTACH_FAILURES_METRIC.with_label_values(&["permission_denied"]).inc();
            return Ok(AttachReply::denied());
        }

        match self.registry.attach(target, worker)? {
            Attachment::Issued(handle) => match self.transport.send(worker, handle) {
                Ok(token) => {
                    debug!(%worker, %target, %token, "handle issued");
                    Ok(AttachReply::issued(token))
                }
                Err(source) => {
                    warn!(%worker, %target, "handle transfer failed: {}", source);
                    ATTACH_FAILURES_METRIC.with_label_values(&["transfer"]).inc();
                    self.registry.detach(worker, target);
                    Err(RegistryError::TransferFailed {
                        worker,
                        key: target.to_string(),
                        source,
                    }
                    .into())
                }
            },
            Attachment::Failed(code) => Ok(AttachReply::failed(code)),
        }
    }

    /// Undoes an attach whose reply never reached the worker. Nobody will
    /// redeem the token or detach, so both happen here.
    fn roll_back(
        &self,
        worker: WorkerId,
        target: &BindTarget,
        reply: AttachReply,
    ) {
        warn!(%worker, %target, errno = reply.errno, "attach requester gone, rolling back");
        if let Some(token) = &reply.token {
            if !self.transport.revoke(worker, token) {
                warn!(%worker, %token, "issued handle could not be revoked");
            }
        }
        self.registry.detach(worker, target);
    }

    pub fn detach(
        &self,
        worker: WorkerId,
        target: &BindTarget,
    ) -> bool {
        self.registry.detach(worker, target)
    }

    pub fn on_worker_exit(
        &self,
        worker: WorkerId,
    ) -> Vec<BindTarget> {
        let released = self.registry.on_worker_exit(worker);
        let discarded = self.transport.release_worker(worker);
        if discarded > 0 {
            debug!(%worker, discarded, "unredeemed handles closed");
        }
        released
    }
}
