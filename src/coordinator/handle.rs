use tokio::sync::mpsc;
use tokio::sync::oneshot;

use super::AttachReply;
use super::WorkerRequest;
use crate::BindTarget;
use crate::Error;
use crate::Result;
use crate::SystemError;
use crate::WorkerId;

/// Cloneable request side of a running [`Coordinator`](super::Coordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    request_tx: mpsc::Sender<WorkerRequest>,
}

impl CoordinatorHandle {
    pub(crate) fn new(request_tx: mpsc::Sender<WorkerRequest>) -> Self {
        Self { request_tx }
    }

    pub async fn attach(
        &self,
        worker: WorkerId,
        target: BindTarget,
    ) -> Result<AttachReply> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerRequest::Attach { worker, target, reply }).await?;
        rx.await.map_err(|_| unavailable("attach reply dropped"))?
    }

    pub async fn detach(
        &self,
        worker: WorkerId,
        target: BindTarget,
    ) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerRequest::Detach { worker, target, reply }).await?;
        rx.await.map_err(|_| unavailable("detach reply dropped"))
    }

    /// Reports that `worker` is gone; returns the targets it was released
    /// from.
    pub async fn worker_exited(
        &self,
        worker: WorkerId,
    ) -> Result<Vec<BindTarget>> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerRequest::WorkerExited { worker, reply }).await?;
        rx.await.map_err(|_| unavailable("worker exit reply dropped"))
    }

    async fn submit(
        &self,
        request: WorkerRequest,
    ) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| unavailable("request channel closed"))
    }
}

fn unavailable(reason: &str) -> Error {
    SystemError::CoordinatorUnavailable(reason.to_string()).into()
}
