use std::collections::HashMap;
use std::fs;
use std::io;

use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::AddressFamily;
use crate::BindTarget;
use crate::ErrorCode;
use crate::ListenerHandle;
use crate::WorkerId;

/// Registry record for one bind target.
///
/// Owns the shared listening resource and the handle instance issued to
/// each attached worker. `attached_workers` keeps attach order;
/// `distributed_handles` always holds exactly the same worker ids, with
/// `None` for a worker whose attach failed.
#[derive(Debug)]
pub struct Registration {
    key: BindTarget,
    resource: Option<ListenerHandle>,
    last_error: Option<ErrorCode>,
    attached_workers: Vec<WorkerId>,
    distributed_handles: HashMap<WorkerId, Option<ListenerHandle>>,
}

impl Registration {
    pub(crate) fn new(key: BindTarget) -> Self {
        Self {
            key,
            resource: None,
            last_error: None,
            attached_workers: Vec::new(),
            distributed_handles: HashMap::new(),
        }
    }

    pub fn key(&self) -> &BindTarget {
        &self.key
    }

    pub fn attached_workers(&self) -> &[WorkerId] {
        &self.attached_workers
    }

    pub fn worker_count(&self) -> usize {
        self.attached_workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached_workers.is_empty()
    }

    pub fn is_attached(
        &self,
        worker: WorkerId,
    ) -> bool {
        self.distributed_handles.contains_key(&worker)
    }

    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// Error code of the most recent failed creation attempt, cleared once a
    /// resource exists.
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error
    }

    /// Handle instance recorded for `worker`, if its attach succeeded.
    pub fn issued_handle(
        &self,
        worker: WorkerId,
    ) -> Option<&ListenerHandle> {
        self.distributed_handles.get(&worker).and_then(Option::as_ref)
    }

    pub(crate) fn resource(&self) -> Option<&ListenerHandle> {
        self.resource.as_ref()
    }

    pub(crate) fn install_resource(
        &mut self,
        resource: ListenerHandle,
    ) {
        self.resource = Some(resource);
        self.last_error = None;
    }

    pub(crate) fn record_creation_failure(
        &mut self,
        code: ErrorCode,
    ) {
        self.resource = None;
        self.last_error = Some(code);
    }

    /// Closes the shared resource without touching worker entries. A unix
    /// socket path is unlinked with it, so the key can be bound again.
    pub(crate) fn discard_resource(&mut self) -> bool {
        let Some(resource) = self.resource.take() else {
            return false;
        };
        drop(resource);
        if self.key.family() == AddressFamily::Unix {
            unlink_socket_path(self.key.address());
        }
        true
    }

    /// Appends `worker`. Callers check [`Registration::is_attached`] first.
    pub(crate) fn push_worker(
        &mut self,
        worker: WorkerId,
        handle: Option<ListenerHandle>,
    ) {
        debug_assert!(!self.is_attached(worker));
        self.attached_workers.push(worker);
        self.distributed_handles.insert(worker, handle);
    }

    /// Removes `worker` and closes its handle instance. Returns false when
    /// the worker was not attached.
    pub(crate) fn remove_worker(
        &mut self,
        worker: WorkerId,
    ) -> bool {
        let Some(position) = self.attached_workers.iter().position(|w| *w == worker) else {
            return false;
        };
        self.attached_workers.remove(position);
        if let Some(handle) = self.distributed_handles.remove(&worker).flatten() {
            trace!(key = %self.key, %worker, "closing worker handle instance");
            drop(handle);
        }
        true
    }

    /// Closes every remaining handle and the shared resource. Returns true
    /// when a resource was open.
    pub(crate) fn close(mut self) -> bool {
        self.attached_workers.clear();
        self.distributed_handles.clear();
        self.discard_resource()
    }
}

fn unlink_socket_path(path: &str) {
    // Abstract namespace addresses have no file.
    if path.is_empty() || path.starts_with('\0') {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path, "unix socket path removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path, "failed to remove unix socket path: {}", e),
    }
}
