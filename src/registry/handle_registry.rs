use std::fmt;
use std::io;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Registration;
use super::RegistryEvent;
use crate::BindTarget;
use crate::ErrorCode;
use crate::ListenerFactory;
use crate::ListenerHandle;
use crate::RegistryError;
use crate::Result;
use crate::WorkerId;
use crate::ACTIVE_REGISTRATIONS_METRIC;
use crate::ATTACHED_WORKERS_METRIC;
use crate::ATTACH_FAILURES_METRIC;
use crate::RESOURCE_LIFECYCLE_METRIC;

/// Result of a successful attach call.
#[derive(Debug)]
pub enum Attachment {
    /// Worker-local handle; the caller owns it.
    Issued(ListenerHandle),
    /// No handle could be produced; the worker is still recorded as
    /// attached and must detach like any other worker.
    Failed(ErrorCode),
}

impl Attachment {
    pub fn is_issued(&self) -> bool {
        matches!(self, Attachment::Issued(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Attachment::Issued(_) => None,
            Attachment::Failed(code) => Some(*code),
        }
    }

    pub fn into_handle(self) -> Option<ListenerHandle> {
        match self {
            Attachment::Issued(handle) => Some(handle),
            Attachment::Failed(_) => None,
        }
    }
}

/// Table of live registrations keyed by bind target.
///
/// Each registration is mutated only while its table entry is locked, so
/// the zero-to-one resource creation and the removal on last detach are
/// atomic with respect to other attach/detach calls on the same key.
pub struct HandleRegistry {
    table: DashMap<BindTarget, Registration>,
    factory: Arc<dyn ListenerFactory>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl fmt::Debug for HandleRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("HandleRegistry").field("registrations", &self.table.len()).finish()
    }
}

impl HandleRegistry {
    pub fn new(
        factory: Arc<dyn ListenerFactory>,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            table: DashMap::new(),
            factory,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Attaches `worker` to `key`, creating the listening resource when the
    /// registration has none.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateAttach`] when `worker` already holds `key`;
    /// the registry is left unchanged.
    ///
    /// Resource creation failures are not errors: they come back as
    /// [`Attachment::Failed`] and the next attach on the key retries.
    pub fn attach(
        &self,
        key: &BindTarget,
        worker: WorkerId,
    ) -> Result<Attachment> {
        let mut events = Vec::with_capacity(3);

        let attachment = {
            let mut registration = self.table.entry(key.clone()).or_insert_with(|| {
                trace!(%key, "new registration");
                Registration::new(key.clone())
            });

            if registration.is_attached(worker) {
                warn!(%key, %worker, "rejecting duplicate attach");
                ATTACH_FAILURES_METRIC.with_label_values(&["duplicate_attach"]).inc();
                return Err(RegistryError::DuplicateAttach {
                    worker,
                    key: key.to_string(),
                }
                .into());
            }

            let attachment = self.issue(&mut registration, worker, &mut events);
            ATTACHED_WORKERS_METRIC
                .with_label_values(&[key.to_string().as_str()])
                .set(registration.worker_count() as i64);
            attachment
        };

        ACTIVE_REGISTRATIONS_METRIC.set(self.table.len() as i64);
        self.publish_all(events);
        Ok(attachment)
    }

    /// Runs inside the entry lock of `registration`.
    fn issue(
        &self,
        registration: &mut Registration,
        worker: WorkerId,
        events: &mut Vec<RegistryEvent>,
    ) -> Attachment {
        let key = registration.key().clone();

        let created = if registration.has_resource() {
            false
        } else {
            match self.factory.create(&key) {
                Ok(resource) => {
                    info!(%key, %worker, "listening resource created");
                    RESOURCE_LIFECYCLE_METRIC.with_label_values(&["created"]).inc();
                    registration.install_resource(resource);
                    events.push(RegistryEvent::ResourceCreated { key: key.clone() });
                    true
                }
                Err(code) => {
                    warn!(%key, %worker, "listening resource creation failed: {}", code);
                    ATTACH_FAILURES_METRIC.with_label_values(&["resource_creation"]).inc();
                    registration.record_creation_failure(code);
                    registration.push_worker(worker, None);
                    events.push(RegistryEvent::ResourceCreationFailed { key, worker, code });
                    return Attachment::Failed(code);
                }
            }
        };

        match duplicate_for_worker(registration) {
            Ok((instance, issued)) => {
                registration.push_worker(worker, Some(instance));
                debug!(
                    %key,
                    %worker,
                    workers = registration.worker_count(),
                    "worker attached"
                );
                events.push(RegistryEvent::WorkerAttached { key, worker });
                Attachment::Issued(issued)
            }
            Err(e) => {
                let code = ErrorCode::from_io(&e);
                warn!(%key, %worker, "failed to duplicate listening resource: {}", e);
                ATTACH_FAILURES_METRIC.with_label_values(&["handle_duplication"]).inc();
                // A resource created by this call must not outlive the failed attach.
                if created && registration.discard_resource() {
                    registration.record_creation_failure(code);
                    RESOURCE_LIFECYCLE_METRIC.with_label_values(&["closed"]).inc();
                    events.push(RegistryEvent::ResourceClosed { key: key.clone() });
                }
                registration.push_worker(worker, None);
                Attachment::Failed(code)
            }
        }
    }

    /// Detaches `worker` from `key`, closing its handle instance. The
    /// registration and its resource are released with the last worker.
    ///
    /// Returns false, without side effects, when `worker` is not attached.
    pub fn detach(
        &self,
        worker: WorkerId,
        key: &BindTarget,
    ) -> bool {
        let (remaining, resource_closed) = match self.table.entry(key.clone()) {
            Entry::Vacant(_) => {
                trace!(%key, %worker, "detach for unknown registration ignored");
                return false;
            }
            Entry::Occupied(mut occupied) => {
                if !occupied.get_mut().remove_worker(worker) {
                    trace!(%key, %worker, "detach for worker not attached ignored");
                    return false;
                }
                let remaining = occupied.get().worker_count();
                if remaining == 0 {
                    let (_, registration) = occupied.remove_entry();
                    (0, registration.close())
                } else {
                    (remaining, false)
                }
            }
        };

        debug!(%key, %worker, remaining, "worker detached");
        let label = key.to_string();
        let mut events = vec![RegistryEvent::WorkerDetached {
            key: key.clone(),
            worker,
        }];
        if remaining == 0 {
            let _ = ATTACHED_WORKERS_METRIC.remove_label_values(&[label.as_str()]);
            if resource_closed {
                info!(%key, "last worker detached, listening resource closed");
                RESOURCE_LIFECYCLE_METRIC.with_label_values(&["closed"]).inc();
                events.push(RegistryEvent::ResourceClosed { key: key.clone() });
            }
        } else {
            ATTACHED_WORKERS_METRIC.with_label_values(&[label.as_str()]).set(remaining as i64);
        }

        ACTIVE_REGISTRATIONS_METRIC.set(self.table.len() as i64);
        self.publish_all(events);
        true
    }

    /// Detaches `worker` from every key it holds. Invoked by the owner when
    /// the worker exits without detaching.
    pub fn on_worker_exit(
        &self,
        worker: WorkerId,
    ) -> Vec<BindTarget> {
        let released: Vec<BindTarget> = self
            .keys_for_worker(worker)
            .into_iter()
            .filter(|key| self.detach(worker, key))
            .collect();
        info!(%worker, released = released.len(), "worker exit processed");
        released
    }

    /// Removes every registration and closes all handles. Used on
    /// coordinator teardown; returns the number of resources closed.
    pub fn close_all(&self) -> usize {
        let keys: Vec<BindTarget> = self.table.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for key in keys {
            if let Some((key, registration)) = self.table.remove(&key) {
                let workers = registration.worker_count();
                let _ = ATTACHED_WORKERS_METRIC.remove_label_values(&[key.to_string().as_str()]);
                if registration.close() {
                    closed += 1;
                    RESOURCE_LIFECYCLE_METRIC.with_label_values(&["closed"]).inc();
                    self.publish(RegistryEvent::ResourceClosed { key: key.clone() });
                }
                info!(%key, workers, "registration closed on teardown");
            }
        }
        ACTIVE_REGISTRATIONS_METRIC.set(self.table.len() as i64);
        closed
    }

    pub fn contains(
        &self,
        key: &BindTarget,
    ) -> bool {
        self.table.contains_key(key)
    }

    /// Workers attached to `key` in attach order; empty when absent.
    pub fn attached_workers(
        &self,
        key: &BindTarget,
    ) -> Vec<WorkerId> {
        self.inspect(key, |r| r.attached_workers().to_vec()).unwrap_or_default()
    }

    pub fn has_resource(
        &self,
        key: &BindTarget,
    ) -> bool {
        self.inspect(key, Registration::has_resource).unwrap_or(false)
    }

    pub fn keys_for_worker(
        &self,
        worker: WorkerId,
    ) -> Vec<BindTarget> {
        self.table
            .iter()
            .filter(|entry| entry.value().is_attached(worker))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Read access to a registration.
    pub fn inspect<R>(
        &self,
        key: &BindTarget,
        f: impl FnOnce(&Registration) -> R,
    ) -> Option<R> {
        self.table.get(key).map(|entry| f(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn publish(
        &self,
        event: RegistryEvent,
    ) {
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }

    fn publish_all(
        &self,
        events: Vec<RegistryEvent>,
    ) {
        for event in events {
            self.publish(event);
        }
    }
}

/// One descriptor kept by the registry for the worker, one handed to the
/// caller.
fn duplicate_for_worker(registration: &Registration) -> io::Result<(ListenerHandle, ListenerHandle)> {
    let resource = registration
        .resource()
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
    let instance = resource.try_clone()?;
    let issued = instance.try_clone()?;
    Ok((instance, issued))
}
