use crate::BindTarget;
use crate::ErrorCode;
use crate::WorkerId;

/// Lifecycle notifications published by the registry.
///
/// Subscribers observe resource creation and release without polling the
/// table; a lagging or absent subscriber never affects attach/detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    ResourceCreated { key: BindTarget },
    ResourceCreationFailed { key: BindTarget, worker: WorkerId, code: ErrorCode },
    WorkerAttached { key: BindTarget, worker: WorkerId },
    WorkerDetached { key: BindTarget, worker: WorkerId },
    ResourceClosed { key: BindTarget },
}
