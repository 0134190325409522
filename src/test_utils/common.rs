use std::sync::Arc;

use socket2::Domain;
use socket2::Socket;
use socket2::Type;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::AddressFamily;
use crate::BindFlags;
use crate::BindTarget;
use crate::CoordinatorBuilder;
use crate::CoordinatorHandle;
use crate::HandleRegistry;
use crate::ListenerFactory;
use crate::ListenerHandle;
use crate::LocalHandleTransport;
use crate::PortShareConfig;
use crate::RegistryEvent;
use crate::Result;
use crate::Worker;
use crate::WorkerId;

/// Real but unbound socket; enough for registry bookkeeping tests.
pub(crate) fn unbound_handle() -> ListenerHandle {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).expect("socket should be created");
    ListenerHandle::new(socket, AddressFamily::Ipv4)
}

pub(crate) fn reuse_port_target(port: u16) -> BindTarget {
    BindTarget::new("127.0.0.1", port, AddressFamily::Ipv4, BindFlags::REUSE_PORT)
}

/// Loopback target on an ephemeral port.
pub(crate) fn loopback_target() -> BindTarget {
    reuse_port_target(0)
}

pub(crate) fn drain_events(rx: &mut broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Coordinator running on the current tokio runtime with an in-process
/// transport.
pub(crate) struct TestCoordinator {
    pub handle: CoordinatorHandle,
    pub registry: Arc<HandleRegistry>,
    pub transport: Arc<LocalHandleTransport>,
    pub shutdown_tx: watch::Sender<()>,
    pub task: JoinHandle<Result<()>>,
}

impl TestCoordinator {
    pub(crate) fn spawn(
        config: PortShareConfig,
        factory: Option<Arc<dyn ListenerFactory>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let transport = Arc::new(LocalHandleTransport::new());
        let mut builder = CoordinatorBuilder::new(config, shutdown_rx).transport(transport.clone());
        if let Some(factory) = factory {
            builder = builder.listener_factory(factory);
        }
        let mut coordinator = builder.build().expect("coordinator should build");
        let handle = coordinator.handle();
        let registry = coordinator.registry();
        let task = tokio::spawn(async move { coordinator.run().await });
        Self {
            handle,
            registry,
            transport,
            shutdown_tx,
            task,
        }
    }

    pub(crate) fn worker(
        &self,
        id: u64,
    ) -> Worker {
        Worker::new(WorkerId::new(id), self.handle.clone(), self.transport.clone())
    }

    pub(crate) async fn shutdown(self) {
        self.shutdown_tx.send(()).expect("coordinator should be running");
        self.task
            .await
            .expect("coordinator task should not panic")
            .expect("coordinator should stop cleanly");
    }
}
