//! Assembles a [`Coordinator`] from configuration.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let transport = Arc::new(LocalHandleTransport::new());
//! let mut coordinator = CoordinatorBuilder::new(config, shutdown_rx)
//!     .transport(transport.clone())
//!     .build()?;
//! let handle = coordinator.handle();
//! tokio::spawn(async move { coordinator.run().await });
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::Coordinator;
use crate::BindPermission;
use crate::Error;
use crate::HandleRegistry;
use crate::HandleTransport;
use crate::ListenerFactory;
use crate::PortShareConfig;
use crate::Result;
use crate::SocketListenerFactory;

pub struct CoordinatorBuilder {
    config: PortShareConfig,
    listener_factory: Option<Arc<dyn ListenerFactory>>,
    transport: Option<Arc<dyn HandleTransport>>,
    shutdown_signal: watch::Receiver<()>,
}

impl CoordinatorBuilder {
    pub fn new(
        config: PortShareConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            listener_factory: None,
            transport: None,
            shutdown_signal,
        }
    }

    /// Overrides the socket factory built from the `listener` section.
    pub fn listener_factory(
        mut self,
        factory: Arc<dyn ListenerFactory>,
    ) -> Self {
        self.listener_factory = Some(factory);
        self
    }

    pub fn transport(
        mut self,
        transport: Arc<dyn HandleTransport>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration and wires the registry.
    ///
    /// # Errors
    /// Invalid configuration, a malformed permission rule, or no transport.
    pub fn build(self) -> Result<Coordinator> {
        let config = self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Fatal("coordinator requires a handle transport".to_string()))?;
        let factory = self
            .listener_factory
            .unwrap_or_else(|| Arc::new(SocketListenerFactory::new(config.listener.clone())));
        let permission = BindPermission::from_config(&config.permission)?;

        let registry = Arc::new(HandleRegistry::new(
            factory,
            config.coordinator.event_channel_capacity,
        ));
        debug!(?config, "coordinator built");

        Ok(Coordinator::new(
            registry,
            transport,
            permission,
            config.coordinator.request_channel_capacity,
            self.shutdown_signal,
        ))
    }
}
