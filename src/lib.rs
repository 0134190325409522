//! Listener sharing for multi-worker servers.
//!
//! A coordinator owns one listening socket per bind target and gives every
//! attached worker its own descriptor of it, so all workers accept from the
//! same kernel queue. The socket is created on the first attach and closed
//! when the last worker detaches.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let transport = Arc::new(LocalHandleTransport::new());
//! let mut coordinator = CoordinatorBuilder::new(PortShareConfig::new()?, shutdown_rx)
//!     .transport(transport.clone())
//!     .build()?;
//! let worker = Worker::new(WorkerId::new(1), coordinator.handle(), transport);
//! tokio::spawn(async move { coordinator.run().await });
//!
//! let target = BindTarget::tcp("0.0.0.0:8000".parse()?, BindFlags::REUSE_PORT);
//! let listener = worker.listen_tcp(&target).await?;
//! ```
mod config;
mod constants;
mod coordinator;
mod errors;
mod listener;
mod metrics;
mod permission;
mod registry;
mod transport;

pub use config::*;
pub use coordinator::*;
pub use errors::*;
pub use listener::*;
pub use metrics::*;
pub use permission::*;
pub use registry::*;
pub use transport::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
