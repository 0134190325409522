//! Request-driven front end of the handle registry.
//!
//! Workers talk to the [`Coordinator`] through a [`CoordinatorHandle`];
//! issued handles travel back through a [`HandleTransport`](crate::HandleTransport).
mod builder;
#[allow(clippy::module_inception)]
mod coordinator;
mod handle;
mod request;
mod worker;

pub use builder::*;
pub use coordinator::*;
pub use handle::*;
pub use request::*;
pub use worker::*;
