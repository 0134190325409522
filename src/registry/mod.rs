//! Handle-sharing registry.
//!
//! Maps each [`BindTarget`] to a [`Registration`] that owns the listening
//! resource for that target. The resource is created on the first attach of
//! an episode and closed, together with the registration, when the last
//! worker detaches:
//!
//! ```text
//! Absent --attach--> Active(1..N) --detach last--> Absent
//! ```
//!
//! There is no paused state; a later attach for the same key starts a fresh
//! resource.
mod bind_target;
mod event;
mod handle_registry;
mod registration;

pub use bind_target::*;
pub use event::*;
pub use handle_registry::*;
pub use registration::*;
