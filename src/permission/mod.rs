//! Bind allow-list consulted by the coordinator before a worker may attach.
mod bind_permission;
pub use bind_permission::*;

#[cfg(test)]
mod bind_permission_test;
