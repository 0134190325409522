use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_BACKLOG;
use crate::Error;
use crate::Result;

/// Socket options applied to every listening resource the coordinator
/// creates. Per-target options (reuse-port, IPv6-only) travel in the
/// target's flags instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListenerConfig {
    /// `listen(2)` backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Set `SO_REUSEADDR` on TCP sockets
    #[serde(default = "default_reuse_address")]
    pub reuse_address: bool,

    /// Create sockets in non-blocking mode, as async runtimes expect
    #[serde(default = "default_nonblocking")]
    pub nonblocking: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
            reuse_address: default_reuse_address(),
            nonblocking: default_nonblocking(),
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backlog <= 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "listener backlog must be > 0, got {}",
                self.backlog
            ))));
        }
        Ok(())
    }
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}
fn default_reuse_address() -> bool {
    true
}
fn default_nonblocking() -> bool {
    true
}
