use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::constants::DEFAULT_REQUEST_CHANNEL_CAPACITY;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinatorConfig {
    /// Buffered worker requests before senders wait
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,

    /// Registry events retained for slow subscribers
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_channel_capacity: default_request_channel_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_channel_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "coordinator request_channel_capacity must be > 0".into(),
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "coordinator event_channel_capacity must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_request_channel_capacity() -> usize {
    DEFAULT_REQUEST_CHANNEL_CAPACITY
}
fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}
