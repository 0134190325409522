use std::net::IpAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Settings of the bundled demo server: where the shared endpoint lives and
/// how many in-process workers accept on it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServeConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 0 means one worker per available CPU
    #[serde(default)]
    pub workers: usize,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            workers: 0,
            log_dir: default_log_dir(),
        }
    }
}

impl ServeConfig {
    pub fn validate(&self) -> Result<()> {
        self.ip()?;
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "serve log_dir cannot be empty".into(),
            )));
        }
        Ok(())
    }

    pub fn ip(&self) -> Result<IpAddr> {
        self.address.parse().map_err(|_| {
            Error::Config(ConfigError::Message(format!(
                "serve address {:?} is not an IP address",
                self.address
            )))
        })
    }

    /// Configured worker count, falling back to available parallelism.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
