use serde::Deserialize;
use serde::Serialize;

use crate::BindPermission;
use crate::Result;

/// Bind allow-list. When disabled every target may be bound.
///
/// Rules use the `host[/netmask][:port]` form, e.g. `127.0.0.1:8000`,
/// `*:443`, `10.0.0.0/8:*`, `[::1]:8080` or `*`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PermissionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub allow: Vec<String>,
}

impl PermissionConfig {
    /// Every rule must parse.
    pub fn validate(&self) -> Result<()> {
        BindPermission::from_config(self).map(|_| ())
    }
}
