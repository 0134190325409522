// -
// Listener defaults

/// Pending connection queue length handed to `listen(2)`
pub(crate) const DEFAULT_BACKLOG: i32 = 511;

/// Wildcard bind addresses used when a target leaves the address empty
pub(crate) const IPV4_UNSPECIFIED: &str = "0.0.0.0";
pub(crate) const IPV6_UNSPECIFIED: &str = "::";

// -
// Coordinator channels

pub(crate) const DEFAULT_REQUEST_CHANNEL_CAPACITY: usize = 1024;
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

// -
// Descriptor transfer frame: sequence number (u64 BE) + family tag (u8)

pub(crate) const TRANSFER_FRAME_LEN: usize = 9;

// -
// Configuration

/// Environment variable prefix, e.g. `PORTSHARE__SERVE__PORT=8080`
pub(crate) const CONFIG_ENV_PREFIX: &str = "PORTSHARE";
