use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Once;

use portshare::BindFlags;
use portshare::BindTarget;
use portshare::HandleRegistry;
use portshare::ListenerConfig;
use portshare::SocketListenerFactory;

static LOGGER_INIT: Once = Once::new();

/// Installs a test subscriber once per test binary; honours `RUST_LOG`.
pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Loopback TCP target; port 0 asks the OS for an ephemeral port.
pub fn loopback(
    port: u16,
    flags: BindFlags,
) -> BindTarget {
    BindTarget::tcp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port), flags)
}

pub fn socket_registry() -> HandleRegistry {
    HandleRegistry::new(Arc::new(SocketListenerFactory::new(ListenerConfig::default())), 64)
}
