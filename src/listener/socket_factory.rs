use std::io;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;

use socket2::Domain;
use socket2::Protocol;
use socket2::SockAddr;
use socket2::Socket;
use socket2::Type;
use tracing::debug;
use tracing::trace;

use super::ErrorCode;
use super::ListenerFactory;
use super::ListenerHandle;
use crate::constants::IPV4_UNSPECIFIED;
use crate::constants::IPV6_UNSPECIFIED;
use crate::AddressFamily;
use crate::BindFlags;
use crate::BindTarget;
use crate::ListenerConfig;

/// [`ListenerFactory`] backed by real sockets.
///
/// TCP targets get `SO_REUSEADDR` (when configured) and `SO_REUSEPORT` when
/// the target requests [`BindFlags::REUSE_PORT`]; IPv6 targets honour
/// [`BindFlags::IPV6_ONLY`]. Unix targets bind a stream socket at the path.
#[derive(Debug, Clone)]
pub struct SocketListenerFactory {
    config: ListenerConfig,
}

impl SocketListenerFactory {
    pub fn new(config: ListenerConfig) -> Self {
        Self { config }
    }

    fn open(
        &self,
        target: &BindTarget,
    ) -> io::Result<Socket> {
        let (domain, protocol, addr) = match target.family() {
            AddressFamily::Ipv4 | AddressFamily::Ipv6 => {
                let ip = resolve_ip(target)?;
                let domain = match ip {
                    IpAddr::V4(_) => Domain::IPV4,
                    IpAddr::V6(_) => Domain::IPV6,
                };
                let addr = SockAddr::from(SocketAddr::new(ip, target.port()));
                (domain, Some(Protocol::TCP), addr)
            }
            AddressFamily::Unix => {
                if target.address().is_empty() {
                    return Err(invalid_input("unix socket path cannot be empty"));
                }
                (Domain::UNIX, None, SockAddr::unix(target.address())?)
            }
        };

        // Socket is dropped (closed) on every early return below.
        let socket = Socket::new(domain, Type::STREAM, protocol)?;

        if target.family() != AddressFamily::Unix {
            if self.config.reuse_address {
                socket.set_reuse_address(true)?;
            }
            if target.flags().contains(BindFlags::REUSE_PORT) {
                socket.set_reuse_port(true)?;
            }
            if target.family() == AddressFamily::Ipv6 {
                socket.set_only_v6(target.flags().contains(BindFlags::IPV6_ONLY))?;
            }
        }

        socket.set_nonblocking(self.config.nonblocking)?;
        socket.bind(&addr)?;
        socket.listen(self.config.backlog)?;

        Ok(socket)
    }
}

impl ListenerFactory for SocketListenerFactory {
    fn create(
        &self,
        target: &BindTarget,
    ) -> std::result::Result<ListenerHandle, ErrorCode> {
        trace!(%target, "creating listening socket");
        match self.open(target) {
            Ok(socket) => {
                debug!(%target, local_addr = ?socket.local_addr().ok().and_then(|a| a.as_socket()), "listening socket created");
                Ok(ListenerHandle::new(socket, target.family()))
            }
            Err(e) => {
                debug!(%target, "listening socket creation failed: {}", e);
                Err(ErrorCode::from_io(&e))
            }
        }
    }
}

/// Parses the target address for its family. An empty address means the
/// family's wildcard address; `localhost` maps to the loopback address.
pub(crate) fn resolve_ip(target: &BindTarget) -> io::Result<IpAddr> {
    let address = target.address();
    let ip = match (target.family(), address) {
        (AddressFamily::Ipv4, "") => IPV4_UNSPECIFIED.parse().ok(),
        (AddressFamily::Ipv6, "") => IPV6_UNSPECIFIED.parse().ok(),
        (AddressFamily::Ipv4, "localhost") => Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        (AddressFamily::Ipv6, "localhost") => Some(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        (AddressFamily::Ipv4, a) => a.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
        (AddressFamily::Ipv6, a) => a
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<Ipv6Addr>()
            .ok()
            .map(IpAddr::V6),
        (AddressFamily::Unix, _) => None,
    };

    ip.ok_or_else(|| invalid_input(&format!("invalid {:?} address: {:?}", target.family(), address)))
}

fn invalid_input(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}
