use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::ops::BitOr;
use std::ops::BitOrAssign;

use serde::Deserialize;
use serde::Serialize;

/// Identifies a worker process (or task) participating in accepting
/// connections for a shared bind target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unix,
}

impl AddressFamily {
    /// Single-byte tag used on the descriptor transfer wire.
    pub(crate) const fn tag(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 6,
            AddressFamily::Unix => 1,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            4 => Some(AddressFamily::Ipv4),
            6 => Some(AddressFamily::Ipv6),
            1 => Some(AddressFamily::Unix),
            _ => None,
        }
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

/// Socket flags requested for a bind target.
///
/// Bits outside the named constants are carried through untouched so that
/// two targets only compare equal when every requested bit matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BindFlags(u32);

impl BindFlags {
    pub const NONE: BindFlags = BindFlags(0);
    /// Restrict an IPv6 socket to IPv6 traffic (`IPV6_V6ONLY`)
    pub const IPV6_ONLY: BindFlags = BindFlags(1);
    /// Let independent sockets bind the same address/port (`SO_REUSEPORT`)
    pub const REUSE_PORT: BindFlags = BindFlags(1 << 1);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(
        self,
        other: BindFlags,
    ) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BindFlags {
    type Output = BindFlags;

    fn bitor(
        self,
        rhs: BindFlags,
    ) -> BindFlags {
        BindFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BindFlags {
    fn bitor_assign(
        &mut self,
        rhs: BindFlags,
    ) {
        self.0 |= rhs.0;
    }
}

/// The (address, port, family, flags) tuple a listening resource binds to.
///
/// Immutable once constructed and used as the registry key. For
/// [`AddressFamily::Unix`] the address is the socket path and the port is
/// ignored by the OS, though it still takes part in key equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindTarget {
    address: String,
    port: u16,
    family: AddressFamily,
    flags: BindFlags,
}

impl BindTarget {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        family: AddressFamily,
        flags: BindFlags,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            family,
            flags,
        }
    }

    pub fn tcp(
        addr: SocketAddr,
        flags: BindFlags,
    ) -> Self {
        Self::new(
            addr.ip().to_string(),
            addr.port(),
            AddressFamily::of(&addr.ip()),
            flags,
        )
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self::new(path, 0, AddressFamily::Unix, BindFlags::NONE)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn flags(&self) -> BindFlags {
        self.flags
    }

    pub fn reuse_port(&self) -> bool {
        self.flags.contains(BindFlags::REUSE_PORT)
    }
}

impl fmt::Display for BindTarget {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.family {
            AddressFamily::Ipv4 => write!(f, "tcp4://{}:{}", self.address, self.port)?,
            AddressFamily::Ipv6 => write!(f, "tcp6://[{}]:{}", self.address, self.port)?,
            AddressFamily::Unix => write!(f, "unix://{}", self.address)?,
        }
        if !self.flags.is_empty() {
            write!(f, "?flags={:#x}", self.flags.bits())?;
        }
        Ok(())
    }
}
