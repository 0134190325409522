//! OS listening resources.
//!
//! A [`ListenerHandle`] owns one descriptor referring to a kernel listening
//! socket. The registry produces one handle per attached worker by
//! duplicating the shared resource, so closing a worker's handle never
//! affects another worker.
//!
//! Socket creation sits behind [`ListenerFactory`], the black-box primitive
//! `create(address, port, family, flags) -> resource | error code`.
mod socket_factory;
pub use socket_factory::*;


use std::fmt;
use std::io;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::net::UnixListener;

#[cfg(test)]
use mockall::automock;
use socket2::SockAddr;
use socket2::Socket;

use crate::AddressFamily;
use crate::BindTarget;

/// Non-zero OS error number reported when a listening resource cannot be
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// Zero is not an error; it is coerced to `EIO`.
    pub const fn from_raw(code: i32) -> Self {
        if code == 0 {
            Self(libc::EIO)
        } else {
            Self(code)
        }
    }

    /// Uses the raw OS error when present, otherwise maps the error kind.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return Self::from_raw(code);
        }
        Self::from_raw(match err.kind() {
            io::ErrorKind::InvalidInput => libc::EINVAL,
            io::ErrorKind::PermissionDenied => libc::EACCES,
            io::ErrorKind::AddrInUse => libc::EADDRINUSE,
            io::ErrorKind::AddrNotAvailable => libc::EADDRNOTAVAIL,
            _ => libc::EIO,
        })
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "errno {} ({})", self.0, io::Error::from_raw_os_error(self.0))
    }
}

impl From<io::Error> for ErrorCode {
    fn from(err: io::Error) -> Self {
        ErrorCode::from_io(&err)
    }
}

/// Owned descriptor of a listening socket.
#[derive(Debug)]
pub struct ListenerHandle {
    socket: Socket,
    family: AddressFamily,
}

impl ListenerHandle {
    pub fn new(
        socket: Socket,
        family: AddressFamily,
    ) -> Self {
        Self { socket, family }
    }

    /// Wraps a descriptor received from another process.
    pub fn from_owned_fd(
        fd: OwnedFd,
        family: AddressFamily,
    ) -> Self {
        Self {
            socket: Socket::from(fd),
            family,
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Duplicates the descriptor. Both handles refer to the same kernel
    /// socket and share its accept queue.
    pub fn try_clone(&self) -> io::Result<ListenerHandle> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            family: self.family,
        })
    }

    pub fn local_addr(&self) -> io::Result<SockAddr> {
        self.socket.local_addr()
    }

    pub fn set_nonblocking(
        &self,
        nonblocking: bool,
    ) -> io::Result<()> {
        self.socket.set_nonblocking(nonblocking)
    }

    pub fn into_tcp_listener(self) -> io::Result<std::net::TcpListener> {
        match self.family {
            AddressFamily::Ipv4 | AddressFamily::Ipv6 => Ok(self.socket.into()),
            AddressFamily::Unix => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unix domain listener cannot be converted into a TCP listener",
            )),
        }
    }

    pub fn into_unix_listener(self) -> io::Result<UnixListener> {
        match self.family {
            AddressFamily::Unix => Ok(self.socket.into()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "TCP listener cannot be converted into a unix domain listener",
            )),
        }
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.socket.into()
    }
}

impl AsRawFd for ListenerHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsFd for ListenerHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

/// Creates the OS listening resource for a bind target.
///
/// Implementations must be atomic: either a bound, listening socket is
/// returned or nothing was left open.
#[cfg_attr(test, automock)]
pub trait ListenerFactory: Send + Sync + 'static {
    fn create(
        &self,
        target: &BindTarget,
    ) -> std::result::Result<ListenerHandle, ErrorCode>;
}
