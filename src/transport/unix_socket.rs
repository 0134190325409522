use std::collections::HashMap;
use std::collections::HashSet;
use std::io::IoSlice;
use std::io::IoSliceMut;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use nix::sys::socket::recvmsg;
use nix::sys::socket::sendmsg;
use nix::sys::socket::ControlMessage;
use nix::sys::socket::ControlMessageOwned;
use nix::sys::socket::MsgFlags;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::HandleReceiver;
use super::HandleTransport;
use super::TransferToken;
use crate::constants::TRANSFER_FRAME_LEN;
use crate::AddressFamily;
use crate::ListenerHandle;
use crate::TransportError;
use crate::WorkerId;

/// Coordinator side of descriptor passing over unix domain sockets.
///
/// Every worker process gets its own connected stream. A transfer is a
/// single `sendmsg` carrying a [`TRANSFER_FRAME_LEN`]-byte frame
/// (sequence number, big endian, then the address family tag) and the
/// descriptor as `SCM_RIGHTS`. The token is the sequence number.
///
/// A sent descriptor cannot be pulled back out of the worker's receive
/// queue. [`HandleTransport::revoke`] follows it with a revocation frame
/// instead, and the receiver closes the descriptor when it reads that frame.
#[derive(Debug, Default)]
pub struct UnixSocketTransport {
    channels: DashMap<WorkerId, UnixStream>,
    sequence: AtomicU64,
}

impl UnixSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the stream descriptors for `worker` are sent on. Replaces
    /// (and closes) a previous stream.
    pub fn connect_worker(
        &self,
        worker: WorkerId,
        stream: UnixStream,
    ) {
        debug!(%worker, "descriptor channel connected");
        self.channels.insert(worker, stream);
    }

    pub fn disconnect_worker(
        &self,
        worker: WorkerId,
    ) -> bool {
        self.channels.remove(&worker).is_some()
    }
}

impl HandleTransport for UnixSocketTransport {
    fn send(
        &self,
        worker: WorkerId,
        handle: ListenerHandle,
    ) -> Result<TransferToken, TransportError> {
        let channel = self.channels.get(&worker).ok_or(TransportError::UnknownWorker(worker))?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = encode_frame(sequence, handle.family());
        let iov = [IoSlice::new(&frame)];
        let fds = [handle.as_raw_fd()];
        let cmsg = [ControlMessage::ScmRights(&fds)];

        let sent = sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)?;
        if sent != TRANSFER_FRAME_LEN {
            return Err(TransportError::Protocol(format!("short write of {sent} bytes")));
        }

        trace!(%worker, sequence, "descriptor sent");
        // The kernel holds its own reference until the worker receives it.
        drop(handle);
        Ok(TransferToken::new(sequence.to_string()))
    }

    fn revoke(
        &self,
        worker: WorkerId,
        token: &TransferToken,
    ) -> bool {
        let Ok(sequence) = token.as_str().parse::<u64>() else {
            return false;
        };
        let Some(channel) = self.channels.get(&worker) else {
            return false;
        };
        let mut stream: &UnixStream = &channel;
        match stream.write_all(&encode_revoke_frame(sequence)) {
            Ok(()) => {
                debug!(%worker, sequence, "descriptor revoked");
                true
            }
            Err(e) => {
                warn!(%worker, sequence, "failed to send revocation: {}", e);
                false
            }
        }
    }

    /// Closes the worker's channel. Descriptors still queued on it belong to
    /// the worker's end and close with it, so nothing is counted here.
    fn release_worker(
        &self,
        worker: WorkerId,
    ) -> usize {
        if self.disconnect_worker(worker) {
            debug!(%worker, "descriptor channel released");
        }
        0
    }
}

/// What a worker reads off its channel.
#[derive(Debug)]
enum Received {
    Handle(u64, ListenerHandle),
    Revoked(u64),
}

/// Worker side of [`UnixSocketTransport`].
///
/// Frames arrive in send order; frames read while waiting for a different
/// token are kept until redeemed.
#[derive(Debug)]
pub struct UnixHandleReceiver {
    stream: Mutex<UnixStream>,
    pending: Mutex<HashMap<u64, ListenerHandle>>,
    revoked: Mutex<HashSet<u64>>,
}

impl UnixHandleReceiver {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            pending: Mutex::new(HashMap::new()),
            revoked: Mutex::new(HashSet::new()),
        }
    }

    fn read_frame(&self) -> Result<Received, TransportError> {
        let stream = self.stream.lock();
        let mut frame = [0u8; TRANSFER_FRAME_LEN];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

        let (bytes, mut fds) = {
            let mut iov = [IoSliceMut::new(&mut frame)];
            let msg = recvmsg::<()>(stream.as_raw_fd(), &mut iov, Some(&mut cmsg_buf), recv_flags())?;
            let mut fds = Vec::new();
            for cmsg in msg.cmsgs()? {
                if let ControlMessageOwned::ScmRights(received) = cmsg {
                    // SAFETY: the kernel just installed these descriptors in our table.
                    fds.extend(received.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                }
            }
            (msg.bytes, fds)
        };

        if bytes == 0 {
            return Err(TransportError::Closed);
        }
        if bytes != TRANSFER_FRAME_LEN {
            return Err(TransportError::Protocol(format!("frame of {bytes} bytes")));
        }
        let (sequence, family) = match decode_frame(&frame)? {
            Frame::Handle { sequence, family } => (sequence, family),
            Frame::Revoke { sequence } => {
                if !fds.is_empty() {
                    warn!(sequence, count = fds.len(), "closing descriptors attached to a revocation");
                }
                return Ok(Received::Revoked(sequence));
            }
        };
        if fds.len() > 1 {
            warn!(sequence, extra = fds.len() - 1, "closing unexpected extra descriptors");
            fds.truncate(1);
        }
        let fd = fds.pop().ok_or(TransportError::MissingDescriptor)?;
        Ok(Received::Handle(sequence, ListenerHandle::from_owned_fd(fd, family)))
    }
}

impl HandleReceiver for UnixHandleReceiver {
    fn receive(
        &self,
        token: &TransferToken,
    ) -> Result<ListenerHandle, TransportError> {
        let wanted: u64 = token
            .as_str()
            .parse()
            .map_err(|_| TransportError::UnknownToken(token.to_string()))?;

        if self.revoked.lock().remove(&wanted) {
            return Err(TransportError::UnknownToken(token.to_string()));
        }
        if let Some(handle) = self.pending.lock().remove(&wanted) {
            return Ok(handle);
        }

        loop {
            match self.read_frame()? {
                Received::Handle(sequence, handle) if sequence == wanted => {
                    trace!(sequence, "descriptor received");
                    return Ok(handle);
                }
                Received::Handle(sequence, handle) => {
                    trace!(sequence, wanted, "parking out-of-order descriptor");
                    self.pending.lock().insert(sequence, handle);
                }
                Received::Revoked(sequence) => {
                    // The descriptor frame always precedes its revocation.
                    if self.pending.lock().remove(&sequence).is_some() {
                        debug!(sequence, "revoked descriptor closed");
                    }
                    if sequence == wanted {
                        return Err(TransportError::UnknownToken(token.to_string()));
                    }
                    self.revoked.lock().insert(sequence);
                }
            }
        }
    }
}

/// Family tag slot value marking a revocation frame.
const REVOKE_TAG: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame {
    Handle { sequence: u64, family: AddressFamily },
    Revoke { sequence: u64 },
}

pub(crate) fn encode_frame(
    sequence: u64,
    family: AddressFamily,
) -> [u8; TRANSFER_FRAME_LEN] {
    let mut frame = [0u8; TRANSFER_FRAME_LEN];
    frame[..8].copy_from_slice(&sequence.to_be_bytes());
    frame[8] = family.tag();
    frame
}

pub(crate) fn encode_revoke_frame(sequence: u64) -> [u8; TRANSFER_FRAME_LEN] {
    let mut frame = [0u8; TRANSFER_FRAME_LEN];
    frame[..8].copy_from_slice(&sequence.to_be_bytes());
    frame[8] = REVOKE_TAG;
    frame
}

pub(crate) fn decode_frame(frame: &[u8; TRANSFER_FRAME_LEN]) -> Result<Frame, TransportError> {
    let mut sequence = [0u8; 8];
    sequence.copy_from_slice(&frame[..8]);
    let sequence = u64::from_be_bytes(sequence);
    if frame[8] == REVOKE_TAG {
        return Ok(Frame::Revoke { sequence });
    }
    let family = AddressFamily::from_tag(frame[8])
        .ok_or_else(|| TransportError::Protocol(format!("unknown family tag {}", frame[8])))?;
    Ok(Frame::Handle { sequence, family })
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}
