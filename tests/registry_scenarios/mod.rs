//! Registry scenarios against real sockets.
//!
//! 1. First attach creates the listening socket; later attaches reuse it
//!    through distinct descriptors.
//! 2. The last detach closes the socket and removes the registration; the
//!    next attach starts over.
//! 3. A bind conflict fails the attach with the OS error; once the conflict
//!    is gone the next attach on the same key succeeds.
//! 4. Duplicate attach, unknown detach and worker exit.

use std::net::TcpListener;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use portshare::Attachment;
use portshare::BindFlags;
use portshare::BindTarget;
use portshare::Error;
use portshare::ErrorCode;
use portshare::HandleRegistry;
use portshare::ListenerConfig;
use portshare::ListenerFactory;
use portshare::ListenerHandle;
use portshare::RegistryError;
use portshare::RegistryEvent;
use portshare::SocketListenerFactory;
use portshare::WorkerId;

use crate::common::enable_logger;
use crate::common::loopback;
use crate::common::socket_registry;

const W1: WorkerId = WorkerId::new(1);
const W2: WorkerId = WorkerId::new(2);
const W3: WorkerId = WorkerId::new(3);

fn issued(attachment: Attachment) -> ListenerHandle {
    match attachment {
        Attachment::Issued(handle) => handle,
        Attachment::Failed(code) => panic!("attach failed: {code}"),
    }
}

#[test]
fn test_attach_reuses_one_socket_across_workers() {
    enable_logger();
    let registry = socket_registry();
    let key = loopback(0, BindFlags::REUSE_PORT);

    let h1 = issued(registry.attach(&key, W1).unwrap());
    let h2 = issued(registry.attach(&key, W2).unwrap());
    let addr = h1.local_addr().unwrap().as_socket().unwrap();

    assert_ne!(h1.as_raw_fd(), h2.as_raw_fd());
    assert_eq!(addr, h2.local_addr().unwrap().as_socket().unwrap());
    assert_eq!(registry.attached_workers(&key), vec![W1, W2]);

    // Closing one worker's handle leaves the shared socket accepting.
    drop(h1);
    let _client = TcpStream::connect(addr).unwrap();
    let listener = h2.into_tcp_listener().unwrap();
    listener.set_nonblocking(false).unwrap();
    assert!(listener.accept().is_ok());
}

#[test]
fn test_last_detach_closes_socket_and_next_attach_starts_over() {
    enable_logger();
    let registry = socket_registry();
    let key = loopback(0, BindFlags::REUSE_PORT);
    let mut events = registry.subscribe();

    drop(registry.attach(&key, W1).unwrap());
    drop(registry.attach(&key, W2).unwrap());

    assert!(registry.detach(W1, &key));
    assert!(registry.has_resource(&key));
    assert!(registry.detach(W2, &key));
    assert!(!registry.contains(&key));
    assert!(registry.is_empty());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&RegistryEvent::ResourceCreated { key: key.clone() }));
    assert_eq!(seen.last(), Some(&RegistryEvent::ResourceClosed { key: key.clone() }));

    assert!(registry.attach(&key, W3).unwrap().is_issued());
    assert_eq!(registry.attached_workers(&key), vec![W3]);
    assert!(registry.has_resource(&key));
}

#[test]
fn test_bind_conflict_then_retry_succeeds() {
    enable_logger();
    let blocker = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();
    let key = loopback(port, BindFlags::NONE);
    let registry = socket_registry();

    let attachment = registry.attach(&key, W1).unwrap();
    assert_eq!(attachment.error_code(), Some(ErrorCode::from_raw(libc::EADDRINUSE)));
    assert!(!registry.has_resource(&key));
    assert_eq!(registry.attached_workers(&key), vec![W1]);
    assert_eq!(
        registry.inspect(&key, |r| r.last_error()).flatten(),
        Some(ErrorCode::from_raw(libc::EADDRINUSE))
    );

    drop(blocker);

    let handle = issued(registry.attach(&key, W2).unwrap());
    assert_eq!(handle.local_addr().unwrap().as_socket().unwrap().port(), port);
    assert_eq!(registry.attached_workers(&key), vec![W1, W2]);
    assert!(registry.inspect(&key, |r| r.last_error()).flatten().is_none());

    // The failed worker detaches like any other.
    assert!(registry.detach(W1, &key));
    assert!(registry.detach(W2, &key));
    assert!(registry.is_empty());
}

#[test]
fn test_invalid_address_reports_einval() {
    let registry = socket_registry();
    let key = BindTarget::new("256.1.1.1", 80, portshare::AddressFamily::Ipv4, BindFlags::NONE);

    let attachment = registry.attach(&key, W1).unwrap();

    assert_eq!(attachment.error_code(), Some(ErrorCode::from_raw(libc::EINVAL)));
    assert!(registry.detach(W1, &key));
    assert!(registry.is_empty());
}

#[test]
fn test_duplicate_attach_and_unknown_detach() {
    let registry = socket_registry();
    let key = loopback(0, BindFlags::REUSE_PORT);
    let other = loopback(1, BindFlags::REUSE_PORT);

    drop(registry.attach(&key, W1).unwrap());
    let err = registry.attach(&key, W1).unwrap_err();
    assert!(matches!(err, Error::Registry(RegistryError::DuplicateAttach { .. })));
    assert_eq!(registry.attached_workers(&key), vec![W1]);

    assert!(!registry.detach(W2, &key));
    assert!(!registry.detach(W1, &other));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_worker_exit_releases_every_key() {
    let registry = socket_registry();
    let a = loopback(0, BindFlags::REUSE_PORT);
    let b = loopback(0, BindFlags::REUSE_PORT | BindFlags::from_bits(1 << 8));

    drop(registry.attach(&a, W1).unwrap());
    drop(registry.attach(&b, W1).unwrap());
    drop(registry.attach(&b, W2).unwrap());

    let mut released = registry.on_worker_exit(W1);
    released.sort_by_key(|k| k.to_string());
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort_by_key(|k| k.to_string());
    assert_eq!(released, expected);

    assert!(!registry.contains(&a));
    assert_eq!(registry.attached_workers(&b), vec![W2]);
    assert!(registry.on_worker_exit(W1).is_empty());
}

/// Fails the first `failures` creations, then delegates to real sockets.
struct FlakyFactory {
    failures: usize,
    calls: AtomicUsize,
    inner: SocketListenerFactory,
}

impl ListenerFactory for FlakyFactory {
    fn create(
        &self,
        target: &BindTarget,
    ) -> Result<ListenerHandle, ErrorCode> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(ErrorCode::from_raw(libc::EMFILE));
        }
        self.inner.create(target)
    }
}

#[test]
fn test_every_attach_retries_until_creation_succeeds() {
    let factory = Arc::new(FlakyFactory {
        failures: 2,
        calls: AtomicUsize::new(0),
        inner: SocketListenerFactory::new(ListenerConfig::default()),
    });
    let registry = HandleRegistry::new(factory.clone(), 16);
    let key = loopback(0, BindFlags::REUSE_PORT);

    assert!(!registry.attach(&key, W1).unwrap().is_issued());
    assert!(!registry.attach(&key, W2).unwrap().is_issued());
    assert!(registry.attach(&key, W3).unwrap().is_issued());
    assert_eq!(factory.calls.load(Ordering::SeqCst), 3);

    // Once created, later attaches reuse the resource.
    assert!(registry.detach(W1, &key));
    assert!(registry.attach(&key, W1).unwrap().is_issued());
    assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
}
