//! End-to-end coordinator scenarios.
//!
//! Workers obtain listeners through a running coordinator, either in process
//! or over a unix socket carrying the descriptors, and serve clients from
//! the one shared socket.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use portshare::BindFlags;
use portshare::CoordinatorBuilder;
use portshare::Error;
use portshare::LocalHandleTransport;
use portshare::PortShareConfig;
use portshare::RegistryError;
use portshare::UnixHandleReceiver;
use portshare::UnixSocketTransport;
use portshare::Worker;
use portshare::WorkerId;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::common::enable_logger;
use crate::common::loopback;

async fn answer_once(listener: TcpListener) {
    if let Ok((mut stream, _)) = listener.accept().await {
        let _ = stream.write_all(b"hello").await;
    }
}

async fn fetch(addr: std::net::SocketAddr) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await.unwrap();
    body
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_descriptors_cross_unix_socket_to_workers() {
    enable_logger();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let transport = Arc::new(UnixSocketTransport::new());
    let mut coordinator = CoordinatorBuilder::new(PortShareConfig::default(), shutdown_rx)
        .transport(transport.clone())
        .build()
        .unwrap();
    let handle = coordinator.handle();
    let registry = coordinator.registry();
    let task = tokio::spawn(async move { coordinator.run().await });

    let target = loopback(0, BindFlags::REUSE_PORT);
    let mut listeners = Vec::new();
    for id in 1..=2 {
        let worker_id = WorkerId::new(id);
        let (coordinator_end, worker_end) = UnixStream::pair().unwrap();
        transport.connect_worker(worker_id, coordinator_end);
        let worker = Worker::new(worker_id, handle.clone(), Arc::new(UnixHandleReceiver::new(worker_end)));
        listeners.push(worker.listen_tcp(&target).await.unwrap());
    }

    let addr = listeners[0].local_addr().unwrap();
    assert_eq!(addr, listeners[1].local_addr().unwrap());
    assert_eq!(registry.attached_workers(&target).len(), 2);

    for listener in listeners {
        tokio::spawn(answer_once(listener));
    }
    for _ in 0..2 {
        let body = timeout(Duration::from_secs(5), fetch(addr)).await.unwrap();
        assert_eq!(body, b"hello");
    }

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_released_endpoint_can_be_bound_again() {
    enable_logger();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let transport = Arc::new(LocalHandleTransport::new());
    let mut coordinator = CoordinatorBuilder::new(PortShareConfig::default(), shutdown_rx)
        .transport(transport.clone())
        .build()
        .unwrap();
    let handle = coordinator.handle();
    let task = tokio::spawn(async move { coordinator.run().await });

    let worker = Worker::new(WorkerId::new(1), handle.clone(), transport.clone());
    let target = loopback(0, BindFlags::NONE);
    let listener = worker.listen_tcp(&target).await.unwrap();
    let addr = listener.local_addr().unwrap();

    assert_eq!(worker.clone().exit().await.unwrap(), vec![target]);
    drop(listener);

    // Socket fully closed: the exact port binds again without SO_REUSEPORT.
    let fixed = loopback(addr.port(), BindFlags::NONE);
    let again = worker.listen_tcp(&fixed).await.unwrap();
    assert_eq!(again.local_addr().unwrap(), addr);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_permission_config_restricts_workers() {
    enable_logger();
    let mut config = PortShareConfig::default();
    config.permission.enabled = true;
    config.permission.allow = vec!["127.0.0.1:*".to_string()];
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let transport = Arc::new(LocalHandleTransport::new());
    let mut coordinator = CoordinatorBuilder::new(config, shutdown_rx)
        .transport(transport.clone())
        .build()
        .unwrap();
    let handle = coordinator.handle();
    let registry = coordinator.registry();
    let task = tokio::spawn(async move { coordinator.run().await });
    let worker = Worker::new(WorkerId::new(1), handle, transport);

    assert!(worker.listen(&loopback(0, BindFlags::REUSE_PORT)).await.is_ok());

    let wildcard = portshare::BindTarget::tcp("0.0.0.0:0".parse().unwrap(), BindFlags::REUSE_PORT);
    let err = worker.listen(&wildcard).await.unwrap_err();
    assert!(matches!(err, Error::Registry(RegistryError::PermissionDenied { .. })));
    assert!(!registry.contains(&wildcard));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap().unwrap();
}
