use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use portshare::gather_metrics;
use portshare::BindFlags;
use portshare::BindTarget;
use portshare::CoordinatorBuilder;
use portshare::Error;
use portshare::LocalHandleTransport;
use portshare::PortShareConfig;
use portshare::Result;
use portshare::Worker;
use portshare::WorkerId;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = PortShareConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.serve.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    // Build Coordinator
    let transport = Arc::new(LocalHandleTransport::new());
    let mut coordinator = CoordinatorBuilder::new(settings.clone(), graceful_rx.clone())
        .transport(transport.clone())
        .build()?;
    let handle = coordinator.handle();
    let coordinator_task = tokio::spawn(async move { coordinator.run().await });

    // Start Workers
    let target = BindTarget::tcp(
        SocketAddr::new(settings.serve.ip()?, settings.serve.port),
        BindFlags::REUSE_PORT,
    );
    let served: Arc<DashMap<WorkerId, u64>> = Arc::new(DashMap::new());
    let mut workers = Vec::new();
    for id in 1..=settings.serve.worker_count() {
        let worker = Worker::new(WorkerId::new(id as u64), handle.clone(), transport.clone());
        let listener = worker.listen_tcp(&target).await?;
        served.insert(worker.id(), 0);
        tokio::spawn(serve(worker.id(), listener, served.clone(), graceful_rx.clone()));
        workers.push(worker);
    }

    info!(%target, workers = workers.len(), "Application started. Waiting for CTRL+C signal...");
    println!("Listening on {} with {} workers", target, workers.len());

    // Wait for Shutdown Signal
    wait_for_signal().await?;

    let mut counts: Vec<(WorkerId, u64)> = served.iter().map(|e| (*e.key(), *e.value())).collect();
    counts.sort();
    for (worker, count) in counts {
        println!("{worker}: {count} connections");
    }

    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.exit().await {
            warn!(worker = %id, "failed to release worker: {:?}", e);
        }
    }

    match gather_metrics() {
        Ok(metrics) => debug!("final metrics:\n{}", metrics),
        Err(e) => warn!("failed to gather metrics: {:?}", e),
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {e}"))
    })?;

    match coordinator_task.await {
        Ok(Err(e)) => error!("coordinator stops: {:?}", e),
        Err(e) => error!("coordinator task failed: {:?}", e),
        Ok(Ok(())) => info!("Shutdown completed"),
    }

    println!("Exiting program.");
    Ok(())
}

async fn serve(
    worker: WorkerId,
    listener: TcpListener,
    served: Arc<DashMap<WorkerId, u64>>,
    mut shutdown_signal: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal.changed() => {
                debug!(%worker, "worker stops accepting");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    if let Some(mut count) = served.get_mut(&worker) {
                        *count += 1;
                    }
                    debug!(%worker, %peer, "connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = stream.write_all(RESPONSE).await {
                            debug!(%peer, "failed to write response: {}", e);
                        }
                    });
                }
                Err(e) => warn!(%worker, "accept failed: {}", e),
            }
        }
    }
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = tracing_appender::rolling::never(log_dir, "portshare.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
