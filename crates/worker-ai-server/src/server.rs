//! TCP listener loop: accepts connections and spawns an isolated
//! handler per connection over a shared model pool and decoder
//! registry, with idle-timer handoff when the last connection ends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use worker_ai_decode::DecoderRegistry;
use worker_ai_infer::{ClassCatalog, ModelPool};

use crate::config::AppConfig;
use crate::connection::ConnectionHandler;
use crate::visualizer::Visualizer;

/// Shared, read-only state handed to every connection handler.
pub struct Shared {
    pub pool: Arc<ModelPool>,
    pub decoders: Arc<DecoderRegistry>,
    pub catalog: Arc<ClassCatalog>,
    pub config: Arc<AppConfig>,
    pub visualizer: Arc<Visualizer>,
    active_connections: AtomicUsize,
}

impl Shared {
    pub fn new(
        pool: Arc<ModelPool>,
        decoders: Arc<DecoderRegistry>,
        catalog: Arc<ClassCatalog>,
        config: Arc<AppConfig>,
    ) -> Arc<Self> {
        let visualizer = Arc::new(Visualizer::new(config.visualization.window_name.clone()));
        Arc::new(Self {
            pool,
            decoders,
            catalog,
            config,
            visualizer,
            active_connections: AtomicUsize::new(0),
        })
    }

    async fn connection_opened(&self) {
        if self.active_connections.fetch_add(1, Ordering::SeqCst) == 0 {
            self.pool.cancel_idle_timer().await;
        }
    }

    async fn connection_closed(self: &Arc<Self>) {
        if self.active_connections.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pool.start_idle_timer().await;
        }
    }
}

/// Binds `bind_addr` and serves connections until a shutdown signal
/// (`Ctrl+C`) arrives. Each accepted socket gets its own
/// [`ConnectionHandler`] task; the tracker and session writer it owns
/// are private to that task. On shutdown, the listener stops accepting
/// and every live connection is asked to finalize its session and
/// close before `run` returns.
pub async fn run(bind_addr: SocketAddr, shared: Arc<Shared>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, "worker-ai-server listening");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };

                if let Err(e) = socket.set_nodelay(true) {
                    error!(error = %e, "failed to set TCP_NODELAY");
                }

                let shared = shared.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                connections.spawn(async move {
                    shared.connection_opened().await;
                    let (read_half, write_half) = socket.into_split();
                    let codec = worker_ai_proto::Codec::new(read_half, write_half);
                    let handler = ConnectionHandler::new(
                        codec,
                        peer_addr,
                        shared.pool.clone(),
                        shared.decoders.clone(),
                        shared.catalog.clone(),
                        shared.config.clone(),
                        shared.visualizer.clone(),
                        shutdown_rx,
                    );
                    handler.run().await;
                    shared.connection_closed().await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, closing listener");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(());
    while connections.join_next().await.is_some() {}
    info!("all connections finalized, server stopped");
    Ok(())
}
