//! Shared fixtures for end-to-end protocol tests: a loopback socket
//! pair and a `ConnectionHandler` backed by a pool pre-seeded with a
//! stub model, so a test can drive a connection through `Init` to
//! `Ready` without a real ONNX file on disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use worker_ai_decode::DecoderRegistry;
use worker_ai_infer::{ClassCatalog, Model, ModelPool, RawDetection};
use worker_ai_proto::Codec;
use worker_ai_server::config::AppConfig;
use worker_ai_server::connection::ConnectionHandler;
use worker_ai_server::visualizer::Visualizer;

pub async fn paired_sockets() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, client) = tokio::join!(
        async { listener.accept().await.unwrap().0 },
        async { TcpStream::connect(addr).await.unwrap() },
    );
    (server, client)
}

pub fn det(class_id: usize, conf: f32) -> RawDetection {
    RawDetection {
        x1: 0.1,
        y1: 0.1,
        x2: 0.5,
        y2: 0.5,
        conf,
        class_id,
    }
}

/// A model pool pre-seeded with a stub model under `path`'s raw (not
/// canonicalized, since the path doesn't exist on disk) key, reachable
/// by a normal `Init { model_path: path }` from a test client.
pub async fn pool_with_stub_model(path: &Path, detections: Vec<RawDetection>, delay: Duration) -> Arc<ModelPool> {
    let pool = ModelPool::new(Duration::from_secs(60));
    pool.insert_for_test(path, Model::stub(640, false, detections, delay)).await;
    pool
}

/// Holds everything a test needs to keep alive for the handler's
/// lifetime: the shutdown sender (dropping it ends the connection) and
/// the session directory (dropping it deletes the persisted files).
pub struct RunningHandler {
    pub client: TcpStream,
    pub run: JoinHandle<()>,
    pub session_dir: tempfile::TempDir,
    _shutdown_tx: broadcast::Sender<()>,
}

pub async fn spawn_handler(pool: Arc<ModelPool>) -> RunningHandler {
    let (server, client) = paired_sockets().await;
    let peer_addr = client.local_addr().unwrap();
    let (read_half, write_half) = server.into_split();
    let codec = Codec::new(read_half, write_half);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let session_dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.sessions.output_dir = session_dir.path().to_path_buf();

    let handler = ConnectionHandler::new(
        codec,
        peer_addr,
        pool,
        Arc::new(DecoderRegistry::new()),
        Arc::new(ClassCatalog::coco()),
        Arc::new(config),
        Arc::new(Visualizer::new("test".to_string())),
        shutdown_rx,
    );
    let run = tokio::spawn(handler.run());

    RunningHandler {
        client,
        run,
        session_dir,
        _shutdown_tx: shutdown_tx,
    }
}

/// An RGB8, uncompressed `width`x`height` frame of all-zero pixels —
/// decode doesn't care about content, only that the buffer is sized
/// `width * height * 3`.
pub fn blank_rgb8_frame(width: u32, height: u32) -> Vec<u8> {
    vec![0u8; (width * height * 3) as usize]
}
