//! Per-connection protocol state machine: negotiates a model, decodes
//! and runs inference on frames, feeds the tracker, and persists track
//! records, all while enforcing a credit-based backpressure window.
//!
//! Decode and inference for each frame run on the blocking thread pool
//! so the connection keeps reading (and can still answer heartbeats or
//! accept a hot-reload `Init`) while several frames are in flight.
//! Completions flow back over an internal channel, but may land out of
//! order; a small resequencing buffer holds each one until every
//! earlier-submitted frame has been applied to the tracker/session and
//! sent, so `Result`s always reach the peer in strict submission order.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use worker_ai_decode::{DecoderRegistry, RgbImage};
use worker_ai_infer::{ClassCatalog, InferenceError, Model, ModelPool, RawDetection};
use worker_ai_proto::{
    BBox, ChosenFormat, Codec as WireCodecIo, Detection, Envelope, ErrorCode, FrameRef, Heartbeat,
    InitCapabilities, Latency, MsgType, Payload, Policy, Request, Response, WireCodec,
};
use worker_ai_session::{KfState, ObjRecord, SessionWriter, TrackMeta as PersistedTrackMeta};
use worker_ai_track::{BBoxXyxy, DetectionInput, Smoothing, TrackState, Tracker, TrackerConfig};

use crate::config::AppConfig;
use crate::error_map;
use crate::heartbeat::{KeepAlive, LOAD_KEEPALIVE_INTERVAL};
use crate::model_loader;
use crate::visualizer::Visualizer;

const WINDOW_MIN: u32 = 2;
const WINDOW_MAX: u32 = 16;
const LATENCY_HIGH_MS: f32 = 100.0;
const LATENCY_LOW_MS: f32 = 30.0;
const LATENCY_HISTORY_LEN: usize = 10;
const INITIAL_CREDITS: u32 = 4;

/// Shrinks the credit window when the peer is falling behind on
/// average per-frame latency, grows it back once headroom recovers,
/// and otherwise leaves it unchanged.
fn next_window_size(current: u32, avg_latency_ms: f32) -> u32 {
    if avg_latency_ms > LATENCY_HIGH_MS {
        current.saturating_sub(1).max(WINDOW_MIN)
    } else if avg_latency_ms < LATENCY_LOW_MS {
        (current + 1).min(WINDOW_MAX)
    } else {
        current
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ConnState {
    AwaitingInit,
    Loading,
    Ready,
    Closing,
}

/// Result of running decode + inference for one frame on the blocking
/// pool; everything the main task needs to finish the response without
/// touching `self` from inside the spawned closure.
struct FrameComputed {
    ts_mono_ns: Option<u64>,
    ts_utc_ns: Option<u64>,
    width: u32,
    height: u32,
    model_path: PathBuf,
    model_version: &'static str,
    pre_ms: f32,
    infer_ms: f32,
    raw_detections: Vec<RawDetection>,
    /// Populated only when the visualizer is enabled, to avoid paying
    /// for a frame clone on the common path.
    image_for_viz: Option<RgbImage>,
}

struct FrameOutcome {
    /// Submission order, assigned when the frame is accepted and handed
    /// to the blocking pool — used to resequence completions, since
    /// `frame_id` is client-supplied and need not be contiguous.
    seq: u64,
    frame_id: u64,
    session_id: Option<String>,
    result: Result<FrameComputed, (ErrorCode, String)>,
}

pub struct ConnectionHandler {
    codec: WireCodecIo<OwnedReadHalf, OwnedWriteHalf>,
    peer_addr: SocketAddr,
    pool: Arc<ModelPool>,
    decoders: Arc<DecoderRegistry>,
    default_catalog: Arc<ClassCatalog>,
    config: Arc<AppConfig>,
    visualizer: Arc<Visualizer>,

    state: ConnState,
    model: Option<Arc<Model>>,
    model_path: Option<PathBuf>,
    conf_threshold: f32,
    nms_iou: f32,
    classes_filter: Option<Vec<usize>>,
    pending_caps: Option<InitCapabilities>,
    pending_load: Option<JoinHandle<Result<Arc<Model>, InferenceError>>>,

    tracker: Option<Tracker>,
    session: Option<SessionWriter>,
    current_session_id: Option<String>,

    window_size: u32,
    in_flight: u32,
    last_frame_id: u64,
    frames_rx: u64,
    results_tx: u64,
    latency_history: VecDeque<f32>,

    next_submit_seq: u64,
    next_emit_seq: u64,
    pending_outcomes: BTreeMap<u64, FrameOutcome>,

    outcome_tx: mpsc::UnboundedSender<FrameOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<FrameOutcome>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// Reads the next envelope off `codec` alone (a field-level borrow, so
/// this can sit in a `select!` branch alongside other fields of the
/// handler). Top-level framing violations are returned as an error
/// code/message pair for the caller to send as a wire `Error` response.
async fn recv_envelope(
    codec: &mut WireCodecIo<OwnedReadHalf, OwnedWriteHalf>,
) -> Result<Option<Envelope>, (ErrorCode, String)> {
    codec.recv().await.map_err(|e| (e.error_code(), e.to_string()))
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        codec: WireCodecIo<OwnedReadHalf, OwnedWriteHalf>,
        peer_addr: SocketAddr,
        pool: Arc<ModelPool>,
        decoders: Arc<DecoderRegistry>,
        default_catalog: Arc<ClassCatalog>,
        config: Arc<AppConfig>,
        visualizer: Arc<Visualizer>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let conf_threshold = config.model.conf_threshold;
        let nms_iou = config.model.nms_iou;
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            codec,
            peer_addr,
            pool,
            decoders,
            default_catalog,
            config,
            visualizer,
            state: ConnState::AwaitingInit,
            model: None,
            model_path: None,
            conf_threshold,
            nms_iou,
            classes_filter: None,
            pending_caps: None,
            pending_load: None,
            tracker: None,
            session: None,
            current_session_id: None,
            window_size: INITIAL_CREDITS,
            in_flight: 0,
            last_frame_id: 0,
            frames_rx: 0,
            results_tx: 0,
            latency_history: VecDeque::with_capacity(LATENCY_HISTORY_LEN),
            next_submit_seq: 0,
            next_emit_seq: 0,
            pending_outcomes: BTreeMap::new(),
            outcome_tx,
            outcome_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        let span = info_span!("connection", peer = %self.peer_addr);
        async {
            if let Err(e) = self.drive().await {
                warn!(error = %e, "connection ended with error");
            }
            self.finalize_session();
        }
        .instrument(span)
        .await;
        info!(peer = %self.peer_addr, "connection closed");
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        loop {
            match self.state {
                ConnState::AwaitingInit => {
                    tokio::select! {
                        envelope = recv_envelope(&mut self.codec) => {
                            match envelope {
                                Err((code, message)) => {
                                    self.send_error(code, &message).await?;
                                    return Ok(());
                                }
                                Ok(None) => return Ok(()),
                                Ok(Some(envelope)) => match envelope.payload {
                                    Payload::Req(Request::Init { model_path, caps }) => {
                                        self.handle_init(model_path, caps).await?;
                                    }
                                    _ => {
                                        self.send_error(ErrorCode::BadSequence, "expected Init as first message")
                                            .await?;
                                        return Ok(());
                                    }
                                },
                            }
                        }
                        _ = self.shutdown_rx.recv() => {
                            return Ok(());
                        }
                    }
                }
                ConnState::Loading => {
                    if !self.drive_loading().await? {
                        return Ok(());
                    }
                }
                ConnState::Ready => {
                    if !self.drive_ready().await? {
                        return Ok(());
                    }
                }
                ConnState::Closing => return Ok(()),
            }
        }
    }

    /// Negotiates (or reuses) a loaded model for `model_path`.
    async fn handle_init(&mut self, model_path: String, caps: InitCapabilities) -> anyhow::Result<()> {
        self.apply_caps(&caps);

        let requested_path = PathBuf::from(&model_path);

        if self.state == ConnState::Ready {
            if let Some(current) = &self.model_path {
                if *current == requested_path {
                    self.send_init_ok(caps.max_width, caps.max_height).await?;
                    return Ok(());
                }
            }
        }

        self.state = ConnState::Loading;
        self.model_path = Some(requested_path.clone());
        self.pending_load = Some(model_loader::spawn_load(self.pool.clone(), requested_path));
        self.pending_caps = Some(caps);
        Ok(())
    }

    fn apply_caps(&mut self, caps: &InitCapabilities) {
        if let Some(threshold) = caps.confidence_threshold {
            if threshold > 0.0 && threshold <= 1.0 {
                self.conf_threshold = threshold;
            }
        }
        if let Some(names) = &caps.classes_filter {
            self.classes_filter = if names.is_empty() {
                None
            } else {
                Some(self.default_catalog.resolve_filter(names))
            };
        }
    }

    /// Runs the select loop while a model load is in flight: heartbeats
    /// on a timer, drains completions for frames still in flight on a
    /// prior model, and monitors the connection for close. Returns
    /// `Ok(false)` when the connection should end.
    async fn drive_loading(&mut self) -> anyhow::Result<bool> {
        let (keepalive, mut ticks) = KeepAlive::spawn(LOAD_KEEPALIVE_INTERVAL);
        let mut join_handle = self
            .pending_load
            .take()
            .expect("drive_loading entered without a pending load");

        let outcome = loop {
            tokio::select! {
                result = &mut join_handle => {
                    let result = result.unwrap_or_else(|e| {
                        Err(InferenceError::Catalog(format!("load task panicked: {e}")))
                    });
                    break Some(result);
                }
                _ = ticks.recv() => {
                    self.send_heartbeat_echo().await?;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.on_frame_outcome(outcome).await?;
                }
                envelope = recv_envelope(&mut self.codec) => {
                    match envelope {
                        Err((code, message)) => {
                            self.send_error(code, &message).await?;
                            break None;
                        }
                        Ok(None) => break None,
                        Ok(Some(env)) => match env.payload {
                            Payload::Req(Request::Frame { .. }) => {
                                self.send_error(ErrorCode::ModelNotReady, "model still loading").await?;
                            }
                            Payload::Req(Request::End) => {
                                self.finalize_session();
                            }
                            Payload::Hb(_) => {
                                self.send_heartbeat_echo().await?;
                            }
                            _ => {
                                self.send_error(ErrorCode::BadSequence, "unexpected message while loading")
                                    .await?;
                            }
                        },
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    break None;
                }
            }
        };

        drop(keepalive);
        match outcome {
            Some(result) => {
                self.finish_load(result).await?;
                Ok(true)
            }
            None => {
                join_handle.abort();
                Ok(false)
            }
        }
    }

    async fn finish_load(&mut self, result: Result<Arc<Model>, InferenceError>) -> anyhow::Result<()> {
        let caps = self.pending_caps.take().unwrap_or(InitCapabilities {
            max_width: 0,
            max_height: 0,
            confidence_threshold: None,
            classes_filter: None,
        });

        match result {
            Ok(model) => {
                info!(input_size = model.input_size(), "model load complete");
                self.model = Some(model);
                self.state = ConnState::Ready;
                self.ensure_tracker();
                self.send_init_ok(caps.max_width, caps.max_height).await?;
            }
            Err(e) => {
                warn!(error = %e, "model load failed");
                self.send_error(ErrorCode::Internal, &format!("model load failed: {e}"))
                    .await?;
                self.state = ConnState::Closing;
            }
        }
        Ok(())
    }

    fn ensure_tracker(&mut self) {
        if !self.config.tracker.enabled {
            self.tracker = None;
            return;
        }
        if self.tracker.is_none() {
            let config = TrackerConfig::load(
                self.config.tracker.config_path.as_deref(),
                self.config.tracker.use_kalman,
            );
            self.tracker = Some(Tracker::new(config));
        }
    }

    /// Drives the steady-state loop: reads the next envelope while
    /// concurrently draining completed frame computations, so a slow
    /// frame in flight never stalls heartbeats, `End`, or a hot-reload
    /// `Init`. Returns `Ok(false)` when the connection should end, or
    /// `Ok(true)` when a hot reload moved the state out of `Ready`.
    async fn drive_ready(&mut self) -> anyhow::Result<bool> {
        loop {
            tokio::select! {
                envelope = recv_envelope(&mut self.codec) => {
                    match envelope {
                        Err((code, message)) => {
                            self.send_error(code, &message).await?;
                            return Ok(false);
                        }
                        Ok(None) => return Ok(false),
                        Ok(Some(env)) => match env.payload {
                            Payload::Req(Request::Init { model_path, caps }) => {
                                self.handle_init(model_path, caps).await?;
                                if self.state != ConnState::Ready {
                                    return Ok(true);
                                }
                            }
                            Payload::Req(Request::Frame {
                                frame_id,
                                session_id,
                                pixel_format,
                                codec,
                                width,
                                height,
                                ts_mono_ns,
                                ts_utc_ns,
                                data,
                                ..
                            }) => {
                                self.dispatch_frame(
                                    frame_id,
                                    session_id,
                                    pixel_format,
                                    codec,
                                    width,
                                    height,
                                    ts_mono_ns,
                                    ts_utc_ns,
                                    data,
                                )
                                .await?;
                            }
                            Payload::Req(Request::End) => {
                                self.finalize_session();
                            }
                            Payload::Hb(_) => {
                                self.send_heartbeat_echo().await?;
                            }
                            _ => {
                                self.send_error(ErrorCode::BadMessage, "unexpected message in READY state")
                                    .await?;
                            }
                        },
                    }
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.on_frame_outcome(outcome).await?;
                }
                _ = self.shutdown_rx.recv() => {
                    return Ok(false);
                }
            }
        }
    }

    /// Admits a frame under the credit window and hands decode +
    /// inference to the blocking pool; the connection keeps reading
    /// while that runs. Rejects with `BACKPRESSURE_TIMEOUT` once
    /// `in_flight` reaches `window_size`.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_frame(
        &mut self,
        frame_id: u64,
        session_id: Option<String>,
        pixel_format: worker_ai_proto::PixelFormat,
        codec: WireCodec,
        width: u32,
        height: u32,
        ts_mono_ns: Option<u64>,
        ts_utc_ns: Option<u64>,
        data: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.frames_rx += 1;
        self.last_frame_id = frame_id;

        let Some(model) = self.model.clone() else {
            self.send_error(ErrorCode::ModelNotReady, "no model loaded").await?;
            return Ok(());
        };
        if self.in_flight >= self.window_size {
            self.send_error(ErrorCode::BackpressureTimeout, "credit window exhausted")
                .await?;
            return Ok(());
        }

        self.in_flight += 1;
        let seq = self.next_submit_seq;
        self.next_submit_seq += 1;
        let model_path = self
            .model_path
            .clone()
            .expect("model loaded implies a model_path");
        let decoders = self.decoders.clone();
        let catalog = self.default_catalog.clone();
        let conf_threshold = self.conf_threshold;
        let nms_iou = self.nms_iou;
        let classes_filter = self.classes_filter.clone();
        let tx = self.outcome_tx.clone();
        let visualize = self.config.visualization.enabled;

        tokio::task::spawn_blocking(move || {
            let t_start = Instant::now();
            let result = (|| -> Result<FrameComputed, (ErrorCode, String)> {
                let image = decoders
                    .decode(pixel_format, codec, &data, width, height)
                    .map_err(|e| (error_map::decode_error_code(&e), e.to_string()))?;
                let t_decoded = Instant::now();

                let image_for_viz = visualize.then(|| image.clone());

                let raw_detections = model
                    .infer(&image, conf_threshold, nms_iou, classes_filter.as_deref(), &catalog)
                    .map_err(|e| (error_map::inference_error_code(&e), e.to_string()))?;
                let t_inferred = Instant::now();

                Ok(FrameComputed {
                    ts_mono_ns,
                    ts_utc_ns,
                    width,
                    height,
                    model_path,
                    model_version: if model.embedded_nms() { "nms-embedded" } else { "raw" },
                    pre_ms: t_decoded.duration_since(t_start).as_secs_f32() * 1000.0,
                    infer_ms: t_inferred.duration_since(t_decoded).as_secs_f32() * 1000.0,
                    raw_detections,
                    image_for_viz,
                })
            })();
            let _ = tx.send(FrameOutcome {
                seq,
                frame_id,
                session_id,
                result,
            });
        });

        Ok(())
    }

    /// Buffers a completed frame until every earlier-submitted frame on
    /// this connection has been applied and sent, then drains it and
    /// any now-ready successors in strict submission order. Decode and
    /// inference may finish out of order across the blocking pool; the
    /// wire never sees that — `Result`s are always emitted in the order
    /// their frames arrived.
    async fn on_frame_outcome(&mut self, outcome: FrameOutcome) -> anyhow::Result<()> {
        self.pending_outcomes.insert(outcome.seq, outcome);
        while let Some(next) = self.pending_outcomes.remove(&self.next_emit_seq) {
            self.next_emit_seq += 1;
            self.finish_frame(next).await?;
        }
        Ok(())
    }

    /// Applies tracking, persists track records, and sends the `Result`
    /// (or `Error`) for one completed frame computation, then releases
    /// its credit.
    async fn finish_frame(&mut self, outcome: FrameOutcome) -> anyhow::Result<()> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let FrameOutcome {
            seq: _,
            frame_id,
            session_id,
            result,
        } = outcome;

        match result {
            Ok(computed) => {
                let t_post_start = Instant::now();
                let detections = match self.apply_tracking_and_persist(
                    frame_id,
                    &session_id,
                    computed.ts_mono_ns,
                    computed.ts_utc_ns,
                    computed.width,
                    computed.height,
                    computed.raw_detections,
                    computed.image_for_viz,
                ) {
                    Ok(detections) => detections,
                    Err(e) => {
                        let code = error_map::session_error_code(&e);
                        self.send_error(code, &e.to_string()).await?;
                        return Ok(());
                    }
                };
                let post_ms = t_post_start.elapsed().as_secs_f32() * 1000.0;
                let total_ms = computed.pre_ms + computed.infer_ms + post_ms;

                self.results_tx += 1;
                let latency = Latency {
                    pre_ms: computed.pre_ms,
                    infer_ms: computed.infer_ms,
                    post_ms,
                    total_ms,
                };
                self.track_latency(total_ms);

                self.codec
                    .send(
                        MsgType::Result,
                        Payload::Res(Response::Result {
                            frame_id,
                            frame_ref: FrameRef {
                                session_id,
                                ts_mono_ns: computed.ts_mono_ns,
                                ts_utc_ns: computed.ts_utc_ns,
                            },
                            model_name: computed
                                .model_path
                                .file_stem()
                                .map(|s| s.to_string_lossy().into_owned())
                                .unwrap_or_else(|| "model".to_string()),
                            model_version: computed.model_version.to_string(),
                            latency,
                            detections,
                        }),
                    )
                    .await?;

                self.maybe_update_window().await?;
            }
            Err((code, message)) => {
                self.send_error(code, &message).await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_tracking_and_persist(
        &mut self,
        frame_id: u64,
        session_id: &Option<String>,
        ts_mono_ns: Option<u64>,
        ts_utc_ns: Option<u64>,
        width: u32,
        height: u32,
        raw_detections: Vec<RawDetection>,
        image_for_viz: Option<RgbImage>,
    ) -> Result<Vec<Detection>, worker_ai_session::SessionError> {
        let wire_detections: Vec<Detection> = if let Some(tracker) = &mut self.tracker {
            let inputs: Vec<DetectionInput> = raw_detections
                .iter()
                .map(|d| DetectionInput {
                    class_id: d.class_id,
                    class_name: self
                        .default_catalog
                        .name_of(d.class_id)
                        .unwrap_or("unknown")
                        .to_string(),
                    confidence: d.conf,
                    bbox: BBoxXyxy {
                        x1: d.x1,
                        y1: d.y1,
                        x2: d.x2,
                        y2: d.y2,
                    },
                })
                .collect();
            let tracks = tracker.update(inputs);

            if let Some(image) = &image_for_viz {
                self.visualizer.render(image, &tracks);
            }

            let mut dets = Vec::with_capacity(tracks.len());
            let mut obj_records = Vec::with_capacity(tracks.len());
            for track in &tracks {
                dets.push(Detection {
                    bbox: BBox {
                        x1: track.bbox.x1,
                        y1: track.bbox.y1,
                        x2: track.bbox.x2,
                        y2: track.bbox.y2,
                    },
                    conf: track.confidence,
                    cls: track.class_name.clone(),
                    track_id: Some(track.track_id.to_string()),
                });
                if track.state != TrackState::Tentative {
                    obj_records.push(track_to_obj_record(track));
                }
            }

            if let Some(session) = self.ensure_session(session_id, width, height)? {
                session.write_frame(frame_id, ts_mono_ns, ts_utc_ns, obj_records)?;
            }

            dets
        } else {
            let mut obj_records = Vec::with_capacity(raw_detections.len());
            let dets: Vec<Detection> = raw_detections
                .iter()
                .map(|d| {
                    let name = self
                        .default_catalog
                        .name_of(d.class_id)
                        .unwrap_or("unknown")
                        .to_string();
                    obj_records.push(ObjRecord {
                        track_id: "0".to_string(),
                        cls: d.class_id,
                        cls_name: name.clone(),
                        conf: d.conf,
                        bbox_xyxy: [d.x1, d.y1, d.x2, d.y2],
                        kf_state: None,
                        track_meta: None,
                    });
                    Detection {
                        bbox: BBox {
                            x1: d.x1,
                            y1: d.y1,
                            x2: d.x2,
                            y2: d.y2,
                        },
                        conf: d.conf,
                        cls: name,
                        track_id: None,
                    }
                })
                .collect();

            if let Some(session) = self.ensure_session(session_id, width, height)? {
                session.write_frame(frame_id, ts_mono_ns, ts_utc_ns, obj_records)?;
            }

            dets
        };

        Ok(wire_detections)
    }

    fn ensure_session(
        &mut self,
        session_id: &Option<String>,
        width: u32,
        height: u32,
    ) -> Result<Option<&mut SessionWriter>, worker_ai_session::SessionError> {
        let Some(session_id) = session_id else {
            return Ok(None);
        };

        if self.current_session_id.as_deref() != Some(session_id.as_str()) {
            if let Some(mut old) = self.session.take() {
                let _ = old.finalize();
            }
            let writer = SessionWriter::open(
                &self.config.sessions.output_dir,
                session_id,
                self.config.sessions.segment_duration_s,
                self.config.sessions.default_fps,
                width,
                height,
            )?;
            self.current_session_id = Some(writer.session_id().to_string());
            self.session = Some(writer);
        }

        Ok(self.session.as_mut())
    }

    fn track_latency(&mut self, total_ms: f32) {
        if self.latency_history.len() == LATENCY_HISTORY_LEN {
            self.latency_history.pop_front();
        }
        self.latency_history.push_back(total_ms);
    }

    /// Adjusts the credit window based on a moving average of recent
    /// per-frame latency: shrink when the peer is falling behind, grow
    /// back once it recovers headroom.
    async fn maybe_update_window(&mut self) -> anyhow::Result<()> {
        if self.latency_history.is_empty() {
            return Ok(());
        }
        let avg = self.latency_history.iter().sum::<f32>() / self.latency_history.len() as f32;
        let new_window = next_window_size(self.window_size, avg);

        if new_window != self.window_size {
            self.window_size = new_window;
            self.codec
                .send(
                    MsgType::WindowUpdate,
                    Payload::Res(Response::WindowUpdate {
                        new_window_size: new_window,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn send_init_ok(&mut self, max_width: u32, max_height: u32) -> anyhow::Result<()> {
        let width = if max_width > 0 { max_width } else { 640 };
        let height = if max_height > 0 { max_height } else { 640 };
        let chosen = ChosenFormat {
            pixel_format: worker_ai_proto::PixelFormat::Nv12,
            codec: WireCodec::None,
            width,
            height,
            fps_target: self.config.sessions.default_fps as f32,
            policy: Policy::LatestWins,
            initial_credits: self.window_size,
            color_space: None,
            color_range: None,
        };
        self.codec
            .send(
                MsgType::InitOk,
                Payload::Res(Response::InitOk {
                    chosen,
                    max_frame_bytes: worker_ai_proto::DEFAULT_MAX_FRAME_BYTES,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_heartbeat_echo(&mut self) -> anyhow::Result<()> {
        self.codec
            .send(
                MsgType::Heartbeat,
                Payload::Hb(Heartbeat {
                    last_frame_id: self.last_frame_id,
                    frames_rx: self.frames_rx,
                    results_tx: self.results_tx,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_error(&mut self, code: ErrorCode, message: &str) -> anyhow::Result<()> {
        self.codec
            .send(
                MsgType::Error,
                Payload::Res(Response::Error {
                    code,
                    message: message.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    fn finalize_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.finalize() {
                warn!(error = %e, "failed to finalize session");
            }
        }
        self.current_session_id = None;
        if let Some(tracker) = &mut self.tracker {
            tracker.reset();
        }
    }
}

fn track_to_obj_record(track: &worker_ai_track::Track) -> ObjRecord {
    let kf_state = match &track.smoothing {
        Smoothing::RawOnly => None,
        Smoothing::WithKalman {
            filter,
            predicted_bbox,
        } => {
            let velocity = filter.velocity();
            Some(KfState {
                bbox_smooth: Some([track.bbox.x1, track.bbox.y1, track.bbox.x2, track.bbox.y2]),
                bbox_pred: Some(*predicted_bbox),
                velocity: Some([velocity[0], velocity[1], velocity[2], velocity[3]]),
            })
        }
    };

    ObjRecord {
        track_id: track.track_id.to_string(),
        cls: track.class_id,
        cls_name: track.class_name.clone(),
        conf: track.confidence,
        bbox_xyxy: [track.bbox.x1, track.bbox.y1, track.bbox.x2, track.bbox.y2],
        kf_state,
        track_meta: Some(PersistedTrackMeta {
            age: track.age,
            hits: track.hits,
            hit_streak: track.hit_streak,
            time_since_update: track.time_since_update,
            state: match track.state {
                TrackState::Tentative => "tentative".to_string(),
                TrackState::Confirmed => "confirmed".to_string(),
                TrackState::Deleted => "deleted".to_string(),
            },
        }),
    }
}
