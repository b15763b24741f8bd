//! End-to-end: a connection's credit window rejects frames submitted
//! faster than it can drain them, then recovers once credits free up.

mod common;

use std::path::Path;
use std::time::Duration;

use worker_ai_proto::{Codec, ErrorCode, MsgType, Payload, PixelFormat, Request, Response, WireCodec};

#[tokio::test]
async fn third_frame_over_the_window_gets_backpressure_timeout() {
    let model_path = Path::new("backpressure-test-model.onnx");
    // A deliberate delay keeps every dispatched frame in flight for the
    // whole burst, so the window is still saturated when the frame over
    // budget is read — without it, a fast stub could race ahead and free
    // a credit before the last frame arrives.
    let pool = common::pool_with_stub_model(
        model_path,
        vec![common::det(0, 0.9)],
        Duration::from_millis(200),
    )
    .await;

    let running = common::spawn_handler(pool).await;
    let (client_read, client_write) = running.client.into_split();
    let mut client = Codec::new(client_read, client_write);

    client
        .send(
            MsgType::Init,
            Payload::Req(Request::Init {
                model_path: model_path.display().to_string(),
                caps: worker_ai_proto::InitCapabilities {
                    max_width: 640,
                    max_height: 640,
                    confidence_threshold: None,
                    classes_filter: None,
                },
            }),
        )
        .await
        .unwrap();

    let init_ok = client.recv().await.unwrap().unwrap();
    let window_size = match init_ok.payload {
        Payload::Res(Response::InitOk { chosen, .. }) => chosen.initial_credits,
        other => panic!("expected InitOk, got {other:?}"),
    };
    assert!(window_size >= 1, "server must offer at least one credit");

    let frame_count = window_size as u64 + 1;
    for frame_id in 1..=frame_count {
        client
            .send(
                MsgType::Frame,
                Payload::Req(Request::Frame {
                    frame_id,
                    session_id: Some("session-backpressure".to_string()),
                    pixel_format: PixelFormat::Rgb8,
                    codec: WireCodec::None,
                    width: 4,
                    height: 4,
                    ts_mono_ns: None,
                    ts_utc_ns: None,
                    planes: None,
                    data: common::blank_rgb8_frame(4, 4),
                }),
            )
            .await
            .unwrap();
    }

    let mut result_frame_ids = Vec::new();
    let mut backpressure_count = 0;
    for _ in 0..frame_count {
        let response = client.recv().await.unwrap().unwrap();
        match response.payload {
            Payload::Res(Response::Result { frame_id, .. }) => result_frame_ids.push(frame_id),
            Payload::Res(Response::Error {
                code: ErrorCode::BackpressureTimeout,
                ..
            }) => backpressure_count += 1,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    assert_eq!(backpressure_count, 1, "exactly one frame should be rejected over budget");
    assert_eq!(result_frame_ids.len(), window_size as usize);
    result_frame_ids.sort_unstable();
    let expected: Vec<u64> = (1..=window_size as u64).collect();
    assert_eq!(result_frame_ids, expected, "every admitted frame should get its Result");

    // Credits have been released by the Results above; a new frame
    // should be admitted rather than rejected.
    client
        .send(
            MsgType::Frame,
            Payload::Req(Request::Frame {
                frame_id: frame_count + 1,
                session_id: Some("session-backpressure".to_string()),
                pixel_format: PixelFormat::Rgb8,
                codec: WireCodec::None,
                width: 4,
                height: 4,
                ts_mono_ns: None,
                ts_utc_ns: None,
                planes: None,
                data: common::blank_rgb8_frame(4, 4),
            }),
        )
        .await
        .unwrap();

    let response = client.recv().await.unwrap().unwrap();
    match response.payload {
        Payload::Res(Response::Result { frame_id, .. }) => assert_eq!(frame_id, frame_count + 1),
        other => panic!("expected credits to have reset, got {other:?}"),
    }

    drop(client);
    running.run.await.unwrap();
}
