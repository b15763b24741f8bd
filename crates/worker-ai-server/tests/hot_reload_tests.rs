//! End-to-end: switching models mid-connection via a second `Init`
//! gets a fresh `InitOk` and routes subsequent frames through the new
//! model, without tearing down the TCP connection.

mod common;

use std::path::Path;
use std::time::Duration;

use worker_ai_infer::ModelPool;
use worker_ai_proto::{Codec, InitCapabilities, MsgType, Payload, PixelFormat, Request, Response, WireCodec};

fn default_caps() -> InitCapabilities {
    InitCapabilities {
        max_width: 640,
        max_height: 640,
        confidence_threshold: None,
        classes_filter: None,
    }
}

#[tokio::test]
async fn init_again_switches_model_without_closing_the_connection() {
    let model_a = Path::new("hot-reload-model-a.onnx");
    let model_b = Path::new("hot-reload-model-b.onnx");

    let pool = ModelPool::new(Duration::from_secs(60));
    pool.insert_for_test(
        model_a,
        worker_ai_infer::Model::stub(640, false, vec![common::det(0, 0.9)], Duration::ZERO),
    )
    .await;
    pool.insert_for_test(
        model_b,
        worker_ai_infer::Model::stub(640, false, vec![common::det(1, 0.9)], Duration::ZERO),
    )
    .await;

    let running = common::spawn_handler(pool).await;
    let (client_read, client_write) = running.client.into_split();
    let mut client = Codec::new(client_read, client_write);

    client
        .send(
            MsgType::Init,
            Payload::Req(Request::Init {
                model_path: model_a.display().to_string(),
                caps: default_caps(),
            }),
        )
        .await
        .unwrap();
    match client.recv().await.unwrap().unwrap().payload {
        Payload::Res(Response::InitOk { .. }) => {}
        other => panic!("expected InitOk for model A, got {other:?}"),
    }

    client
        .send(
            MsgType::Frame,
            Payload::Req(Request::Frame {
                frame_id: 1,
                session_id: Some("session-hot-reload".to_string()),
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

    let class_from_model_a = match client.recv().await.unwrap().unwrap().payload {
        Payload::Res(Response::Result { detections, .. }) => {
            assert_eq!(detections.len(), 1);
            detections[0].cls.clone()
        }
        other => panic!("expected Result from model A, got {other:?}"),
    };

    // Hot reload: a second Init on the same connection, no new TCP
    // connection, switches to a different model.
    client
        .send(
            MsgType::Init,
            Payload::Req(Request::Init {
                model_path: model_b.display().to_string(),
                caps: default_caps(),
            }),
        )
        .await
        .unwrap();
    match client.recv().await.unwrap().unwrap().payload {
        Payload::Res(Response::InitOk { .. }) => {}
        other => panic!("expected a fresh InitOk after hot reload, got {other:?}"),
    }

    client
        .send(
            MsgType::Frame,
            Payload::Req(Request::Frame {
                frame_id: 2,
                session_id: Some("session-hot-reload".to_string()),
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

    let class_from_model_b = match client.recv().await.unwrap().unwrap().payload {
        Payload::Res(Response::Result { detections, .. }) => {
            assert_eq!(detections.len(), 1);
            detections[0].cls.clone()
        }
        other => panic!("expected Result from model B, got {other:?}"),
    };

    assert_ne!(
        class_from_model_a, class_from_model_b,
        "frames after the hot reload should be scored by the new model"
    );

    drop(client);
    running.run.await.unwrap();
}
