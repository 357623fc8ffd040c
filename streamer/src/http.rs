use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use camstream_common::frame::EncodedFrame;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::session::CameraSession;

const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate";
/// Capture time of the served frame, Unix milliseconds.
const FRAME_TIMESTAMP: &str = "x-frame-timestamp";

const NOT_STARTED: &str = "Camera not started";

const INDEX_NOT_STARTED: &str =
    "<h1>Camera not started</h1><p>Start the camera to view stream.</p>";

const INDEX_STREAMING: &str = r#"<!DOCTYPE html>
<html>
<head><title>Camera</title></head>
<body style="margin:0; background:#000;">
    <img src="/stream" style="width:100%; height:auto;">
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct StatusReport {
    streaming: bool,
    camera: bool,
}

pub fn router(session: Arc<CameraSession>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/stream", get(mjpeg_stream))
        .route("/snapshot", get(snapshot))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

/// One `multipart/x-mixed-replace` part carrying `frame`, as chunks that
/// share the frame's payload instead of copying it.
fn multipart_segment(frame: &EncodedFrame) -> [Bytes; 3] {
    [
        Bytes::from_static(PART_HEADER),
        frame.jpeg.clone(),
        Bytes::from_static(PART_TRAILER),
    ]
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /stream: MJPEG push stream until the camera stops or the client leaves
async fn mjpeg_stream(State(session): State<Arc<CameraSession>>) -> Response {
    if !session.state().is_streaming() {
        return (StatusCode::SERVICE_UNAVAILABLE, NOT_STARTED).into_response();
    }

    let poll = session.pipeline().stream_poll();
    // State carries the last sequence number sent on this connection so an
    // unchanged frame is not pushed twice.
    let parts = stream::unfold((session, 0u64), move |(session, last_seq)| async move {
        loop {
            if !session.state().is_streaming() {
                debug!(last_seq, "camera stopped, ending stream");
                return None;
            }
            match session.cell().read() {
                Some(frame) if frame.seq != last_seq => {
                    let seq = frame.seq;
                    let chunks = multipart_segment(&frame).map(Ok::<_, Infallible>);
                    return Some((stream::iter(chunks), (session, seq)));
                }
                _ => tokio::time::sleep(poll).await,
            }
        }
    })
    .flatten();

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// GET /snapshot: the latest frame as a single JPEG
async fn snapshot(State(session): State<Arc<CameraSession>>) -> Response {
    if !session.state().is_streaming() {
        return (StatusCode::SERVICE_UNAVAILABLE, NOT_STARTED).into_response();
    }
    match session.cell().read() {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg")),
                (header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
                (
                    HeaderName::from_static(FRAME_TIMESTAMP),
                    HeaderValue::from(frame.captured_at_ms),
                ),
            ],
            frame.jpeg,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response(),
    }
}

/// GET /status
async fn status(State(session): State<Arc<CameraSession>>) -> Json<StatusReport> {
    Json(StatusReport {
        streaming: session.state().is_streaming(),
        camera: session.state().is_camera_active(),
    })
}

/// GET /: page embedding the stream
async fn index(State(session): State<Arc<CameraSession>>) -> Html<&'static str> {
    if session.state().is_streaming() {
        Html(INDEX_STREAMING)
    } else {
        Html(INDEX_NOT_STARTED)
    }
}
