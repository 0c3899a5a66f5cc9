pub mod apis;
pub mod buckets;
pub mod proxy;
pub mod queues;
pub mod schedules;
pub mod status;
pub mod topics;
pub mod websockets;

use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::core::protocol::Headers;

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}

/// Multi-valued header map as carried in trigger frames. Names are lower-cased.
pub(crate) fn headers_to_frame(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    out
}

/// Copy worker-supplied headers onto a response, skipping anything that is not
/// a valid header.
pub(crate) fn frame_to_headers(frame: &Headers, target: &mut HeaderMap) {
    for (name, values) in frame {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                target.append(name.clone(), value);
            }
        }
    }
}
