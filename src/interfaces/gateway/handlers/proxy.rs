use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::{debug, warn};

use super::super::GatewayState;
use super::error_response;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Anything the gateway doesn't route itself goes to the http worker bound
/// to the request's `Host`.
pub async fn proxy_endpoint(State(state): State<GatewayState>, request: Request) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_string();

    let Some(worker) = state.services.pool.http_proxies.find(&host).await else {
        let bare = crate::core::registry::http_proxy::bare_host(&host);
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no worker found for host {}", bare),
        );
    };
    let crate::core::worker::WorkerSpec::HttpProxy(spec) = &worker.spec else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "not an http worker");
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", spec.address, path_and_query);
    debug!(host = %host, upstream = %url, "proxying request");

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    if let Ok(value) = HeaderValue::from_str(&host) {
        headers.insert("x-forwarded-host", value);
    }

    let upstream = state
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            warn!(host = %host, upstream = %url, "proxy request failed: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, format!("upstream error: {}", e));
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
