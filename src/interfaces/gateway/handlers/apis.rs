use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use futures_util::stream;
use tracing::{debug, warn};

use super::super::GatewayState;
use super::{error_response, frame_to_headers, headers_to_frame};
use crate::core::history::HistoryEvent;
use crate::core::protocol::{QueryParams, TriggerRequest, TriggerResponse};
use crate::core::worker::{DispatchError, ResponseStream};

pub async fn api_endpoint(
    State(state): State<GatewayState>,
    Path((api, path)): Path<(String, String)>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, api, format!("/{}", path), method, query, headers, body).await
}

pub async fn api_root_endpoint(
    State(state): State<GatewayState>,
    Path(api): Path<String>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, api, "/".to_string(), method, query, headers, body).await
}

async fn handle(
    state: GatewayState,
    api: String,
    path: String,
    method: Method,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(route) = state
        .services
        .pool
        .apis
        .find(&api, method.as_str(), &path)
        .await
    else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no route for {} {} on api {}", method, path, api),
        );
    };

    let mut params = QueryParams::new();
    for (name, value) in query {
        params.entry(name).or_default().push(value);
    }

    let request = TriggerRequest::Http {
        method: method.to_string(),
        path: path.clone(),
        query: params,
        headers: headers_to_frame(&headers),
        path_params: route.params,
        body: body.to_vec(),
    };

    let response = match route.worker.stream().dispatch(request).await {
        Ok(mut responses) => match responses.next().await {
            Ok(head) => into_http_response(head, responses),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let response = response.unwrap_or_else(|e| {
        warn!(api = %api, path = %path, "api dispatch failed: {}", e);
        error_response(StatusCode::BAD_GATEWAY, e.to_string())
    });

    state.services.history.record(HistoryEvent::ApiCall {
        api,
        method: method.to_string(),
        path,
        status: response.status().as_u16(),
    });
    response
}

fn into_http_response(
    head: TriggerResponse,
    responses: ResponseStream,
) -> Result<Response, DispatchError> {
    let TriggerResponse::Http {
        status,
        headers,
        body,
        more,
    } = head
    else {
        return Err(DispatchError::UnexpectedResponse(
            "api worker must answer with an http response".to_string(),
        ));
    };

    let status = StatusCode::from_u16(status).map_err(|_| {
        DispatchError::UnexpectedResponse(format!("invalid status code {}", status))
    })?;

    let body = if more {
        debug!(request_id = responses.id(), "streaming api response");
        streamed_body(body, responses)
    } else {
        Body::from(body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    frame_to_headers(&headers, response.headers_mut());
    Ok(response)
}

/// Body made of the head frame's bytes followed by every `HttpChunk` until
/// the one marked `last`.
fn streamed_body(first: Vec<u8>, responses: ResponseStream) -> Body {
    let chunks = stream::unfold(
        (Some(first), Some(responses)),
        |(first, responses)| async move {
            if let Some(first) = first {
                return Some((Ok(Bytes::from(first)), (None, responses)));
            }
            let mut responses = responses?;
            match responses.next().await {
                Ok(TriggerResponse::HttpChunk { body, last }) => {
                    let rest = if last { None } else { Some(responses) };
                    Some((Ok(Bytes::from(body)), (None, rest)))
                }
                Ok(other) => Some((
                    Err(DispatchError::UnexpectedResponse(format!(
                        "expected body chunk, got {:?}",
                        other
                    ))),
                    (None, None),
                )),
                Err(e) => Some((Err(e), (None, None))),
            }
        },
    );
    Body::from_stream(chunks)
}
