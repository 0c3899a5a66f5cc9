use axum::{
    Router,
    routing::{any, get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::GatewayState;
use super::handlers::{apis, buckets, proxy, queues, schedules, status, topics, websockets};

fn build_local_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/apis/{api}", any(apis::api_root_endpoint))
        .route("/apis/{api}/{*path}", any(apis::api_endpoint))
        .route("/topic/{topic}", post(topics::publish_endpoint))
        .route("/topics/{topic}", post(topics::publish_endpoint))
        .route("/schedules/{schedule}", post(schedules::trigger_endpoint))
        .route("/queues", get(queues::stats_endpoint))
        .route("/queues/{queue}/send", post(queues::send_endpoint))
        .route("/queues/{queue}/receive", post(queues::receive_endpoint))
        .route("/queues/{queue}/complete", post(queues::complete_endpoint))
        .route("/buckets/{bucket}", get(buckets::list_endpoint))
        .route(
            "/buckets/{bucket}/{*key}",
            get(buckets::read_endpoint)
                .put(buckets::write_endpoint)
                .delete(buckets::delete_endpoint),
        )
        .route("/presign/{bucket}/{*key}", post(buckets::presign_endpoint))
        .route("/ws/{socket}", get(websockets::connect_endpoint))
        .route(
            "/websockets/{socket}/connections/{connection}",
            post(websockets::send_endpoint).delete(websockets::close_endpoint),
        )
        .route("/_membrane/health", get(status::health_endpoint))
        .route("/_membrane/workers", get(status::workers_endpoint))
        .route("/_membrane/history", get(status::history_endpoint))
        .route("/_membrane/logs", get(super::sse_logs_endpoint))
        .fallback(proxy::proxy_endpoint)
        .layer(build_local_cors())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MembraneConfig;
    use crate::core::protocol::{
        Cadence, ServerMessage, TriggerRequest, TriggerResponse, WorkerRegistration,
    };
    use crate::core::services::Services;
    use crate::core::worker::{Worker, WorkerStream};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::util::ServiceExt;

    async fn test_state(dir: &std::path::Path) -> GatewayState {
        let config = MembraneConfig {
            storage_dir: dir.to_path_buf(),
            ..MembraneConfig::default()
        };
        let jobs = tokio_cron_scheduler::JobScheduler::new().await.unwrap();
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        GatewayState::new(
            Services::new(&config, jobs),
            log_tx,
            Duration::from_millis(200),
        )
        .unwrap()
    }

    async fn register(
        state: &GatewayState,
        registration: WorkerRegistration,
    ) -> (Arc<Worker>, mpsc::Receiver<ServerMessage>) {
        let (stream, rx) = WorkerStream::new();
        let worker = state
            .services
            .pool
            .register(registration, stream)
            .await
            .unwrap();
        (worker, rx)
    }

    /// Answers every trigger with `respond(request)`.
    fn serve_worker<F>(worker: Arc<Worker>, mut rx: mpsc::Receiver<ServerMessage>, respond: F)
    where
        F: Fn(TriggerRequest) -> Vec<TriggerResponse> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(ServerMessage::Trigger { id, request }) = rx.recv().await {
                for frame in respond(request) {
                    worker.stream().resolve(&id, frame);
                }
            }
        });
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_answers() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_membrane/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
    }

    #[tokio::test]
    async fn api_request_reaches_matching_worker() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let (worker, rx) = register(
            &state,
            WorkerRegistration::Api {
                api: "shop".to_string(),
                path: "/orders/:id".to_string(),
                methods: vec!["GET".to_string()],
            },
        )
        .await;
        serve_worker(worker, rx, |request| {
            let TriggerRequest::Http {
                path_params, query, ..
            } = request
            else {
                return vec![];
            };
            let body = format!("{}:{}", path_params["id"], query["expand"][0]);
            vec![TriggerResponse::Http {
                status: 200,
                headers: [("x-worker".to_string(), vec!["yes".to_string()])].into(),
                body: body.into_bytes(),
                more: false,
            }]
        });

        let app = build_gateway_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/apis/shop/Orders/42?expand=items")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-worker"], "yes");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"42:items");
    }

    #[tokio::test]
    async fn unmatched_api_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/apis/shop/orders")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn streamed_response_is_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let (worker, rx) = register(
            &state,
            WorkerRegistration::Api {
                api: "files".to_string(),
                path: "/download".to_string(),
                methods: vec!["GET".to_string()],
            },
        )
        .await;
        serve_worker(worker, rx, |_| {
            vec![
                TriggerResponse::Http {
                    status: 200,
                    headers: Default::default(),
                    body: b"he".to_vec(),
                    more: true,
                },
                TriggerResponse::HttpChunk {
                    body: b"ll".to_vec(),
                    last: false,
                },
                TriggerResponse::HttpChunk {
                    body: b"o".to_vec(),
                    last: true,
                },
            ]
        });

        let response = build_gateway_router(state)
            .oneshot(
                Request::builder()
                    .uri("/apis/files/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);
        let response = app
            .oneshot(json_request(
                "POST",
                "/topic/orders",
                serde_json::json!({"payload": {"id": 1}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["delivered"], 0);
        assert_eq!(body["failed"], 0);
    }

    #[tokio::test]
    async fn manual_schedule_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let (worker, rx) = register(
            &state,
            WorkerRegistration::Schedule {
                key: "nightly".to_string(),
                cadence: Cadence::Rate("1 day".to_string()),
            },
        )
        .await;
        serve_worker(worker, rx, |_| {
            vec![TriggerResponse::Ack {
                success: true,
                message: None,
            }]
        });

        let app = build_gateway_router(state);
        let response = app
            .clone()
            .oneshot(json_request("POST", "/schedules/nightly", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let missing = app
            .oneshot(json_request("POST", "/schedules/ghost", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queue_errors_map_to_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);

        let bad_depth = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/queues/jobs/receive",
                serde_json::json!({"depth": 11}),
            ))
            .await
            .unwrap();
        assert_eq!(bad_depth.status(), StatusCode::BAD_REQUEST);

        let unknown = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/queues/jobs/complete",
                serde_json::json!({"lease_id": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let sent = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/queues/jobs/send",
                serde_json::json!({"items": [1, 2]}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(sent).await["ids"].as_array().unwrap().len(), 2);

        let received = app
            .oneshot(json_request(
                "POST",
                "/queues/jobs/receive",
                serde_json::json!({"depth": 5}),
            ))
            .await
            .unwrap();
        let body = body_json(received).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
        assert!(body["items"][0]["lease_id"].is_string());
    }

    #[tokio::test]
    async fn bucket_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);

        let put = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/buckets/images/cats/tom.txt")
                    .body(Body::from("meow"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);

        let get = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/buckets/images/cats/tom.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(get.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"meow");

        let list = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/buckets/images?prefix=cats/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(list).await["files"][0]["key"], "cats/tom.txt");

        let missing = app
            .oneshot(
                Request::builder()
                    .uri("/buckets/images/dogs/rex.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_host_falls_through_to_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_gateway_router(test_state(dir.path()).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/anything")
                    .header("host", "nobody.localhost:9001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "no worker found for host nobody.localhost");
    }

    #[tokio::test]
    async fn workers_endpoint_lists_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let _worker = register(
            &state,
            WorkerRegistration::Subscription {
                topic: "orders".to_string(),
            },
        )
        .await;
        let response = build_gateway_router(state)
            .oneshot(
                Request::builder()
                    .uri("/_membrane/workers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["workers"][0]["kind"], "subscriber");
        assert_eq!(body["workers"][0]["key"], "orders");
    }
}
