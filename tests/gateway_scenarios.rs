
use membrane_harness::{MembraneHarness, TestResult, ack, http_response};
use serde_json::{Value, json};
use std::time::Duration;

fn api_worker(method: &str, path: &str) -> Value {
    json!({ "kind": "api", "api": "shop", "path": path, "methods": [method] })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_request_is_relayed_to_worker_and_back() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let worker = membrane
        .register_ok(api_worker("GET", "/orders/:id"))
        .await?;
    worker.serve(|request| {
        let id = request["path_params"]["id"].as_str().unwrap_or_default();
        vec![http_response(200, &format!("order {}", id))]
    });

    let response = membrane
        .http
        .get(membrane.url("/apis/shop/orders/42"))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.text().await?, "order 42");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn conflicting_route_is_rejected_and_first_worker_keeps_it() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let first = membrane.register_ok(api_worker("POST", "/items")).await?;
    let (_second, answer) = membrane.register(api_worker("POST", "/items")).await?;
    assert_eq!(answer["type"], "registration_rejected");
    assert_eq!(answer["code"], "already_exists");

    first.serve(|_| vec![http_response(201, "first")]);
    let response = membrane
        .http
        .post(membrane.url("/apis/shop/items"))
        .send()
        .await?;
    assert_eq!(response.status(), 201);
    assert_eq!(response.text().await?, "first");
    assert_eq!(membrane.services.pool.workers().await.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn literal_route_wins_over_parameter_route() -> TestResult<()> {
    for literal_first in [false, true] {
        let membrane = MembraneHarness::start().await?;
        let mut paths = vec!["/orders/:id", "/orders/special"];
        if literal_first {
            paths.reverse();
        }
        for path in paths {
            let worker = membrane.register_ok(api_worker("GET", path)).await?;
            worker.serve(move |request| {
                let id = request["path_params"]["id"].as_str().unwrap_or("-");
                vec![http_response(200, &format!("{} {}", path, id))]
            });
        }

        let special = membrane
            .http
            .get(membrane.url("/apis/shop/orders/special"))
            .send()
            .await?;
        assert_eq!(special.text().await?, "/orders/special -");

        let by_id = membrane
            .http
            .get(membrane.url("/apis/shop/orders/42"))
            .send()
            .await?;
        assert_eq!(by_id.text().await?, "/orders/:id 42");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_frees_the_route() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let first = membrane.register_ok(api_worker("GET", "/status")).await?;
    first.close().await?;
    membrane.wait_for_workers(0).await?;

    let missing = membrane
        .http
        .get(membrane.url("/apis/shop/status"))
        .send()
        .await?;
    assert_eq!(missing.status(), 404);

    let again = membrane.register_ok(api_worker("GET", "/status")).await?;
    again.serve(|_| vec![http_response(200, "back")]);
    let response = membrane
        .http
        .get(membrane.url("/apis/shop/status"))
        .send()
        .await?;
    assert_eq!(response.text().await?, "back");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_without_registration_fails_precondition() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let mut worker = membrane.connect().await?;
    worker
        .send(json!({ "type": "response", "id": "x", "response": ack(true) }))
        .await?;
    let answer = worker.next_frame().await?.ok_or("stream closed")?;
    assert_eq!(answer["type"], "registration_rejected");
    assert_eq!(answer["code"], "failed_precondition");
    assert!(membrane.services.pool.workers().await.is_empty());
    assert!(worker.next_frame().await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_leases_hide_items_until_visibility_timeout() -> TestResult<()> {
    let membrane = MembraneHarness::start_with(|config| config.visibility_timeout_secs = 1).await?;
    let send: Value = membrane
        .http
        .post(membrane.url("/queues/jobs/send"))
        .json(&json!({ "items": ["a", "b", "c"] }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(send["ids"].as_array().map(Vec::len), Some(3));

    let receive = |depth: usize| {
        membrane
            .http
            .post(membrane.url("/queues/jobs/receive"))
            .json(&json!({ "depth": depth }))
            .send()
    };

    let first: Value = receive(2).await?.json().await?;
    let first_items = first["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(first_items.len(), 2);
    assert_eq!(first_items[0]["payload"], "a");

    let second: Value = receive(2).await?.json().await?;
    let second_items = second["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(second_items.len(), 1);
    assert_eq!(second_items[0]["payload"], "c");

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let third: Value = receive(2).await?.json().await?;
    let third_items = third["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(third_items.len(), 2);
    assert_eq!(third_items[0]["id"], first_items[0]["id"]);

    let stale = membrane
        .http
        .post(membrane.url("/queues/jobs/complete"))
        .json(&json!({ "lease_id": first_items[0]["lease_id"] }))
        .send()
        .await?;
    assert_eq!(stale.status(), 404);

    let done = membrane
        .http
        .post(membrane.url("/queues/jobs/complete"))
        .json(&json!({ "lease_id": third_items[0]["lease_id"] }))
        .send()
        .await?;
    assert_eq!(done.status(), 200);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_counts_failed_subscriber_and_records_once() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    for success in [true, false, true] {
        let worker = membrane
            .register_ok(json!({ "kind": "subscription", "topic": "orders.created" }))
            .await?;
        worker.serve(move |request| {
            assert_eq!(request["kind"], "topic");
            vec![ack(success)]
        });
    }

    let publish: Value = membrane
        .http
        .post(membrane.url("/topic/orders.created"))
        .json(&json!({ "payload": { "order": 7 } }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(publish["success"], true);
    assert_eq!(publish["delivered"], 2);
    assert_eq!(publish["failed"], 1);

    let history: Value = membrane
        .http
        .get(membrane.url("/_membrane/history"))
        .send()
        .await?
        .json()
        .await?;
    let publishes: Vec<&Value> = history["history"]
        .as_array()
        .map(|records| {
            records
                .iter()
                .filter(|r| r["type"] == "topic_publish")
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0]["message_id"], publish["message_id"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_can_be_fired_by_hand() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let worker = membrane
        .register_ok(json!({
            "kind": "schedule",
            "key": "nightly",
            "cadence": { "rate": "1 day" }
        }))
        .await?;
    worker.serve(|request| {
        assert_eq!(request["kind"], "interval");
        vec![ack(true)]
    });

    let bindings = membrane.services.scheduler.bindings().await;
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].cron, "0 0 */1 * *");

    let fired = membrane
        .http
        .post(membrane.url("/schedules/nightly"))
        .send()
        .await?;
    assert_eq!(fired.status(), 200);
    let body: Value = fired.json().await?;
    assert_eq!(body["success"], true);

    let unknown = membrane
        .http
        .post(membrane.url("/schedules/hourly"))
        .send()
        .await?;
    assert_eq!(unknown.status(), 404);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bucket_writes_notify_matching_prefix() -> TestResult<()> {
    let membrane = MembraneHarness::start().await?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let worker = membrane
        .register_ok(json!({
            "kind": "bucket_notification",
            "bucket": "images",
            "event": "write",
            "prefix": "cats/"
        }))
        .await?;
    worker.serve(move |request| {
        let _ = tx.send(request.clone());
        vec![ack(true)]
    });

    let cat: Value = membrane
        .http
        .put(membrane.url("/buckets/images/cats/tom.png"))
        .body("purr")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(cat["notified"], 1);

    let dog: Value = membrane
        .http
        .put(membrane.url("/buckets/images/dogs/rex.png"))
        .body("woof")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(dog["notified"], 0);

    let notification = rx.recv().await.ok_or("no notification")?;
    assert_eq!(notification["key"], "cats/tom.png");
    assert_eq!(notification["event"], "write");
    assert!(rx.try_recv().is_err());

    let body = membrane
        .http
        .get(membrane.url("/buckets/images/cats/tom.png"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(body, "purr");
    Ok(())
}
