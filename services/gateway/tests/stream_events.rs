// End-to-end streaming behavior over HTTP: start-position negotiation,
// error mapping to problem bodies, admission control and slot balance.
mod support;

use gateway::config::GatewayConfig;
use std::time::{Duration, Instant};
use support::{build_test_client, start_gateway};

fn test_config() -> GatewayConfig {
    GatewayConfig {
        poll_timeout_ms: 20,
        ..GatewayConfig::default()
    }
}

#[tokio::test]
async fn stream_without_cursors_starts_from_the_newest_positions() {
    let gateway = start_gateway(test_config()).await;
    let topic = gateway.register_event_type("sales", 2, &[], &[]);
    for _ in 0..100 {
        gateway.log.append(&topic, 0, "{}").expect("append");
    }
    for _ in 0..200 {
        gateway.log.append(&topic, 1, "{}").expect("append");
    }

    let client = build_test_client();
    let response = client
        .get(gateway.url(
            "/event-types/sales/events?batch_flush_timeout=1&stream_keep_alive_limit=1",
        ))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("application/x-json-stream")
    );

    let body = response.text().await.expect("body");
    assert!(body.contains(r#"{"cursor":{"partition":"0","offset":"100"}}"#));
    assert!(body.contains(r#"{"cursor":{"partition":"1","offset":"200"}}"#));
    assert!(!body.contains("events"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn begin_cursor_streams_from_the_oldest_available_record() {
    let gateway = start_gateway(test_config()).await;
    let topic = gateway.register_event_type("sales", 1, &[], &[]);
    for index in 0..8 {
        gateway
            .log
            .append(&topic, 0, format!("{{\"n\":{index}}}"))
            .expect("append");
    }
    gateway.log.trim_to(&topic, 0, 5).expect("trim");

    let client = build_test_client();
    let body = client
        .get(gateway.url(
            "/event-types/sales/events?batch_limit=10&batch_flush_timeout=1&stream_limit=3",
        ))
        .header("X-nakadi-cursors", r#"[{"partition":"0","offset":"BEGIN"}]"#)
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");

    assert!(body.contains(r#"{"n":5}"#));
    assert!(body.contains(r#"{"n":7}"#));
    assert!(body.contains(r#""cursor":{"partition":"0","offset":"8"}"#));
    gateway.shutdown().await;
}

#[tokio::test]
async fn cursor_beyond_the_newest_position_is_precondition_failed() {
    let gateway = start_gateway(test_config()).await;
    let topic = gateway.register_event_type("sales", 1, &[], &[]);
    for _ in 0..100 {
        gateway.log.append(&topic, 0, "{}").expect("append");
    }

    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/sales/events"))
        .header("X-nakadi-cursors", r#"[{"partition":"0","offset":"999999"}]"#)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 412);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("application/problem+json")
    );
    let body = response.text().await.expect("body");
    assert!(body.contains("cursor UNAVAILABLE"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn garbage_cursors_header_is_bad_request() {
    let gateway = start_gateway(test_config()).await;
    gateway.register_event_type("sales", 1, &[], &[]);

    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/sales/events"))
        .header("X-nakadi-cursors", "{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 400);
    let body = response.text().await.expect("body");
    assert!(body.contains("incorrect syntax of X-nakadi-cursors header"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn unknown_event_type_is_not_found() {
    let gateway = start_gateway(test_config()).await;
    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/missing/events"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body = response.text().await.expect("body");
    assert!(body.contains("topic not found"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn missing_backing_topic_is_an_internal_error() {
    let gateway = start_gateway(test_config()).await;
    // Registered event type whose topic never existed in the log store.
    gateway
        .state
        .event_types
        .insert(gateway::event_types::EventType {
            name: "ghost".into(),
            topic: "ghost-topic".into(),
            read_scopes: Vec::new(),
            write_scopes: Vec::new(),
        })
        .expect("register");

    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/ghost/events"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 500);
    gateway.shutdown().await;
}

#[tokio::test]
async fn blacklisted_application_is_forbidden() {
    let gateway = start_gateway(test_config()).await;
    gateway.register_event_type("sales", 1, &[], &[]);
    gateway.state.blacklist.block_consumer_app("rogue");

    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/sales/events"))
        .header("X-Client-Id", "rogue")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 403);
    let body = response.text().await.expect("body");
    assert!(body.contains("Application or event type is blocked"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn read_scopes_are_enforced() {
    let gateway = start_gateway(test_config()).await;
    gateway.register_event_type("sales", 1, &["sales.read"], &[]);

    let client = build_test_client();
    let response = client
        .get(gateway.url("/event-types/sales/events"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 403);

    let response = client
        .get(gateway.url(
            "/event-types/sales/events?batch_flush_timeout=1&stream_keep_alive_limit=1",
        ))
        .header("X-Scopes", "sales.read")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    gateway.shutdown().await;
}

#[tokio::test]
async fn connection_slots_bound_concurrent_streams_and_balance_out() {
    let mut config = test_config();
    config.max_streams_per_partition = 1;
    config.features_enabled = vec!["limit_consumers_number".into()];
    let gateway = start_gateway(config).await;
    gateway.register_event_type("sales", 1, &[], &[]);

    let client = build_test_client();
    let held = client
        .get(gateway.url("/event-types/sales/events?batch_flush_timeout=1"))
        .header("X-Client-Id", "app")
        .send()
        .await
        .expect("first stream");
    assert_eq!(held.status(), 200);
    assert_eq!(gateway.state.limiter.held_by("app", "sales"), 1);

    let refused = client
        .get(gateway.url("/event-types/sales/events"))
        .header("X-Client-Id", "app")
        .send()
        .await
        .expect("second stream");
    assert_eq!(refused.status(), 503);
    let body = refused.text().await.expect("body");
    assert!(body.contains("no free slots"));

    // Dropping the held response disconnects the client; the stream notices
    // on its next write and releases the slot.
    drop(held);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if gateway.state.limiter.held_by("app", "sales") == 0 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "slots were not released after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let again = client
        .get(gateway.url(
            "/event-types/sales/events?batch_flush_timeout=1&stream_keep_alive_limit=1",
        ))
        .header("X-Client-Id", "app")
        .send()
        .await
        .expect("third stream");
    assert_eq!(again.status(), 200);
    gateway.shutdown().await;
}

#[tokio::test]
async fn published_events_reach_an_open_stream() {
    let gateway = start_gateway(test_config()).await;
    let topic = gateway.register_event_type("sales", 1, &[], &[]);

    let client = build_test_client();
    let streaming = client
        .get(gateway.url(
            "/event-types/sales/events?batch_limit=10&batch_flush_timeout=1&stream_limit=2",
        ))
        .header("X-nakadi-cursors", r#"[{"partition":"0","offset":"0"}]"#)
        .send()
        .await
        .expect("stream");
    assert_eq!(streaming.status(), 200);

    gateway.log.append(&topic, 0, r#"{"sale":1}"#).expect("append");
    gateway.log.append(&topic, 0, r#"{"sale":2}"#).expect("append");

    let body = streaming.text().await.expect("body");
    assert!(body.contains(r#"{"sale":1}"#));
    assert!(body.contains(r#"{"sale":2}"#));
    assert!(body.contains(r#""cursor":{"partition":"0","offset":"2"}"#));
    gateway.shutdown().await;
}
