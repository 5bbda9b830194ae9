//! # Request/Reply Correlation
//!
//! A reply settles the one request whose `correlationId` it carries, and
//! every decoded envelope lands in the message log whether or not it matched.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use courier_client::{ClientConfig, RequestError};
    use futures_util::future::join_all;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use crate::harness::{echo, reply_to, silent, wait_until, within, MockServer, ServerAction};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// `ping` → `pong` with the same data; anything else → `error` "boom".
    fn ping_or_boom() -> crate::harness::Handler {
        Arc::new(|frame: &Value| {
            if frame["type"] == "ping" && frame["data"] != json!({}) {
                vec![reply_to(frame, "pong", frame["data"].clone())]
            } else {
                vec![reply_to(frame, "error", json!("boom"))]
            }
        })
    }

    // =============================================================================
    // BASIC EXCHANGES
    // =============================================================================

    #[tokio::test]
    async fn test_ping_resolves_with_reply_data() {
        let server = MockServer::start(ping_or_boom()).await;
        let client = server.client();
        client.connect().await.unwrap();

        let reply: Value = within(client.request("ping", &json!({"n": 1}))).await.unwrap();
        assert_eq!(reply, json!({"n": 1}));

        // The reply is logged too
        let logged = client.messages().last().unwrap();
        assert_eq!(logged.kind, "pong");
        assert!(logged.is_correlated());
    }

    #[tokio::test]
    async fn test_error_reply_rejects_with_data() {
        let server = MockServer::start(ping_or_boom()).await;
        let client = server.client();
        client.connect().await.unwrap();

        let err = within(client.request::<_, Value>("ping", &json!({})))
            .await
            .unwrap_err();

        match &err {
            RequestError::Rejected(data) => assert_eq!(data, &json!("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.reason_text().as_deref(), Some("boom"));
        assert_eq!(client.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_request_frame_carries_fresh_correlation_id() {
        let server = MockServer::start(echo()).await;
        let client = server.client();
        client.connect().await.unwrap();

        let _: Value = within(client.request("lookup", &json!({"key": "a"}))).await.unwrap();

        let frames = server.wait_for_frames(1).await;
        assert_eq!(frames[0]["type"], "lookup");
        assert_eq!(frames[0]["data"], json!({"key": "a"}));
        assert!(frames[0]["correlationId"].as_str().is_some_and(|id| !id.is_empty()));
    }

    // =============================================================================
    // CONCURRENCY
    // =============================================================================

    /// Holds requests until `batch` have arrived, then answers them in
    /// reverse order.
    fn reply_in_reverse(batch: usize) -> crate::harness::Handler {
        let held: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        Arc::new(move |frame: &Value| {
            let mut held = held.lock();
            held.push(frame.clone());
            if held.len() < batch {
                return Vec::new();
            }
            held.drain(..)
                .rev()
                .map(|request| reply_to(&request, "echo", request["data"].clone()))
                .collect()
        })
    }

    #[tokio::test]
    async fn test_concurrent_requests_settle_independently() {
        const N: usize = 16;
        let server = MockServer::start(reply_in_reverse(N)).await;
        let client = server.client();
        client.connect().await.unwrap();

        let payloads: Vec<Value> = (0..N).map(|i| json!({"i": i})).collect();
        let requests = payloads.iter().map(|data| client.request::<_, Value>("echo", data));
        let results = within(join_all(requests)).await;

        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!({"i": i}));
        }

        let ids: HashSet<String> = server
            .received()
            .iter()
            .map(|frame| frame["correlationId"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), N);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_mixed_outcomes() {
        // Odd payloads are rejected, even ones answered
        let server = MockServer::start(Arc::new(|frame: &Value| {
            let i = frame["data"]["i"].as_u64().unwrap_or_default();
            if i % 2 == 1 {
                vec![reply_to(frame, "error", json!({"message": format!("odd {i}")}))]
            } else {
                vec![reply_to(frame, "ok", json!(i))]
            }
        }))
        .await;
        let client = server.client();
        client.connect().await.unwrap();

        let payloads: Vec<Value> = (0..8u64).map(|i| json!({"i": i})).collect();
        let requests = payloads.iter().map(|data| client.request::<_, u64>("check", data));
        let results = within(join_all(requests)).await;

        for (i, result) in results.into_iter().enumerate() {
            if i % 2 == 1 {
                let err = result.unwrap_err();
                assert_eq!(err.reason_text(), Some(format!("odd {i}")));
            } else {
                assert_eq!(result.unwrap(), i as u64);
            }
        }
    }

    // =============================================================================
    // UNMATCHED AND DUPLICATE REPLIES
    // =============================================================================

    #[tokio::test]
    async fn test_unmatched_reply_is_logged_and_ignored() {
        let server = MockServer::start(silent()).await;
        let client = Arc::new(server.client());
        client.connect().await.unwrap();

        let pending = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request::<_, Value>("ping", &json!({})).await }
        });
        let frames = server.wait_for_frames(1).await;

        server.push(ServerAction::Send(json!({
            "type": "pong",
            "correlationId": "not-a-live-id",
            "data": 1,
        })));
        wait_until(|| client.messages().len() == 1).await;

        assert_eq!(client.pending_count(), 1);
        assert!(!pending.is_finished());
        assert_eq!(client.stats().unmatched, 1);

        server.push(reply_to(&frames[0], "pong", json!(2)));
        assert_eq!(within(pending).await.unwrap().unwrap(), json!(2));
        assert_eq!(client.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_unmatched() {
        let server = MockServer::start(Arc::new(|frame: &Value| {
            vec![
                reply_to(frame, "pong", json!("first")),
                reply_to(frame, "pong", json!("second")),
            ]
        }))
        .await;
        let client = server.client();
        client.connect().await.unwrap();

        let reply: Value = within(client.request("ping", &json!({}))).await.unwrap();
        assert_eq!(reply, json!("first"));

        wait_until(|| client.messages().len() == 2).await;
        assert_eq!(client.stats().resolved, 1);
        assert_eq!(client.stats().unmatched, 1);
    }

    // =============================================================================
    // DEADLINES
    // =============================================================================

    #[tokio::test]
    async fn test_timeout_rejects_and_late_reply_is_unmatched() {
        let server = MockServer::start(silent()).await;
        let client = server.client();
        client.connect().await.unwrap();

        let err = within(client.request_with_timeout::<_, Value>(
            "ping",
            &json!({}),
            Some(Duration::from_millis(50)),
        ))
        .await
        .unwrap_err();
        assert!(matches!(err, RequestError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(client.pending_count(), 0);

        let frames = server.wait_for_frames(1).await;
        server.push(reply_to(&frames[0], "pong", json!("late")));
        wait_until(|| client.messages().len() == 1).await;
        assert_eq!(client.stats().unmatched, 1);
        assert_eq!(client.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_configured_default_timeout() {
        let server = MockServer::start(silent()).await;
        let config = ClientConfig::default().with_request_timeout(Some(Duration::from_millis(30)));
        let client = server.client_with(config);
        client.connect().await.unwrap();

        let err = within(client.request::<_, Value>("ping", &json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_reply_before_deadline_wins() {
        let server = MockServer::start(echo()).await;
        let client = server.client();
        client.connect().await.unwrap();

        let reply: Value = within(client.request_with_timeout(
            "ping",
            &json!("quick"),
            Some(Duration::from_secs(2)),
        ))
        .await
        .unwrap();
        assert_eq!(reply, json!("quick"));
        assert_eq!(client.stats().timeouts, 0);
    }

    // =============================================================================
    // BROADCASTS AND DISCARDS
    // =============================================================================

    #[tokio::test]
    async fn test_broadcasts_both_ways() {
        let server = MockServer::start(silent()).await;
        let client = server.client();
        client.connect().await.unwrap();
        let mut live = client.messages().subscribe();

        client.send("chat", &json!({"text": "hi"})).unwrap();
        let frames = server.wait_for_frames(1).await;
        assert_eq!(frames[0], json!({"type": "chat", "data": {"text": "hi"}}));

        server.push(ServerAction::Send(json!({"type": "tick", "data": 3})));
        let envelope = within(live.recv()).await.unwrap();
        assert_eq!(envelope.kind, "tick");
        assert_eq!(envelope.data, json!(3));
        assert!(!envelope.is_correlated());
    }

    #[tokio::test]
    async fn test_malformed_and_binary_frames_are_discarded() {
        let server = MockServer::start(silent()).await;
        let client = server.client();
        client.connect().await.unwrap();

        server.push(ServerAction::Raw("not json".to_string()));
        server.push(ServerAction::Raw(r#"{"data": "no type"}"#.to_string()));
        server.push(ServerAction::Binary(vec![1, 2, 3]));
        server.push(ServerAction::Send(json!({"type": "tick", "data": null})));

        wait_until(|| client.messages().len() == 1).await;
        assert_eq!(client.messages().snapshot()[0].kind, "tick");
        assert!(client.is_open());
    }
}
