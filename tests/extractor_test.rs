//! Extraction against a local HTTP server

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use quake_elt::config::{AppConfig, FeedConfig};
use quake_elt::models::FeedWindow;
use quake_elt::{ErrorKind, EventSource, UsgsFeed};

/// Serve one canned response and hand back the request head that was received.
async fn serve_once(status: &'static str, body: String, stall: Option<Duration>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind listener");
    let url = format!("http://{}/fdsnws/event/1/query", listener.local_addr().expect("local addr"));

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("Failed to accept");

        let mut request = Vec::new();
        let mut buf = [0_u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("Failed to read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        // The client may already have given up on a stalled response
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;

        String::from_utf8_lossy(&request).into_owned()
    });

    (url, handle)
}

fn feed_config(url: String, timeout_secs: u64) -> FeedConfig {
    FeedConfig {
        url,
        timeout_secs,
        ..AppConfig::default().feed
    }
}

fn window() -> FeedWindow {
    FeedWindow {
        start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        min_magnitude: 2.5,
    }
}

#[tokio::test]
async fn test_fetch_returns_features_in_order() {
    let body = r#"{"type":"FeatureCollection","metadata":{"count":2},"features":[{"type":"Feature","id":"us1","properties":{"mag":3.1}},{"type":"Feature","id":"us2","properties":{"mag":2.7}}]}"#;
    let (url, server) = serve_once("200 OK", body.to_string(), None).await;

    let feed = UsgsFeed::new(&feed_config(url, 5)).expect("Failed to build feed client");
    let events = feed.fetch(&window()).await.expect("fetch failed");

    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["us1", "us2"]);
    assert_eq!(
        events[0].payload_str(),
        r#"{"type":"Feature","id":"us1","properties":{"mag":3.1}}"#
    );

    let request = server.await.expect("server task panicked");
    let request_line = request.lines().next().unwrap_or_default();
    assert!(request_line.starts_with("GET /fdsnws/event/1/query?"), "{request_line}");
    assert!(request_line.contains("format=geojson"), "{request_line}");
    assert!(request_line.contains("starttime=2024-05-01"), "{request_line}");
    assert!(request_line.contains("endtime=2024-05-02"), "{request_line}");
    assert!(request_line.contains("minmagnitude=2.5"), "{request_line}");
    assert!(request.to_ascii_lowercase().contains("user-agent: quake-elt/"));
}

#[tokio::test]
async fn test_empty_collection() {
    let (url, server) = serve_once("200 OK", r#"{"type":"FeatureCollection","features":[]}"#.to_string(), None).await;

    let feed = UsgsFeed::new(&feed_config(url, 5)).expect("Failed to build feed client");
    let events = feed.fetch(&window()).await.expect("fetch failed");
    assert!(events.is_empty());
    server.await.expect("server task panicked");
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let (url, server) = serve_once("503 Service Unavailable", "{}".to_string(), None).await;

    let feed = UsgsFeed::new(&feed_config(url, 5)).expect("Failed to build feed client");
    let err = feed.fetch(&window()).await.expect_err("fetch should fail");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!err.is_timeout());
    server.await.expect("server task panicked");
}

#[tokio::test]
async fn test_non_json_body_is_transport_failure() {
    let (url, server) = serve_once("200 OK", "<html>maintenance</html>".to_string(), None).await;

    let feed = UsgsFeed::new(&feed_config(url, 5)).expect("Failed to build feed client");
    let err = feed.fetch(&window()).await.expect_err("fetch should fail");
    assert_eq!(err.kind(), ErrorKind::Transport);
    server.await.expect("server task panicked");
}

#[tokio::test]
async fn test_stalled_response_times_out() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"features":[]}"#.to_string(),
        Some(Duration::from_secs(3)),
    )
    .await;

    let feed = UsgsFeed::new(&feed_config(url, 1)).expect("Failed to build feed client");
    let err = feed.fetch(&window()).await.expect_err("fetch should time out");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_timeout(), "expected timeout, got {err}");
    server.await.expect("server task panicked");
}
