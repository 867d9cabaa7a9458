//! End-to-end tests for plain HTTP relaying.

use std::collections::HashSet;

mod common;

#[tokio::test]
async fn test_get_is_relayed_and_recorded() {
    let origin = common::start_axum_origin().await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    let res = client
        .get(format!("http://{origin}/hello"))
        .header("User-Agent", "relay-test/1.0")
        .header("Referer", "http://referrer.test/")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Hello from origin");

    let records = proxy.wait_for_records(1).await;
    let record = &records[0];
    assert_eq!(record.method, "GET");
    assert_eq!(record.host, origin.to_string());
    assert_eq!(record.path, "/hello");
    assert_eq!(record.protocol, "HTTP/1.1");
    assert_eq!(record.user_agent, "relay-test/1.0");
    assert_eq!(record.referer, "http://referrer.test/");
    assert!(!record.is_https);
    assert_eq!(record.status_code, 200);
    assert_eq!(record.bytes_transferred, "Hello from origin".len() as u64);

    proxy.stop().await;
}

#[tokio::test]
async fn test_request_body_reaches_origin() {
    let origin = common::start_axum_origin().await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    let res = client
        .post(format!("http://{origin}/echo"))
        .body("payload through the proxy")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "payload through the proxy");

    proxy.stop().await;
}

#[tokio::test]
async fn test_origin_status_is_passed_through() {
    let origin = common::start_mock_origin(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nX-From-Origin: 1\r\n\r\nmissing",
    )
    .await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    let res = client.get(format!("http://{origin}/gone")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.headers()["x-from-origin"], "1");
    assert_eq!(res.text().await.unwrap(), "missing");

    let records = proxy.wait_for_records(1).await;
    assert_eq!(records[0].status_code, 404);
    assert_eq!(records[0].bytes_transferred, 7);

    proxy.stop().await;
}

#[tokio::test]
async fn test_unreachable_origin_returns_502() {
    let origin = common::closed_port().await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    let res = client.get(format!("http://{origin}/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    let records = proxy.wait_for_records(1).await;
    assert_eq!(records[0].status_code, 502);

    proxy.stop().await;
}

#[tokio::test]
async fn test_chunked_response_counts_payload_only() {
    let origin = common::start_mock_origin(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )
    .await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    let res = client.get(format!("http://{origin}/stream")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "hello world");

    let records = proxy.wait_for_records(1).await;
    assert_eq!(records[0].bytes_transferred, 11);

    proxy.stop().await;
}

#[tokio::test]
async fn test_upstream_request_is_origin_form_without_proxy_headers() {
    let origin = common::start_programmable_origin(|head| async move {
        let echoed = head.replace("\r\n", "|");
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            echoed.len(),
            echoed
        )
    })
    .await;
    let proxy = common::start_proxy(|_| {}).await;

    let response = common::raw_exchange(
        proxy.addr,
        &format!(
            "GET http://{origin}/path?q=1 HTTP/1.1\r\nHost: {origin}\r\nProxy-Connection: keep-alive\r\nX-Keep: Me\r\n\r\n"
        ),
    )
    .await;
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: close"));
    assert!(body.starts_with("GET /path?q=1 HTTP/1.1|"));
    assert!(body.contains("X-Keep: Me|"));
    assert!(!body.contains("Proxy-Connection"));

    proxy.stop().await;
}

#[tokio::test]
async fn test_head_request_has_no_body() {
    let origin = common::start_mock_origin("HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n").await;
    let proxy = common::start_proxy(|_| {}).await;

    let response = common::raw_exchange(
        proxy.addr,
        &format!("HEAD http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 512\r\n"));
    assert!(response.ends_with("\r\n\r\n"));

    let records = proxy.wait_for_records(1).await;
    assert_eq!(records[0].method, "HEAD");
    assert_eq!(records[0].bytes_transferred, 0);

    proxy.stop().await;
}

#[tokio::test]
async fn test_every_connection_gets_a_distinct_id() {
    let origin = common::start_axum_origin().await;
    let proxy = common::start_proxy(|_| {}).await;
    let client = common::proxied_client(proxy.addr);

    for _ in 0..5 {
        let res = client.get(format!("http://{origin}/hello")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        res.bytes().await.unwrap();
    }

    let records = proxy.wait_for_records(5).await;
    let ids: HashSet<_> = records.iter().map(|r| r.connection_id.clone()).collect();
    assert_eq!(ids.len(), 5);

    proxy.stop().await;
}

#[tokio::test]
async fn test_malformed_request_is_closed_without_response() {
    let proxy = common::start_proxy(|_| {}).await;

    let response = common::raw_exchange(proxy.addr, "THIS IS NOT HTTP\r\n\r\n").await;
    assert!(response.is_empty());

    let records = proxy.wait_for_records(1).await;
    assert_eq!(records[0].status_code, 0);

    proxy.stop().await;
}
