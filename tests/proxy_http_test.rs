//! End-to-end HTTP proxying and admission tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use edgegate::config::{IpFilterMode, Strategy};

mod common;

#[tokio::test]
async fn round_robin_alternates_between_origins() {
    let b1_calls = Arc::new(AtomicU32::new(0));
    let b2_calls = Arc::new(AtomicU32::new(0));

    let c1 = b1_calls.clone();
    let b1 = common::start_programmable_backend(move || {
        let c1 = c1.clone();
        async move {
            c1.fetch_add(1, Ordering::SeqCst);
            (200, "b1".into())
        }
    })
    .await;
    let c2 = b2_calls.clone();
    let b2 = common::start_programmable_backend(move || {
        let c2 = c2.clone();
        async move {
            c2.fetch_add(1, Ordering::SeqCst);
            (200, "b2".into())
        }
    })
    .await;

    let mut config = common::base_config(&[b1, b2]);
    config.balancer.strategy = Strategy::RoundRobin;
    let (proxy, _shutdown) = common::spawn_proxy(config).await;

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();
    for _ in 0..4 {
        let res = client
            .get(format!("http://{}/x", proxy))
            .send()
            .await
            .expect("proxy unreachable");
        assert_eq!(res.status(), 200);
    }

    assert_eq!(b1_calls.load(Ordering::SeqCst), 2);
    assert_eq!(b2_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn forwards_request_shape_and_injects_forwarding_headers() {
    let backend = common::start_echo_backend().await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .post(format!("http://{}/api/items?kind=fast", proxy))
        .header("content-type", "application/json")
        .body("{\"name\":\"one\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = res.text().await.unwrap();
    assert!(seen.starts_with("POST /api/items?kind=fast HTTP/1.1"), "{seen}");
    assert!(seen.contains("x-forwarded-for: 127.0.0.1"), "{seen}");
    assert!(seen.contains("x-forwarded-proto: http"), "{seen}");
    assert!(seen.contains(&format!("x-forwarded-port: {}", proxy.port())), "{seen}");
    assert!(seen.contains("x-proxy-id: edgegate/0.1"), "{seen}");
    assert!(seen.contains("{\"name\":\"one\"}"), "{seen}");
}

#[tokio::test]
async fn upstream_5xx_is_forwarded_verbatim() {
    let backend =
        common::start_programmable_backend(|| async { (500, "boom".into()) }).await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
}

#[tokio::test]
async fn dead_origin_maps_to_502() {
    // Bind then drop to get a port nobody is listening on.
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[dead])).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn unlisted_method_is_refused_with_405() {
    let backend = common::start_mock_backend("ok").await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .patch(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 405);
}

#[tokio::test]
async fn traversal_and_double_slash_paths_are_refused() {
    let backend = common::start_mock_backend("ok").await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let res = common::raw_request(
        proxy,
        "GET /a/../b HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(res.starts_with("HTTP/1.1 400"), "{res}");
    assert!(res.contains("Invalid path"), "{res}");

    let res = common::raw_request(
        proxy,
        "GET /a/b//c HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(res.starts_with("HTTP/1.1 400"), "{res}");
}

#[tokio::test]
async fn suspicious_query_value_is_refused() {
    let backend = common::start_mock_backend("ok").await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let res = common::raw_request(
        proxy,
        "GET /x?q=1%27 HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(res.starts_with("HTTP/1.1 400"), "{res}");
    assert!(res.contains("Invalid query parameter"), "{res}");
}

#[tokio::test]
async fn post_with_disallowed_content_type_is_refused_with_415() {
    let backend = common::start_mock_backend("ok").await;
    let (proxy, _shutdown) = common::spawn_proxy(common::base_config(&[backend])).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .post(format!("http://{}/x", proxy))
        .header("content-type", "application/zip")
        .body("zipzip")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 415);
}

#[tokio::test]
async fn allow_list_gate_admits_loopback_and_blocks_others() {
    let backend = common::start_mock_backend("ok").await;

    // Loopback on the allow list: the request passes the gate.
    let mut config = common::base_config(&[backend]);
    config.security.ip.enabled = true;
    config.security.ip.mode = IpFilterMode::AllowList;
    config.security.ip.allow = vec!["127.0.0.1".into()];
    let (proxy, _shutdown) = common::spawn_proxy(config).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    // Loopback absent from the allow list: 403 with the generic body.
    let mut config = common::base_config(&[backend]);
    config.security.ip.enabled = true;
    config.security.ip.mode = IpFilterMode::AllowList;
    config.security.ip.allow = vec!["10.0.0.1".into()];
    let (proxy, _shutdown) = common::spawn_proxy(config).await;

    let res = client
        .get(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
    assert_eq!(res.text().await.unwrap(), "Access denied");
}

#[tokio::test]
async fn rate_limit_refuses_the_fourth_request_in_a_window() {
    let backend = common::start_mock_backend("ok").await;

    let mut config = common::base_config(&[backend]);
    config.security.rate.enabled = true;
    config.security.rate.limit = 3;
    // A wide window so the test cannot straddle a boundary.
    config.security.rate.window_s = 60;
    let (proxy, _shutdown) = common::spawn_proxy(config).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let mut statuses = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(format!("http://{}/x", proxy))
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 200, 429]);
}

#[tokio::test]
async fn metrics_snapshot_lists_counters_and_breaker_state() {
    let handle = edgegate::observability::metrics::install_recorder();
    let backend = common::start_mock_backend("ok").await;
    let (proxy, _shutdown) =
        common::spawn_proxy_with_metrics(common::base_config(&[backend]), Some(handle)).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{}/x", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let snapshot = client
        .get(format!("http://{}/metrics", proxy))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(snapshot.contains("proxy_requests_total"), "{snapshot}");
    assert!(snapshot.contains("method=\"GET\""), "{snapshot}");
    assert!(snapshot.contains("proxy_responses_total"), "{snapshot}");
    assert!(snapshot.contains("proxy_breaker_state"), "{snapshot}");
    assert!(snapshot.contains("origin=\"b1\""), "{snapshot}");
}
