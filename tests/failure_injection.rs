//! Failure injection tests for the adaptive proxy.

use std::time::Duration;

use adaptive_proxy::config::{MapperConfig, ProxyConfig};
use adaptive_proxy::Phase;
use tokio::net::TcpListener;

mod common;

#[tokio::test]
async fn test_no_endpoints_returns_503() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_endpoint_returns_502_and_counts_failure() {
    // Grab a free port, then close it so connections are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ProxyConfig::default();
    config.backends = vec![common::backend(dead, 1)];
    let proxy = common::start_proxy(config).await;

    let res = common::client().get(proxy.url("/x")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(proxy.pool.balancer().endpoints()[0].fail_rate(), 1.0);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_failing_endpoint_is_demoted() {
    let bad = common::start_programmable_backend(|| async { (500, "boom".to_string()) }).await;
    let good = common::start_mock_backend("ok").await;

    let mut config = ProxyConfig::default();
    config.backends = vec![common::backend(bad, 4), common::backend(good, 4)];
    config.balancer.backoff_secs = 1;
    config.balancer.tick_interval_ms = 50;
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    for _ in 0..16 {
        client.get(proxy.url("/")).send().await.unwrap();
    }

    let endpoints = proxy.pool.balancer().endpoints();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while endpoints[0].effective_weight() == 4 {
        assert!(tokio::time::Instant::now() < deadline, "failing endpoint was never demoted");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(endpoints[0].effective_weight() < 4);
    assert!(endpoints[0].effective_weight() >= 1);
    assert_eq!(endpoints[1].effective_weight(), 4);
    assert_ne!(proxy.pool.balancer().phase(), Phase::Revert);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_config_reload_changes_endpoints() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;

    let mut config = ProxyConfig::default();
    config.backends = vec![common::backend(a, 1)];
    let proxy = common::start_proxy(config.clone()).await;
    let client = common::client();

    config.backends = vec![common::backend(b, 1)];
    proxy.config_tx.send(config).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body = client.get(proxy.url("/")).send().await.unwrap().text().await.unwrap();
        if body == "b" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "reload never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(proxy.pool.balancer().len(), 1);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_rate_limit_per_header_token() {
    let a = common::start_mock_backend("a").await;

    let mut config = ProxyConfig::default();
    config.backends = vec![common::backend(a, 1)];
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1;
    config.rate_limit.burst_size = 2;
    config.rate_limit.mapper = MapperConfig::RequestHeader {
        header: "x-tenant".into(),
    };
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let send = |tenant: &'static str| client.get(proxy.url("/")).header("x-tenant", tenant).send();

    assert_eq!(send("alpha").await.unwrap().status(), 200);
    assert_eq!(send("alpha").await.unwrap().status(), 200);
    assert_eq!(send("alpha").await.unwrap().status(), 429);
    assert_eq!(send("beta").await.unwrap().status(), 200);

    proxy.shutdown.trigger();
}
