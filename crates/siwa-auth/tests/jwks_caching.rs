//! Key set caching behavior under load and failure
//!
//! Covers the cache contract: one fetch per miss, single-flight collapse
//! of concurrent misses, TTL-driven refresh with an injected clock, the
//! unknown-kid rate limit, and failure/cancellation surfacing. Request
//! counts are enforced with wiremock expectations, verified when the mock
//! server drops.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use siwa_auth::keys::JwksClient;
use siwa_auth::AuthError;

use common::{MockAppleServer, TestKey};

#[tokio::test]
async fn test_repeated_lookups_hit_cache() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("cached-key");
    server.mock_jwks_expect(vec![key.jwk()], 1).await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let entry = client.get_key("cached-key", &cancel).await.unwrap();
        assert_eq!(entry.kid, "cached-key");
    }
    assert_eq!(client.cached_key_count().await, 1);
}

#[tokio::test]
async fn test_unknown_kid_triggers_exactly_one_fetch() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("present-key");
    server.mock_jwks_expect(vec![key.jwk()], 1).await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let err = client
        .get_key("absent-key", &CancellationToken::new())
        .await
        .unwrap_err();

    // One fetch happened (the wiremock expectation), the key is still
    // missing, and no further network call was made for this request
    assert!(matches!(err, AuthError::KeyNotFound { ref kid } if kid == "absent-key"));
}

#[tokio::test]
async fn test_unknown_kid_on_fresh_set_is_rate_limited() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("present-key");
    server.mock_jwks_expect(vec![key.jwk()], 1).await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let cancel = CancellationToken::new();

    // Populate the cache
    client.get_key("present-key", &cancel).await.unwrap();

    // Within the rate-limit window an unknown kid fails without another
    // fetch - the expectation of exactly 1 request enforces this
    let err = client.get_key("absent-key", &cancel).await.unwrap_err();
    assert!(matches!(err, AuthError::KeyNotFound { .. }));
}

#[tokio::test]
async fn test_unknown_kid_refreshes_when_rate_limit_allows() {
    let server = MockAppleServer::start().await;
    let old_key = TestKey::generate("old-key");
    let new_key = TestKey::generate("new-key");
    server.mock_jwks_once(vec![old_key.jwk()]).await;
    server.mock_jwks(vec![old_key.jwk(), new_key.jwk()]).await;

    let client =
        JwksClient::new(&server.jwks_endpoint).with_min_refresh_interval(Duration::ZERO);
    let cancel = CancellationToken::new();

    client.get_key("old-key", &cancel).await.unwrap();

    // Rotation: the new kid is absent from the cached set, and with no
    // rate limit the one allowed refresh finds it
    let entry = client.get_key("new-key", &cancel).await.unwrap();
    assert_eq!(entry.kid, "new-key");
    assert_eq!(client.cached_key_count().await, 2);
}

#[tokio::test]
async fn test_concurrent_misses_collapse_into_one_fetch() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("hot-key");
    // A little response latency widens the race window
    server
        .mock_jwks_delayed(vec![key.jwk()], Duration::from_millis(100))
        .await;

    let client = Arc::new(JwksClient::new(&server.jwks_endpoint));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let client = Arc::clone(&client);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            client.get_key("hot-key", &cancel).await
        }));
    }

    for handle in handles {
        let entry = handle.await.expect("task").expect("lookup");
        assert_eq!(entry.kid, "hot-key");
    }

    // Single-flight: 16 concurrent misses, exactly one request
    assert_eq!(server.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ttl_expiry_forces_refetch() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("rotating-key");
    server.mock_jwks_expect(vec![key.jwk()], 2).await;

    let now = Arc::new(Mutex::new(SystemTime::now()));
    let clock_handle = Arc::clone(&now);
    let client = JwksClient::new(&server.jwks_endpoint)
        .with_cache_ttl(Duration::from_secs(600))
        .with_clock(Arc::new(move || *clock_handle.lock().unwrap()));
    let cancel = CancellationToken::new();

    // First lookup fetches, second is served from cache
    client.get_key("rotating-key", &cancel).await.unwrap();
    client.get_key("rotating-key", &cancel).await.unwrap();

    // Advance past the TTL - next lookup must fetch again
    *now.lock().unwrap() += Duration::from_secs(601);
    client.get_key("rotating-key", &cancel).await.unwrap();
}

#[tokio::test]
async fn test_fetch_failure_surfaces_without_retry() {
    let server = MockAppleServer::start().await;
    server.mock_jwks_failure(503).await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let err = client
        .get_key("any-key", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, AuthError::KeySetFetch { ref reason } if reason.contains("503")),
        "got: {err:?}"
    );

    // No automatic retry: exactly one request reached the endpoint
    assert_eq!(server.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_key_set_document_is_a_fetch_error() {
    let server = MockAppleServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path("/auth/keys"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server.server)
        .await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let err = client
        .get_key("any-key", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::KeySetFetch { .. }));
}

#[tokio::test]
async fn test_fetch_is_cancellable() {
    let server = MockAppleServer::start().await;
    let key = TestKey::generate("slow-key");
    server
        .mock_jwks_delayed(vec![key.jwk()], Duration::from_secs(30))
        .await;

    let client = JwksClient::new(&server.jwks_endpoint);
    let cancel = CancellationToken::new();

    let pending = {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            // Give the fetch a moment to start before cancelling
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        client.get_key("slow-key", &cancel).await
    };

    let err = pending.unwrap_err();
    assert!(matches!(err, AuthError::Cancelled), "got: {err:?}");
}

#[tokio::test]
async fn test_set_replacement_is_atomic() {
    let server = MockAppleServer::start().await;
    let key_a = TestKey::generate("key-a");
    let key_b = TestKey::generate("key-b");
    server.mock_jwks_once(vec![key_a.jwk()]).await;
    server.mock_jwks(vec![key_b.jwk()]).await;

    let now = Arc::new(Mutex::new(SystemTime::now()));
    let clock_handle = Arc::clone(&now);
    let client = JwksClient::new(&server.jwks_endpoint)
        .with_cache_ttl(Duration::from_secs(600))
        .with_clock(Arc::new(move || *clock_handle.lock().unwrap()));
    let cancel = CancellationToken::new();

    client.get_key("key-a", &cancel).await.unwrap();
    assert_eq!(client.cached_key_count().await, 1);

    // After expiry the set is replaced wholesale: key-a is gone, key-b is
    // there, never a merged view
    *now.lock().unwrap() += Duration::from_secs(601);
    let entry = client.get_key("key-b", &cancel).await.unwrap();
    assert_eq!(entry.kid, "key-b");
    assert_eq!(client.cached_key_count().await, 1);
}
