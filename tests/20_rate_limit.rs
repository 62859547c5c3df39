mod common;

use axum::http::StatusCode;
use common::{app, member, send, test_state, test_state_with, FakeSearchBackend, FakeSessionStore};

// Rate-limit behavior at the router level. Limits run before session
// resolution, so a request can consume quota and still be rejected by the
// guard; that ordering is what these tests lean on to exercise buckets
// without a live database.

// Dev-config quotas: default IP "100 per minute", shared OTP "5 per minute".

#[tokio::test]
async fn otp_routes_share_one_bucket_per_ip() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // A signed-in session is rejected by the pre-sign-in guard with a 401,
    // but only after the OTP bucket is consumed. Alternate between the two
    // challenge routes: five consumptions total.
    for i in 0..5 {
        let path = if i % 2 == 0 { "/resend-otp" } else { "/check-otp" };
        let (status, body) = send(&app, "POST", path, Some("member-token"), "203.0.113.7", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "call {i}");
        assert_eq!(body["code"], "STATUS_MISMATCH");
    }

    // Sixth call from the same IP trips the shared bucket no matter which
    // route it lands on.
    let (status, body) = send(
        &app,
        "POST",
        "/check-otp",
        Some("member-token"),
        "203.0.113.7",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
    assert!(body["retry_after"].as_u64().unwrap() >= 1);

    // A different IP has its own bucket.
    let (status, _) = send(
        &app,
        "POST",
        "/resend-otp",
        Some("member-token"),
        "203.0.113.8",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn request_otp_draws_from_the_same_bucket_as_the_challenge_routes() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // Exhaust the bucket via the challenge routes...
    for _ in 0..5 {
        send(&app, "POST", "/resend-otp", Some("member-token"), "203.0.113.9", None).await;
    }

    // ...and /request-otp is blocked for the same IP, before validation
    // would even look at the body.
    let (status, body) = send(&app, "POST", "/request-otp", None, "203.0.113.9", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn coarse_ip_limit_covers_every_policied_route() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // 100 unauthenticated hits consume the default IP quota (each 401s at
    // session resolution, after the limit stage).
    for i in 0..100 {
        let (status, _) = send(&app, "GET", "/me", Some("bad-token"), "198.51.100.50", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "call {i}");
    }

    let (status, body) = send(&app, "GET", "/me", Some("bad-token"), "198.51.100.50", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn health_is_never_rate_limited() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // Far past every quota; the health route carries no policy. Status may
    // be 503 here because the harness has no live database, but it must
    // never be 429.
    for i in 0..150 {
        let (status, _) = send(&app, "GET", "/health", None, "198.51.100.60", None).await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS, "call {i}");
    }
}

#[tokio::test]
async fn disabling_ip_limiting_bypasses_ip_scoped_rules() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state_with(
        sessions,
        FakeSearchBackend::new(None),
        true,
    ));

    for i in 0..120 {
        let (status, body) =
            send(&app, "GET", "/me", Some("bad-token"), "198.51.100.70", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "call {i}");
        assert_eq!(body["code"], "INVALID_SESSION");
    }
}

#[tokio::test]
async fn skip_with_report_is_throttled_per_account() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let report = serde_json::json!({ "report_reason": "spam profile" });

    // First reported skip consumes the 1-per-minute account quota. The
    // handler then reaches for the absent database, so its own status is
    // not asserted beyond "not throttled".
    let (status, _) = send(
        &app,
        "POST",
        "/skip/42",
        Some("member-token"),
        "198.51.100.80",
        Some(report.clone()),
    )
    .await;
    assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);

    // Second reported skip within the window is rejected before the
    // handler runs.
    let (status, body) = send(
        &app,
        "POST",
        "/skip/42",
        Some("member-token"),
        "198.51.100.80",
        Some(report),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
}

#[tokio::test]
async fn plain_skip_bypasses_the_report_throttle() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let plain = serde_json::json!({ "report_reason": null });

    for i in 0..5 {
        let (status, _) = send(
            &app,
            "POST",
            "/skip/42",
            Some("member-token"),
            "198.51.100.81",
            Some(plain.clone()),
        )
        .await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS, "call {i}");
    }
}

#[tokio::test]
async fn uuid_skip_report_uses_its_own_slower_bucket() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let report = serde_json::json!({ "report_reason": "spam profile" });
    let uuid = "123e4567-e89b-12d3-a456-426614174000";

    let (status, _) = send(
        &app,
        "POST",
        &format!("/skip/by-uuid/{uuid}"),
        Some("member-token"),
        "198.51.100.82",
        Some(report.clone()),
    )
    .await;
    assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/skip/by-uuid/{uuid}"),
        Some("member-token"),
        "198.51.100.82",
        Some(report),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "TOO_MANY_REQUESTS");
}
