mod common;

use axum::http::StatusCode;
use common::{app, member, onboardee, send, test_state, FakeSearchBackend, FakeSessionStore};
use serde_json::json;

// Request validation and routing-level parameter checks. Every rejection
// here carries VALIDATION_ERROR with the full set of violated fields, or
// fails typed path extraction before the handler.

#[tokio::test]
async fn request_otp_rejects_a_malformed_email() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "POST",
        "/request-otp",
        None,
        "10.2.0.1",
        Some(json!({ "email": "not-an-email" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["email"].is_string());
}

#[tokio::test]
async fn malformed_json_reports_the_body_itself() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "POST",
        "/request-otp",
        None,
        "10.2.0.2",
        // Wrong shape: email must be a string
        Some(json!({ "email": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["body"].is_string());
}

#[tokio::test]
async fn onboardee_patch_reports_every_bad_field_at_once() {
    let sessions = FakeSessionStore::new();
    sessions.insert("onboardee-token", onboardee(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "PATCH",
        "/onboardee-info",
        Some("onboardee-token"),
        "10.2.0.3",
        Some(json!({ "name": "", "date_of_birth": "31/12/1999" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["name"].is_string());
    assert!(body["field_errors"]["date_of_birth"].is_string());
}

#[tokio::test]
async fn answer_rejects_a_non_positive_question_id() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "POST",
        "/answer",
        Some("member-token"),
        "10.2.0.4",
        Some(json!({ "question_id": -5, "answer": true, "public": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["field_errors"]["question_id"].is_string());
}

#[tokio::test]
async fn search_pagination_reports_both_bad_params() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "GET",
        "/search?n=abc&o=xyz",
        Some("member-token"),
        "10.2.0.5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["n"].is_string());
    assert!(body["field_errors"]["o"].is_string());
}

#[tokio::test]
async fn unknown_comparison_topic_is_rejected_before_the_handler() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // astrology is not in the topic enumeration; extraction fails with a
    // 400 and no handler (or database access) is ever involved.
    let (status, _) = send(
        &app,
        "GET",
        "/compare-personalities/7/astrology",
        Some("member-token"),
        "10.2.0.6",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn comparison_topic_routes_still_require_a_session() {
    let sessions = FakeSessionStore::new();
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    // Policy runs before path extraction: no token means 401 even for a
    // valid topic.
    let (status, body) = send(
        &app,
        "GET",
        "/compare-personalities/7/mbti",
        None,
        "10.2.0.7",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SESSION");
}

#[tokio::test]
async fn blank_report_reason_is_rejected() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "POST",
        "/skip/42",
        Some("member-token"),
        "10.2.0.8",
        Some(json!({ "report_reason": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["field_errors"]["report_reason"].is_string());
}

#[tokio::test]
async fn compare_answers_rejects_an_unknown_agreement_bucket() {
    let sessions = FakeSessionStore::new();
    sessions.insert("member-token", member(7));
    let app = app(test_state(sessions, FakeSearchBackend::new(None)));

    let (status, body) = send(
        &app,
        "GET",
        "/compare-answers/7?agreement=maybe",
        Some("member-token"),
        "10.2.0.9",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["field_errors"]["agreement"].is_string());
}
