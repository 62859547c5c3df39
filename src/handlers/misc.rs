// handlers/misc.rs - health, public stats, notification preferences,
// location autocomplete

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;
use crate::validate::FieldErrors;
use crate::error::ApiError;

/// GET /health - Liveness plus a database ping. Carries no policy at all:
/// never rate limited, never authenticated.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}

const STATS_TTL: Duration = Duration::from_secs(10);

static STATS_CACHE: Lazy<Mutex<Option<(Instant, Value)>>> = Lazy::new(|| Mutex::new(None));

/// GET /stats - Public counters, memoized so a stats widget refreshing on
/// every page view costs one query per ten seconds.
pub async fn stats(State(state): State<AppState>) -> ApiResult<Value> {
    {
        let cache = STATS_CACHE.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((at, value)) = cache.as_ref() {
            if at.elapsed() < STATS_TTL {
                return Ok(ApiResponse::success(value.clone()));
            }
        }
    }

    let row = sqlx::query(
        r#"
        SELECT json_build_object(
            'num_active_users',
                (SELECT COUNT(*) FROM person WHERE activated AND COALESCE(onboarded, FALSE)),
            'num_answers', (SELECT COUNT(*) FROM answer)
        ) AS stats
        "#,
    )
    .fetch_one(&state.db)
    .await?;

    let value: Value = row.get("stats");

    let mut cache = STATS_CACHE.lock().unwrap_or_else(|p| p.into_inner());
    *cache = Some((Instant::now(), value.clone()));

    Ok(ApiResponse::success(value))
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotificationParams {
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub frequency: String,
}

/// GET /update-notifications - One-click notification frequency change from
/// an email link; addressed by email, no session.
pub async fn update_notifications(
    State(state): State<AppState>,
    Query(params): Query<UpdateNotificationParams>,
) -> ApiResult<Value> {
    let mut fields = FieldErrors::new();
    if params.email.is_empty() {
        fields.insert("email".to_string(), "is required".to_string());
    }
    if !matches!(params.kind.as_str(), "chats" | "intros") {
        fields.insert("type".to_string(), "must be one of chats, intros".to_string());
    }
    if !matches!(
        params.frequency.as_str(),
        "immediately" | "daily" | "never"
    ) {
        fields.insert(
            "frequency".to_string(),
            "must be one of immediately, daily, never".to_string(),
        );
    }
    if !fields.is_empty() {
        return Err(ApiError::validation("Invalid request", fields));
    }

    let query = if params.kind == "chats" {
        "UPDATE person SET chats_notification = $2 WHERE normalized_email = LOWER($1)"
    } else {
        "UPDATE person SET intros_notification = $2 WHERE normalized_email = LOWER($1)"
    };

    let result = sqlx::query(query)
        .bind(&params.email)
        .bind(&params.frequency)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("No account with that email"));
    }

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct LocationSearchParams {
    #[serde(default)]
    pub q: String,
}

/// GET /search-locations - Autocomplete for the location picker; available
/// to any valid session, even before the OTP check.
pub async fn search_locations(
    State(state): State<AppState>,
    Query(params): Query<LocationSearchParams>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t.long_friendly), '[]'::json) AS locations
        FROM (
            SELECT long_friendly
            FROM location
            WHERE long_friendly ILIKE $1 || '%'
            ORDER BY long_friendly
            LIMIT 10
        ) t
        "#,
    )
    .bind(&params.q)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("locations")))
}
