// handlers/otp.rs - OTP sign-in lifecycle
//
// request-otp issues a session token and passcode, check-otp upgrades the
// session to signed-in, resend-otp rotates the passcode. All three draw from
// one shared rate-limit bucket, configured in the route table.

use axum::extract::{Extension, State};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use crate::config;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::{self, SessionContext};
use crate::state::AppState;
use crate::validate::{email_field, otp_field, FieldErrors, Valid, ValidateRequest};

#[derive(Debug, Deserialize)]
pub struct PostRequestOtp {
    pub email: String,
}

impl ValidateRequest for PostRequestOtp {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        email_field(&mut fields, "email", &self.email);
        fields
    }
}

#[derive(Debug, Deserialize)]
pub struct PostCheckOtp {
    pub otp: String,
}

impl ValidateRequest for PostCheckOtp {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        otp_field(&mut fields, "otp", &self.otp);
        fields
    }
}

fn generate_otp() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// POST /request-otp - Start a sign-in: upsert the person row for the email,
/// mint an opaque session token, and attach a fresh passcode.
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "session_token": "uuid", "onboarded": false } }
/// ```
pub async fn request_otp(
    State(state): State<AppState>,
    Valid(req): Valid<PostRequestOtp>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let token = Uuid::new_v4().to_string();
    let otp = generate_otp();

    let row = sqlx::query(
        r#"
        INSERT INTO person (email, normalized_email)
        VALUES ($1, LOWER($1))
        ON CONFLICT (normalized_email) DO UPDATE SET email = EXCLUDED.email
        RETURNING id, COALESCE(onboarded, FALSE) AS onboarded
        "#,
    )
    .bind(&req.email)
    .fetch_one(&state.db)
    .await?;

    let person_id: i64 = row.get("id");
    let onboarded: bool = row.get("onboarded");

    sqlx::query(
        r#"
        INSERT INTO person_session
            (token_hash, person_id, otp, otp_expiry, signed_in, expires_at)
        VALUES
            ($1, $2, $3,
             NOW() + make_interval(secs => $4),
             FALSE,
             NOW() + make_interval(hours => $5))
        "#,
    )
    .bind(session::hash_credential(&token))
    .bind(person_id)
    .bind(&otp)
    .bind(cfg.security.otp_expiry_secs as f64)
    .bind(cfg.security.session_expiry_hours as i32)
    .execute(&state.db)
    .await?;

    tracing::info!(person_id, "issued OTP session");

    Ok(ApiResponse::success(json!({
        "session_token": token,
        "onboarded": onboarded,
    })))
}

/// POST /resend-otp - Rotate the pending passcode on the current session.
pub async fn resend_otp(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let otp = generate_otp();

    let result = sqlx::query(
        r#"
        UPDATE person_session
        SET otp = $2, otp_expiry = NOW() + make_interval(secs => $3)
        WHERE token_hash = $1 AND signed_in = FALSE
        "#,
    )
    .bind(&ctx.credential_hash)
    .bind(&otp)
    .bind(cfg.security.otp_expiry_secs as f64)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("No pending passcode for this session"));
    }

    Ok(ApiResponse::success(json!({})))
}

/// POST /check-otp - Complete the OTP challenge; marks the session signed-in.
pub async fn check_otp(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostCheckOtp>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        UPDATE person_session
        SET signed_in = TRUE
        WHERE token_hash = $1 AND otp = $2 AND otp_expiry > NOW()
        RETURNING person_id
        "#,
    )
    .bind(&ctx.credential_hash)
    .bind(&req.otp)
    .fetch_optional(&state.db)
    .await?;

    match row {
        Some(_) => {
            tracing::info!(person_id = ctx.person_id, "OTP challenge passed");
            Ok(ApiResponse::success(json!({
                "onboarding": ctx.onboarding,
            })))
        }
        None => {
            tracing::debug!(person_id = ctx.person_id, "OTP challenge failed");
            Err(ApiError::bad_request("Incorrect or expired passcode"))
        }
    }
}

/// POST /sign-out - Destroy the current session.
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM person_session WHERE token_hash = $1")
        .bind(&ctx.credential_hash)
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::success(json!({})))
}

/// POST /check-session-token - The policy layer already resolved and checked
/// the session; just echo its state back so clients can restore UI.
pub async fn check_session_token(
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    Ok(ApiResponse::success(json!({
        "person_id": ctx.person_id,
        "person_uuid": ctx.person_uuid,
        "onboarding": ctx.onboarding,
        "signed_in": ctx.signed_in,
    })))
}
