// handlers/skip.rs - skipping prospects, with optional abuse reports
//
// A plain skip is cheap and unthrottled. A skip carrying a report_reason
// triggers moderation work, so it consumes an account-scoped quota before
// the write: 1 per minute for the numeric route, 1 per 5 minutes for the
// UUID route. Both report branches return the handler result.

use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{length_field, FieldErrors, Valid, ValidateRequest};

#[derive(Debug, Deserialize)]
pub struct PostSkip {
    pub report_reason: Option<String>,
}

impl ValidateRequest for PostSkip {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if let Some(reason) = &self.report_reason {
            length_field(&mut fields, "report_reason", reason, 1, 10_000);
        }
        fields
    }
}

async fn insert_skip(
    db: &PgPool,
    subject_person_id: i64,
    object_person_id: i64,
    report_reason: Option<&str>,
) -> Result<Value, ApiError> {
    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO skipped (subject_person_id, object_person_id, report_reason)
        VALUES ($1, $2, $3)
        ON CONFLICT (subject_person_id, object_person_id)
        DO UPDATE SET report_reason = COALESCE(EXCLUDED.report_reason, skipped.report_reason)
        "#,
    )
    .bind(subject_person_id)
    .bind(object_person_id)
    .bind(report_reason)
    .execute(&mut *tx)
    .await?;

    if let Some(reason) = report_reason {
        sqlx::query(
            r#"
            INSERT INTO moderation_report (reporter_person_id, reported_person_id, reason)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(subject_person_id)
        .bind(object_person_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tracing::info!(
            reporter = subject_person_id,
            reported = object_person_id,
            "moderation report filed with skip"
        );
    }

    tx.commit().await?;
    Ok(json!({}))
}

/// POST /skip/:prospect_person_id
pub async fn post_skip(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(prospect_person_id): Path<i64>,
    Valid(req): Valid<PostSkip>,
) -> ApiResult<Value> {
    if req.report_reason.is_some() {
        state
            .limiter
            .check_and_consume(&state.rules.skip_report, &ctx.person_id.to_string())?;
    }

    let payload = insert_skip(
        &state.db,
        ctx.person_id,
        prospect_person_id,
        req.report_reason.as_deref(),
    )
    .await?;

    Ok(ApiResponse::success(payload))
}

/// POST /skip/by-uuid/:prospect_uuid
pub async fn post_skip_by_uuid(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(prospect_uuid): Path<Uuid>,
    Valid(req): Valid<PostSkip>,
) -> ApiResult<Value> {
    if req.report_reason.is_some() {
        state.limiter.check_and_consume(
            &state.rules.skip_report_by_uuid,
            &ctx.person_id.to_string(),
        )?;
    }

    let row = sqlx::query("SELECT id FROM person WHERE uuid = $1")
        .bind(prospect_uuid)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("No such person"))?;

    let prospect_person_id: i64 = row.get("id");

    let payload = insert_skip(
        &state.db,
        ctx.person_id,
        prospect_person_id,
        req.report_reason.as_deref(),
    )
    .await?;

    Ok(ApiResponse::success(payload))
}

/// POST /unskip/:prospect_person_id
pub async fn post_unskip(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(prospect_person_id): Path<i64>,
) -> ApiResult<Value> {
    sqlx::query(
        "DELETE FROM skipped WHERE subject_person_id = $1 AND object_person_id = $2",
    )
    .bind(ctx.person_id)
    .bind(prospect_person_id)
    .execute(&state.db)
    .await?;

    Ok(ApiResponse::success(json!({})))
}
