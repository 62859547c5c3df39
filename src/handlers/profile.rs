// handlers/profile.rs - own profile, prospect profiles, account lifecycle

use axum::extract::{Extension, Path, State};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{length_field, FieldErrors, Valid, ValidateRequest};

const PROFILE_COLUMNS: &str = r#"
    SELECT
        p.uuid AS person_uuid,
        p.name,
        p.gender,
        p.location,
        p.about,
        DATE_PART('year', AGE(p.date_of_birth)) AS age,
        COALESCE(p.onboarded, FALSE) AS onboarded
    FROM person p
"#;

async fn profile_by_id(state: &AppState, person_id: i64) -> Result<Value, ApiError> {
    let query = format!(
        "SELECT row_to_json(t) AS profile FROM ({PROFILE_COLUMNS} WHERE p.id = $1 AND p.activated) t"
    );
    let row = sqlx::query(&query)
        .bind(person_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("No such person"))?;
    Ok(row.get("profile"))
}

/// GET /me - The caller's own profile.
pub async fn get_me_by_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    Ok(ApiResponse::success(profile_by_id(&state, ctx.person_id).await?))
}

/// GET /me/:person_id - Public profile lookup by numeric id or UUID string.
pub async fn get_me_by_id(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
) -> ApiResult<Value> {
    let query = if person_id.parse::<i64>().is_ok() {
        format!(
            "SELECT row_to_json(t) AS profile FROM ({PROFILE_COLUMNS} WHERE p.id = $1::bigint AND p.activated) t"
        )
    } else if Uuid::parse_str(&person_id).is_ok() {
        format!(
            "SELECT row_to_json(t) AS profile FROM ({PROFILE_COLUMNS} WHERE p.uuid = $1::uuid AND p.activated) t"
        )
    } else {
        return Err(ApiError::bad_request("person_id must be an id or a UUID"));
    };

    let row = sqlx::query(&query)
        .bind(&person_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("No such person"))?;

    Ok(ApiResponse::success(row.get("profile")))
}

/// GET /prospect-profile/:prospect_uuid - Full prospect view, including the
/// match percentage against the caller.
pub async fn get_prospect_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(prospect_uuid): Path<Uuid>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT row_to_json(t) AS profile
        FROM (
            SELECT
                p.uuid AS person_uuid,
                p.name,
                p.gender,
                p.location,
                p.about,
                DATE_PART('year', AGE(p.date_of_birth)) AS age,
                match_score(p.id, $2) AS match_percentage
            FROM person p
            WHERE p.uuid = $1
            AND p.activated
            AND COALESCE(p.onboarded, FALSE)
        ) t
        "#,
    )
    .bind(prospect_uuid)
    .bind(ctx.person_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("No such person"))?;

    Ok(ApiResponse::success(row.get("profile")))
}

/// GET /profile-info
pub async fn get_profile_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    Ok(ApiResponse::success(profile_by_id(&state, ctx.person_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PatchProfileInfo {
    pub name: Option<String>,
    pub location: Option<String>,
    pub about: Option<String>,
}

impl ValidateRequest for PatchProfileInfo {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.name.is_none() && self.location.is_none() && self.about.is_none() {
            fields.insert("body".to_string(), "at least one field is required".to_string());
            return fields;
        }
        if let Some(name) = &self.name {
            length_field(&mut fields, "name", name, 1, 64);
        }
        if let Some(location) = &self.location {
            length_field(&mut fields, "location", location, 1, 128);
        }
        if let Some(about) = &self.about {
            length_field(&mut fields, "about", about, 0, 10_000);
        }
        fields
    }
}

/// PATCH /profile-info
pub async fn patch_profile_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PatchProfileInfo>,
) -> ApiResult<Value> {
    sqlx::query(
        r#"
        UPDATE person SET
            name = COALESCE($2, name),
            location = COALESCE($3, location),
            about = COALESCE($4, about)
        WHERE id = $1
        "#,
    )
    .bind(ctx.person_id)
    .bind(&req.name)
    .bind(&req.location)
    .bind(&req.about)
    .execute(&state.db)
    .await?;

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteProfileInfo {
    /// Photo slots to clear, 1-based.
    pub files: Vec<i32>,
}

impl ValidateRequest for DeleteProfileInfo {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.files.is_empty() || self.files.iter().any(|f| !(1..=7).contains(f)) {
            fields.insert(
                "files".to_string(),
                "must be a non-empty list of slots in 1..=7".to_string(),
            );
        }
        fields
    }
}

/// DELETE /profile-info
pub async fn delete_profile_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<DeleteProfileInfo>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM photo WHERE person_id = $1 AND position = ANY($2)")
        .bind(ctx.person_id)
        .bind(&req.files)
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct PostInboxInfo {
    pub person_uuids: Vec<Uuid>,
}

impl ValidateRequest for PostInboxInfo {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.person_uuids.is_empty() || self.person_uuids.len() > 100 {
            fields.insert(
                "person_uuids".to_string(),
                "must contain between 1 and 100 entries".to_string(),
            );
        }
        fields
    }
}

/// POST /inbox-info - Display data for a batch of conversation partners.
pub async fn post_inbox_info(
    State(state): State<AppState>,
    Extension(_ctx): Extension<SessionContext>,
    Valid(req): Valid<PostInboxInfo>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS people
        FROM (
            SELECT
                p.uuid AS person_uuid,
                p.name,
                p.activated,
                COALESCE(p.onboarded, FALSE) AS onboarded
            FROM person p
            WHERE p.uuid = ANY($1)
        ) t
        "#,
    )
    .bind(&req.person_uuids)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("people")))
}

/// POST /deactivate - Hide the account and destroy every session.
pub async fn post_deactivate(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    let mut tx = state.db.begin().await?;

    sqlx::query("UPDATE person SET activated = FALSE WHERE id = $1")
        .bind(ctx.person_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM person_session WHERE person_id = $1")
        .bind(ctx.person_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(person_id = ctx.person_id, "account deactivated");
    Ok(ApiResponse::success(json!({})))
}

/// DELETE /account - Permanent removal; dependent rows cascade.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM person WHERE id = $1")
        .bind(ctx.person_id)
        .execute(&state.db)
        .await?;

    tracing::info!(person_id = ctx.person_id, "account deleted");
    Ok(ApiResponse::success(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_info_bounds_the_batch() {
        let empty = PostInboxInfo {
            person_uuids: vec![],
        };
        assert!(empty.validate().contains_key("person_uuids"));

        let oversized = PostInboxInfo {
            person_uuids: (0..101).map(|_| Uuid::new_v4()).collect(),
        };
        assert!(oversized.validate().contains_key("person_uuids"));

        let ok = PostInboxInfo {
            person_uuids: vec![Uuid::new_v4()],
        };
        assert!(ok.validate().is_empty());
    }
}
