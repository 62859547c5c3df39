// handlers/onboarding.rs - profile setup before an account goes live
//
// All routes here sit behind the onboardee guard: a finished account gets a
// STATUS_MISMATCH before any of these run.

use axum::extract::{Extension, State};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{length_field, FieldErrors, Valid, ValidateRequest};

#[derive(Debug, Deserialize)]
pub struct PatchOnboardeeInfo {
    pub name: Option<String>,
    pub date_of_birth: Option<String>,
    pub location: Option<String>,
    pub gender: Option<String>,
    pub about: Option<String>,
}

impl ValidateRequest for PatchOnboardeeInfo {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();

        if self.name.is_none()
            && self.date_of_birth.is_none()
            && self.location.is_none()
            && self.gender.is_none()
            && self.about.is_none()
        {
            fields.insert("body".to_string(), "at least one field is required".to_string());
            return fields;
        }

        if let Some(name) = &self.name {
            length_field(&mut fields, "name", name, 1, 64);
        }
        if let Some(dob) = &self.date_of_birth {
            if NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_err() {
                fields.insert(
                    "date_of_birth".to_string(),
                    "must be a date formatted YYYY-MM-DD".to_string(),
                );
            }
        }
        if let Some(location) = &self.location {
            length_field(&mut fields, "location", location, 1, 128);
        }
        if let Some(gender) = &self.gender {
            length_field(&mut fields, "gender", gender, 1, 32);
        }
        if let Some(about) = &self.about {
            length_field(&mut fields, "about", about, 0, 10_000);
        }

        fields
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteOnboardeeInfo {
    /// Photo slots to clear, 1-based.
    pub files: Vec<i32>,
}

impl ValidateRequest for DeleteOnboardeeInfo {
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

/// PATCH /onboardee-info - Fill in profile fields during setup.
pub async fn patch_onboardee_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PatchOnboardeeInfo>,
) -> ApiResult<Value> {
    sqlx::query(
        r#"
        UPDATE person SET
            name = COALESCE($2, name),
            date_of_birth = COALESCE($3::date, date_of_birth),
            location = COALESCE($4, location),
            gender = COALESCE($5, gender),
            about = COALESCE($6, about)
        WHERE id = $1
        "#,
    )
    .bind(ctx.person_id)
    .bind(&req.name)
    .bind(&req.date_of_birth)
    .bind(&req.location)
    .bind(&req.gender)
    .bind(&req.about)
    .execute(&state.db)
    .await?;

    Ok(ApiResponse::success(json!({})))
}

/// DELETE /onboardee-info - Clear uploaded photo slots.
pub async fn delete_onboardee_info(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<DeleteOnboardeeInfo>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM photo WHERE person_id = $1 AND position = ANY($2)")
        .bind(ctx.person_id)
        .bind(&req.files)
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::success(json!({})))
}

/// POST /finish-onboarding - Flip the account live. The onboardee guard
/// guarantees this only ever runs for an incomplete account.
pub async fn finish_onboarding(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    let result = sqlx::query(
        r#"
        UPDATE person
        SET onboarded = TRUE
        WHERE id = $1 AND name IS NOT NULL AND date_of_birth IS NOT NULL
        "#,
    )
    .bind(ctx.person_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request(
            "Name and date of birth are required before finishing onboarding",
        ));
    }

    tracing::info!(person_id = ctx.person_id, "onboarding finished");
    Ok(ApiResponse::success(json!({})))
}
