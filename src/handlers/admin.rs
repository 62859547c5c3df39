// handlers/admin.rs - token-addressed moderation actions
//
// Moderators receive single-use links out of band; each link embeds an
// opaque token that maps to one pending action. No session is involved, so
// these sit in the public group behind the coarse IP limit only.

use axum::extract::{Path, State};
use serde_json::{json, Value};
use sqlx::Row;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

/// GET /admin/ban-link/:token - Preview what the ban token would do.
pub async fn ban_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT p.name, p.normalized_email
        FROM admin_action_token t
        JOIN person p ON p.id = t.person_id
        WHERE t.token = $1 AND t.action = 'ban' AND t.expires_at > NOW()
        "#,
    )
    .bind(&token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Unknown or expired token"))?;

    let name: String = row.get("name");
    Ok(ApiResponse::success(json!({
        "action": "ban",
        "name": name,
        "confirm_path": format!("/admin/ban/{token}"),
    })))
}

/// GET /admin/ban/:token - Execute the ban: record the identity, then
/// remove the account. The token is consumed either way.
pub async fn ban(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<Value> {
    let mut tx = state.db.begin().await?;

    let row = sqlx::query(
        r#"
        DELETE FROM admin_action_token
        WHERE token = $1 AND action = 'ban' AND expires_at > NOW()
        RETURNING person_id
        "#,
    )
    .bind(&token)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Unknown or expired token"))?;

    let person_id: i64 = row.get("person_id");

    sqlx::query(
        r#"
        INSERT INTO banned_person (normalized_email, ip_address)
        SELECT p.normalized_email, p.last_ip_address
        FROM person p
        WHERE p.id = $1
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(person_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM person WHERE id = $1")
        .bind(person_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(person_id, "account banned via admin token");
    Ok(ApiResponse::success(json!({ "banned": true })))
}

/// GET /admin/delete-photo-link/:token
pub async fn delete_photo_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT t.photo_position, p.name
        FROM admin_action_token t
        JOIN person p ON p.id = t.person_id
        WHERE t.token = $1 AND t.action = 'delete-photo' AND t.expires_at > NOW()
        "#,
    )
    .bind(&token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Unknown or expired token"))?;

    let name: String = row.get("name");
    let position: i32 = row.get("photo_position");
    Ok(ApiResponse::success(json!({
        "action": "delete-photo",
        "name": name,
        "photo_position": position,
        "confirm_path": format!("/admin/delete-photo/{token}"),
    })))
}

/// GET /admin/delete-photo/:token
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Value> {
    let mut tx = state.db.begin().await?;

    let row = sqlx::query(
        r#"
        DELETE FROM admin_action_token
        WHERE token = $1 AND action = 'delete-photo' AND expires_at > NOW()
        RETURNING person_id, photo_position
        "#,
    )
    .bind(&token)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Unknown or expired token"))?;

    let person_id: i64 = row.get("person_id");
    let position: i32 = row.get("photo_position");

    sqlx::query("DELETE FROM photo WHERE person_id = $1 AND position = $2")
        .bind(person_id)
        .bind(position)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(person_id, position, "photo removed via admin token");
    Ok(ApiResponse::success(json!({ "deleted": true })))
}
