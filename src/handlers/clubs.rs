// handlers/clubs.rs - club membership

use axum::extract::{Extension, Query, State};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{length_field, FieldErrors, Valid, ValidateRequest};

#[derive(Debug, Deserialize)]
pub struct ClubSearchParams {
    #[serde(default)]
    pub q: String,
}

/// GET /search-clubs - Prefix search over club names with member counts.
pub async fn search_clubs(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<ClubSearchParams>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS clubs
        FROM (
            SELECT
                c.name,
                COUNT(pc.person_id) AS count_members,
                BOOL_OR(pc.person_id = $1) AS joined
            FROM club c
            LEFT JOIN person_club pc ON pc.club_name = c.name
            WHERE c.name ILIKE $2 || '%'
            GROUP BY c.name
            ORDER BY COUNT(pc.person_id) DESC, c.name
            LIMIT 20
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .bind(&params.q)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("clubs")))
}

#[derive(Debug, Deserialize)]
pub struct PostJoinClub {
    pub name: String,
}

impl ValidateRequest for PostJoinClub {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        length_field(&mut fields, "name", &self.name, 1, 42);
        fields
    }
}

/// POST /join-club - Creates the club on first join.
pub async fn join_club(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostJoinClub>,
) -> ApiResult<Value> {
    let name = req.name.trim();
    let mut tx = state.db.begin().await?;

    sqlx::query("INSERT INTO club (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO person_club (person_id, club_name)
        VALUES ($1, $2)
        ON CONFLICT (person_id, club_name) DO NOTHING
        "#,
    )
    .bind(ctx.person_id)
    .bind(name)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ApiResponse::success(json!({ "name": name })))
}

#[derive(Debug, Deserialize)]
pub struct PostLeaveClub {
    pub name: String,
}

impl ValidateRequest for PostLeaveClub {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        length_field(&mut fields, "name", &self.name, 1, 42);
        fields
    }
}

/// POST /leave-club
pub async fn leave_club(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostLeaveClub>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM person_club WHERE person_id = $1 AND club_name = $2")
        .bind(ctx.person_id)
        .bind(req.name.trim())
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::success(json!({})))
}
