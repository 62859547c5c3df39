// handlers/search.rs - prospect search and search filters
//
// GET /search is the one tiered route: the dispatcher decides between the
// materialized window and the fresh ranking query, and only the fresh path
// consumes the account-scoped quota.

use axum::extract::{Extension, Query, State};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::config;
use crate::middleware::{ApiResponse, ApiResult};
use crate::search;
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{validate_page, FieldErrors, PageParams, Valid, ValidateRequest};

/// GET /search - Paginated prospect search.
///
/// Classification happens per request: a page that falls inside the
/// caller's materialized window is served from it with no extra limiting;
/// anything else re-runs the ranking query under the uncached-search quota.
pub async fn get_search(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<PageParams>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let (n, o) = validate_page(&params, cfg.api.default_page_size, cfg.api.max_page_size)?;

    let page = search::dispatch(
        &state.limiter,
        &state.rules.uncached_search,
        state.search.as_ref(),
        &ctx,
        n,
        o,
    )
    .await?;

    Ok(ApiResponse::success(page))
}

/// GET /search-filters - The caller's current filter settings.
pub async fn get_search_filters(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(row_to_json(t), '{}'::json) AS filters
        FROM (
            SELECT gender, min_age, max_age, furthest_distance
            FROM search_preference
            WHERE person_id = $1
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("filters")))
}

#[derive(Debug, Deserialize)]
pub struct PostSearchFilter {
    pub gender: Option<Vec<String>>,
    pub min_age: Option<i16>,
    pub max_age: Option<i16>,
    pub furthest_distance: Option<i32>,
}

impl ValidateRequest for PostSearchFilter {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();

        if let Some(min) = self.min_age {
            if !(18..=99).contains(&min) {
                fields.insert("min_age".to_string(), "must be in 18..=99".to_string());
            }
        }
        if let Some(max) = self.max_age {
            if !(18..=99).contains(&max) {
                fields.insert("max_age".to_string(), "must be in 18..=99".to_string());
            }
        }
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                fields.insert("max_age".to_string(), "must be >= min_age".to_string());
            }
        }
        if let Some(distance) = self.furthest_distance {
            if distance < 1 {
                fields.insert(
                    "furthest_distance".to_string(),
                    "must be a positive number of kilometres".to_string(),
                );
            }
        }

        fields
    }
}

/// POST /search-filter - Update filter settings. The materialized window is
/// invalidated so the next search re-ranks under the new filters.
pub async fn post_search_filter(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostSearchFilter>,
) -> ApiResult<Value> {
    let mut tx = state.db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO search_preference (person_id, gender, min_age, max_age, furthest_distance)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (person_id) DO UPDATE SET
            gender = COALESCE(EXCLUDED.gender, search_preference.gender),
            min_age = COALESCE(EXCLUDED.min_age, search_preference.min_age),
            max_age = COALESCE(EXCLUDED.max_age, search_preference.max_age),
            furthest_distance =
                COALESCE(EXCLUDED.furthest_distance, search_preference.furthest_distance)
        "#,
    )
    .bind(ctx.person_id)
    .bind(&req.gender)
    .bind(req.min_age)
    .bind(req.max_age)
    .bind(req.furthest_distance)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM search_cache WHERE searcher_person_id = $1")
        .bind(ctx.person_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct PostSearchFilterAnswer {
    pub question_id: i64,
    pub answer: Option<bool>,
    #[serde(default)]
    pub accept_unanswered: bool,
}

impl ValidateRequest for PostSearchFilterAnswer {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.question_id < 1 {
            fields.insert("question_id".to_string(), "must be a positive id".to_string());
        }
        fields
    }
}

/// POST /search-filter-answer - Filter prospects by how they answered a
/// question; a null answer clears the filter.
pub async fn post_search_filter_answer(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostSearchFilterAnswer>,
) -> ApiResult<Value> {
    match req.answer {
        Some(answer) => {
            sqlx::query(
                r#"
                INSERT INTO search_filter_answer
                    (person_id, question_id, answer, accept_unanswered)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (person_id, question_id) DO UPDATE SET
                    answer = EXCLUDED.answer,
                    accept_unanswered = EXCLUDED.accept_unanswered
                "#,
            )
            .bind(ctx.person_id)
            .bind(req.question_id)
            .bind(answer)
            .bind(req.accept_unanswered)
            .execute(&state.db)
            .await?;
        }
        None => {
            sqlx::query(
                "DELETE FROM search_filter_answer WHERE person_id = $1 AND question_id = $2",
            )
            .bind(ctx.person_id)
            .bind(req.question_id)
            .execute(&state.db)
            .await?;
        }
    }

    Ok(ApiResponse::success(json!({})))
}
