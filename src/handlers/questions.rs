// handlers/questions.rs - personality questions and answers

use axum::extract::{Extension, Query, State};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::config;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{validate_page, FieldErrors, PageParams, Valid, ValidateRequest};

/// GET /next-questions - Unanswered questions, paginated.
pub async fn next_questions(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<PageParams>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let (n, o) = validate_page(&params, cfg.api.default_page_size, cfg.api.max_page_size)?;

    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS questions
        FROM (
            SELECT q.id, q.question, q.topic
            FROM question q
            WHERE NOT EXISTS (
                SELECT 1 FROM answer
                WHERE person_id = $1 AND question_id = q.id
            )
            ORDER BY q.id
            LIMIT $2 OFFSET $3
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .bind(n as i64)
    .bind(o as i64)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("questions")))
}

#[derive(Debug, Deserialize)]
pub struct PostAnswer {
    pub question_id: i64,
    pub answer: Option<bool>,
    pub public: bool,
}

impl ValidateRequest for PostAnswer {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.question_id < 1 {
            fields.insert("question_id".to_string(), "must be a positive id".to_string());
        }
        fields
    }
}

/// POST /answer - Record or update an answer.
pub async fn post_answer(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<PostAnswer>,
) -> ApiResult<Value> {
    sqlx::query(
        r#"
        INSERT INTO answer (person_id, question_id, answer, public_)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (person_id, question_id)
        DO UPDATE SET answer = EXCLUDED.answer, public_ = EXCLUDED.public_
        "#,
    )
    .bind(ctx.person_id)
    .bind(req.question_id)
    .bind(req.answer)
    .bind(req.public)
    .execute(&state.db)
    .await?;

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAnswer {
    pub question_id: i64,
}

impl ValidateRequest for DeleteAnswer {
    fn validate(&self) -> FieldErrors {
        let mut fields = FieldErrors::new();
        if self.question_id < 1 {
            fields.insert("question_id".to_string(), "must be a positive id".to_string());
        }
        fields
    }
}

/// DELETE /answer
pub async fn delete_answer(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Valid(req): Valid<DeleteAnswer>,
) -> ApiResult<Value> {
    sqlx::query("DELETE FROM answer WHERE person_id = $1 AND question_id = $2")
        .bind(ctx.person_id)
        .bind(req.question_id)
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::success(json!({})))
}

#[derive(Debug, Deserialize)]
pub struct FilterQuestionParams {
    #[serde(default)]
    pub q: String,
    pub n: Option<String>,
    pub o: Option<String>,
}

/// GET /search-filter-questions - Questions usable as search filters,
/// matched against a free-text query.
pub async fn search_filter_questions(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<FilterQuestionParams>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let page = PageParams {
        n: params.n.clone(),
        o: params.o.clone(),
    };
    let (n, o) = validate_page(&page, cfg.api.default_page_size, cfg.api.max_page_size)?;

    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS questions
        FROM (
            SELECT
                q.id,
                q.question,
                q.topic,
                f.answer AS filter_answer,
                f.accept_unanswered
            FROM question q
            LEFT JOIN search_filter_answer f
                ON f.question_id = q.id AND f.person_id = $1
            WHERE q.question ILIKE '%' || $2 || '%'
            ORDER BY q.id
            LIMIT $3 OFFSET $4
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .bind(&params.q)
    .bind(n as i64)
    .bind(o as i64)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("questions")))
}
