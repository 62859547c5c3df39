// handlers/compare.rs - personality and answer comparison with a prospect

use axum::extract::{Extension, Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;

use crate::config;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::session::SessionContext;
use crate::state::AppState;
use crate::validate::{validate_page, FieldErrors, PageParams};

/// The fixed set of comparison topics. Anything else in the path fails
/// extraction, so handlers never see an unknown topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Mbti,
    Big5,
    Attachment,
    Politics,
    Other,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Mbti => "mbti",
            Topic::Big5 => "big5",
            Topic::Attachment => "attachment",
            Topic::Politics => "politics",
            Topic::Other => "other",
        }
    }
}

/// GET /compare-personalities/:prospect_person_id/:topic
pub async fn compare_personalities(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path((prospect_person_id, topic)): Path<(i64, Topic)>,
) -> ApiResult<Value> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS traits
        FROM (
            SELECT
                tr.name,
                tr.description,
                mine.score AS my_score,
                theirs.score AS prospect_score
            FROM trait tr
            JOIN person_trait mine
                ON mine.trait_id = tr.id AND mine.person_id = $1
            JOIN person_trait theirs
                ON theirs.trait_id = tr.id AND theirs.person_id = $2
            WHERE tr.topic = $3
            ORDER BY tr.id
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .bind(prospect_person_id)
    .bind(topic.as_str())
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("traits")))
}

#[derive(Debug, Deserialize)]
pub struct CompareAnswersParams {
    pub agreement: Option<String>,
    pub topic: Option<String>,
    pub n: Option<String>,
    pub o: Option<String>,
}

/// GET /compare-answers/:prospect_person_id - Question-level agreement,
/// filterable by agreement bucket and topic.
pub async fn compare_answers(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Path(prospect_person_id): Path<i64>,
    Query(params): Query<CompareAnswersParams>,
) -> ApiResult<Value> {
    let cfg = config::config();
    let page = PageParams {
        n: params.n.clone(),
        o: params.o.clone(),
    };
    let (n, o) = validate_page(&page, cfg.api.default_page_size, cfg.api.max_page_size)?;

    if let Some(agreement) = params.agreement.as_deref() {
        if !matches!(agreement, "agree" | "disagree" | "unanswered") {
            let mut fields = FieldErrors::new();
            fields.insert(
                "agreement".to_string(),
                "must be one of agree, disagree, unanswered".to_string(),
            );
            return Err(ApiError::validation("Invalid request", fields));
        }
    }

    let row = sqlx::query(
        r#"
        SELECT COALESCE(json_agg(t), '[]'::json) AS answers
        FROM (
            SELECT
                q.id,
                q.question,
                q.topic,
                mine.answer AS my_answer,
                theirs.answer AS prospect_answer
            FROM question q
            JOIN answer mine
                ON mine.question_id = q.id
                AND mine.person_id = $1
                AND mine.public_
            LEFT JOIN answer theirs
                ON theirs.question_id = q.id
                AND theirs.person_id = $2
                AND theirs.public_
            WHERE ($3::text IS NULL OR q.topic = $3)
            AND CASE $4::text
                WHEN 'agree' THEN theirs.answer IS NOT DISTINCT FROM mine.answer
                WHEN 'disagree' THEN
                    theirs.answer IS NOT NULL AND theirs.answer <> mine.answer
                WHEN 'unanswered' THEN theirs.answer IS NULL
                ELSE TRUE
            END
            ORDER BY q.id
            LIMIT $5 OFFSET $6
        ) t
        "#,
    )
    .bind(ctx.person_id)
    .bind(prospect_person_id)
    .bind(&params.topic)
    .bind(&params.agreement)
    .bind(n as i64)
    .bind(o as i64)
    .fetch_one(&state.db)
    .await?;

    Ok(ApiResponse::success(row.get("answers")))
}
