//! Tiered search dispatch.
//!
//! A paginated search request is classified as cached when it can be served
//! from the session's materialized result window, and uncached otherwise.
//! Only the uncached path runs the full ranking query, so only it is gated
//! by an account-scoped quota; cached reads are bounded-cost and flow
//! through unthrottled.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::error::ApiError;
use crate::ratelimit::{RateLimitRule, RateLimiter};
use crate::session::SessionContext;

/// Which code path serves a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Cached,
    Uncached,
}

/// Extent of the caller's materialized result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultWindow {
    pub len: u32,
}

/// Classify one `(limit, offset)` pair against the materialized window.
///
/// Offset 0 always re-runs the ranking query (that is what materializes the
/// window in the first place), as does any range extending past the window
/// or a missing window. Pure and total: every input maps to exactly one
/// variant.
pub fn classify(limit: u32, offset: u32, window: Option<ResultWindow>) -> SearchKind {
    match window {
        Some(w) if offset > 0 && offset.checked_add(limit).map_or(false, |end| end <= w.len) => {
            SearchKind::Cached
        }
        _ => SearchKind::Uncached,
    }
}

/// Search persistence the dispatcher delegates to.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Extent of the caller's materialized results, if any.
    async fn cached_window(&self, person_id: i64) -> Result<Option<ResultWindow>, ApiError>;

    /// Page out of the materialized window.
    async fn cached_query(&self, person_id: i64, limit: u32, offset: u32)
        -> Result<Value, ApiError>;

    /// Run the ranking query, rematerialize the window, return the page.
    async fn fresh_query(&self, person_id: i64, limit: u32, offset: u32)
        -> Result<Value, ApiError>;
}

/// Pick the code path for one search request and gate the expensive one.
pub async fn dispatch(
    limiter: &RateLimiter,
    uncached_rule: &RateLimitRule,
    backend: &dyn SearchBackend,
    ctx: &SessionContext,
    limit: u32,
    offset: u32,
) -> Result<Value, ApiError> {
    let window = backend.cached_window(ctx.person_id).await?;

    match classify(limit, offset, window) {
        SearchKind::Uncached => {
            limiter.check_and_consume(uncached_rule, &ctx.person_id.to_string())?;
            tracing::debug!(person_id = ctx.person_id, offset, limit, "uncached search");
            backend.fresh_query(ctx.person_id, limit, offset).await
        }
        SearchKind::Cached => backend.cached_query(ctx.person_id, limit, offset).await,
    }
}

/// Postgres-backed search: a `search_cache` table holds each searcher's
/// materialized window; the fresh path rewrites it inside one transaction.
pub struct PgSearchBackend {
    pool: PgPool,
}

impl PgSearchBackend {
    /// Upper bound on how many prospects one fresh query materializes.
    const WINDOW_CAP: i64 = 500;

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchBackend for PgSearchBackend {
    async fn cached_window(&self, person_id: i64) -> Result<Option<ResultWindow>, ApiError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS len FROM search_cache WHERE searcher_person_id = $1",
        )
        .bind(person_id)
        .fetch_one(&self.pool)
        .await?;

        let len: i64 = row.get("len");
        if len == 0 {
            Ok(None)
        } else {
            Ok(Some(ResultWindow { len: len as u32 }))
        }
    }

    async fn cached_query(
        &self,
        person_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Value, ApiError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(json_agg(t.profile ORDER BY t.position), '[]'::json) AS page
            FROM (
                SELECT position, profile
                FROM search_cache
                WHERE searcher_person_id = $1
                ORDER BY position
                LIMIT $2 OFFSET $3
            ) t
            "#,
        )
        .bind(person_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("page"))
    }

    async fn fresh_query(
        &self,
        person_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Value, ApiError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM search_cache WHERE searcher_person_id = $1")
            .bind(person_id)
            .execute(&mut *tx)
            .await?;

        // Rank against the caller's preferences; skipped and deactivated
        // prospects never enter the window.
        sqlx::query(
            r#"
            INSERT INTO search_cache (searcher_person_id, position, prospect_person_id, profile)
            SELECT
                $1,
                ROW_NUMBER() OVER (ORDER BY match_score(p.id, $1) DESC, p.id),
                p.id,
                json_build_object(
                    'person_uuid', p.uuid,
                    'name', p.name,
                    'age', DATE_PART('year', AGE(p.date_of_birth)),
                    'match_percentage', match_score(p.id, $1)
                )
            FROM person p
            WHERE p.id <> $1
            AND p.activated
            AND p.onboarded
            AND NOT EXISTS (
                SELECT 1 FROM skipped
                WHERE subject_person_id = $1 AND object_person_id = p.id
            )
            AND NOT EXISTS (
                SELECT 1 FROM skipped
                WHERE subject_person_id = p.id AND object_person_id = $1
            )
            ORDER BY match_score(p.id, $1) DESC, p.id
            LIMIT $2
            "#,
        )
        .bind(person_id)
        .bind(Self::WINDOW_CAP)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(json_agg(t.profile ORDER BY t.position), '[]'::json) AS page
            FROM (
                SELECT position, profile
                FROM search_cache
                WHERE searcher_person_id = $1
                ORDER BY position
                LIMIT $2 OFFSET $3
            ) t
            "#,
        )
        .bind(person_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_one(&mut *tx)
        .await?;

        let page: Value = row.get("page");
        tx.commit().await?;

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Option<ResultWindow> = Some(ResultWindow { len: 50 });

    #[test]
    fn offset_zero_is_always_uncached() {
        assert_eq!(classify(10, 0, WINDOW), SearchKind::Uncached);
        assert_eq!(classify(10, 0, None), SearchKind::Uncached);
    }

    #[test]
    fn in_window_pages_are_cached() {
        assert_eq!(classify(10, 10, WINDOW), SearchKind::Cached);
        assert_eq!(classify(10, 40, WINDOW), SearchKind::Cached);
        assert_eq!(classify(49, 1, WINDOW), SearchKind::Cached);
    }

    #[test]
    fn ranges_past_the_window_are_uncached() {
        assert_eq!(classify(10, 41, WINDOW), SearchKind::Uncached);
        assert_eq!(classify(51, 1, WINDOW), SearchKind::Uncached);
    }

    #[test]
    fn missing_window_is_uncached() {
        assert_eq!(classify(10, 20, None), SearchKind::Uncached);
    }

    #[test]
    fn classification_is_total_and_idempotent() {
        // Includes the overflow corner: offset + limit past u32::MAX must
        // classify (as uncached), not panic.
        for (limit, offset) in [
            (0, 0),
            (1, 0),
            (0, 1),
            (10, 40),
            (u32::MAX, 1),
            (1, u32::MAX),
            (u32::MAX, u32::MAX),
        ] {
            let first = classify(limit, offset, WINDOW);
            let second = classify(limit, offset, WINDOW);
            assert_eq!(first, second, "limit={limit} offset={offset}");
        }
        assert_eq!(classify(u32::MAX, 1, WINDOW), SearchKind::Uncached);
    }
}
