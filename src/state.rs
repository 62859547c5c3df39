use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::ratelimit::{RateLimiter, RuleSet};
use crate::search::{PgSearchBackend, SearchBackend};
use crate::session::{PgSessionStore, SessionStore};

/// Everything the route table injects into handlers and middleware.
///
/// The session and search stores are trait objects so tests can stand in
/// deterministic fakes; the rate limiter is built once here so its counter
/// map is shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub sessions: Arc<dyn SessionStore>,
    pub search: Arc<dyn SearchBackend>,
    pub limiter: Arc<RateLimiter>,
    pub rules: Arc<RuleSet>,
}

impl AppState {
    /// Production wiring over a connected pool.
    pub fn new(db: PgPool) -> Self {
        let cfg = config::config();
        Self {
            sessions: Arc::new(PgSessionStore::new(db.clone())),
            search: Arc::new(PgSearchBackend::new(db.clone())),
            limiter: Arc::new(RateLimiter::new(cfg.limits.disable_ip_rate_limit)),
            rules: Arc::new(RuleSet::from_config(&cfg.limits)),
            db,
        }
    }

    /// Connect to `DATABASE_URL` and build the production state.
    pub async fn connect() -> anyhow::Result<Self> {
        let cfg = config::config();
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;

        let pool = PgPoolOptions::new()
            .max_connections(cfg.database.max_connections)
            .acquire_timeout(Duration::from_secs(cfg.database.connect_timeout_secs))
            .connect(&database_url)
            .await?;

        tracing::info!(
            max_connections = cfg.database.max_connections,
            "database pool ready"
        );
        Ok(Self::new(pool))
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
