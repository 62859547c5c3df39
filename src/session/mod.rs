//! Session credential resolution.
//!
//! A session is an opaque bearer token handed out at OTP request time. Only
//! the SHA-512 of the token is stored, so lookups hash the presented
//! credential first. Resolution reconstructs a [`SessionContext`] per request
//! and never caches it across requests.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

/// Where an account stands in the mandatory profile-setup flow.
///
/// `NotApplicable` covers person rows that predate the onboarding flag
/// (NULL column); guards that demand a concrete stage reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingStatus {
    Incomplete,
    Complete,
    NotApplicable,
}

impl OnboardingStatus {
    pub fn from_column(onboarded: Option<bool>) -> Self {
        match onboarded {
            Some(true) => OnboardingStatus::Complete,
            Some(false) => OnboardingStatus::Incomplete,
            None => OnboardingStatus::NotApplicable,
        }
    }
}

/// Authenticated request context, rebuilt from the credential on every
/// request and injected into request extensions by the policy middleware.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub person_id: i64,
    pub person_uuid: Uuid,
    pub onboarding: OnboardingStatus,
    pub signed_in: bool,
    /// Hash of the presenting credential, used by handlers that mutate the
    /// session row itself (sign-out, OTP checks).
    pub credential_hash: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Store of active sessions. Production backs this with Postgres; tests
/// inject in-memory fakes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a live session by hashed credential. Must resolve to exactly
    /// one live person record or fail with `NotFound`.
    async fn lookup(&self, credential_hash: &str) -> Result<SessionContext, SessionError>;
}

/// Hex SHA-512 of a session token; what the store keys on.
pub fn hash_credential(token: &str) -> String {
    use std::fmt::Write;

    let digest = Sha512::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Pull the bearer credential out of the Authorization header.
pub fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Resolve the request's credential into a session context.
///
/// Missing, malformed, expired, and unresolvable credentials all surface as
/// `INVALID_SESSION`; a store outage fails closed as a server error rather
/// than letting the request through unauthenticated.
pub async fn resolve(
    store: &dyn SessionStore,
    headers: &HeaderMap,
) -> Result<SessionContext, ApiError> {
    let token = bearer_credential(headers)
        .ok_or_else(|| ApiError::invalid_session("Missing session token"))?;

    match store.lookup(&hash_credential(token)).await {
        Ok(ctx) => Ok(ctx),
        Err(SessionError::NotFound) => {
            tracing::debug!("session resolution failed: unknown or expired token");
            Err(ApiError::invalid_session("Unknown or expired session token"))
        }
        Err(err @ SessionError::Unavailable(_)) => Err(err.into()),
    }
}

/// Postgres-backed session store.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn lookup(&self, credential_hash: &str) -> Result<SessionContext, SessionError> {
        let query = r#"
            SELECT
                s.person_id,
                p.uuid AS person_uuid,
                p.onboarded,
                s.signed_in
            FROM person_session s
            JOIN person p ON p.id = s.person_id
            WHERE s.token_hash = $1
            AND s.expires_at > NOW()
            AND p.activated
        "#;

        let row = sqlx::query(query)
            .bind(credential_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Unavailable(e.to_string()))?
            .ok_or(SessionError::NotFound)?;

        Ok(SessionContext {
            person_id: row.get("person_id"),
            person_uuid: row.get("person_uuid"),
            onboarding: OnboardingStatus::from_column(row.get("onboarded")),
            signed_in: row.get("signed_in"),
            credential_hash: credential_hash.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashMap;

    struct MapStore {
        sessions: HashMap<String, SessionContext>,
        unavailable: bool,
    }

    #[async_trait]
    impl SessionStore for MapStore {
        async fn lookup(&self, credential_hash: &str) -> Result<SessionContext, SessionError> {
            if self.unavailable {
                return Err(SessionError::Unavailable("connection refused".into()));
            }
            self.sessions
                .get(credential_hash)
                .cloned()
                .ok_or(SessionError::NotFound)
        }
    }

    fn ctx(person_id: i64) -> SessionContext {
        SessionContext {
            person_id,
            person_uuid: Uuid::new_v4(),
            onboarding: OnboardingStatus::Complete,
            signed_in: true,
            credential_hash: String::new(),
        }
    }

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn hashing_is_stable_and_hex() {
        let a = hash_credential("token-1");
        let b = hash_credential("token-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_credential("token-2"));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(
            bearer_credential(&headers_with_token("abc")),
            Some("abc")
        );
        assert_eq!(bearer_credential(&HeaderMap::new()), None);

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_credential(&basic), None);

        assert_eq!(bearer_credential(&headers_with_token("")), None);
    }

    #[tokio::test]
    async fn resolves_valid_credential_to_its_owner() {
        let mut sessions = HashMap::new();
        sessions.insert(hash_credential("good-token"), ctx(42));
        let store = MapStore {
            sessions,
            unavailable: false,
        };

        let resolved = resolve(&store, &headers_with_token("good-token"))
            .await
            .unwrap();
        assert_eq!(resolved.person_id, 42);
    }

    #[tokio::test]
    async fn unknown_credential_is_invalid_session() {
        let store = MapStore {
            sessions: HashMap::new(),
            unavailable: false,
        };

        let err = resolve(&store, &headers_with_token("nope")).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SESSION");
    }

    #[tokio::test]
    async fn missing_header_is_invalid_session() {
        let store = MapStore {
            sessions: HashMap::new(),
            unavailable: false,
        };

        let err = resolve(&store, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SESSION");
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let store = MapStore {
            sessions: HashMap::new(),
            unavailable: true,
        };

        let err = resolve(&store, &headers_with_token("any")).await.unwrap_err();
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn onboarding_column_mapping() {
        assert_eq!(
            OnboardingStatus::from_column(Some(true)),
            OnboardingStatus::Complete
        );
        assert_eq!(
            OnboardingStatus::from_column(Some(false)),
            OnboardingStatus::Incomplete
        );
        assert_eq!(
            OnboardingStatus::from_column(None),
            OnboardingStatus::NotApplicable
        );
    }
}
