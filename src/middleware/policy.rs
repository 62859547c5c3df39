//! Per-route policy enforcement.
//!
//! A [`RoutePolicy`] is an explicit, ordered list of stages applied in front
//! of a route group: IP-scoped rate limits first, then session resolution,
//! then the expected-status guard, then any account-scoped rules. One
//! middleware function walks the stages so ordering and short-circuiting are
//! visible in one place, and every stage is testable on its own.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ApiError;
use crate::ratelimit::{RateLimitRule, Scope};
use crate::session::{self, OnboardingStatus, SessionContext};
use crate::state::AppState;

/// Expected-status predicate for a route. `None` matches any value;
/// `Some(v)` requires exact equality with the resolved session context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    pub onboarding: Option<OnboardingStatus>,
    pub sign_in: Option<bool>,
}

impl Default for Guard {
    /// The common case: onboarding finished and OTP challenge passed.
    fn default() -> Self {
        Self {
            onboarding: Some(OnboardingStatus::Complete),
            sign_in: Some(true),
        }
    }
}

impl Guard {
    /// Signed in, any onboarding stage (sign-out, session checks).
    pub fn any_stage() -> Self {
        Self {
            onboarding: None,
            sign_in: Some(true),
        }
    }

    /// Valid session, nothing else expected (location search during signup).
    pub fn any() -> Self {
        Self {
            onboarding: None,
            sign_in: None,
        }
    }

    /// OTP not yet checked (resend/check routes).
    pub fn pre_sign_in() -> Self {
        Self {
            onboarding: None,
            sign_in: Some(false),
        }
    }

    /// Mid-onboarding only.
    pub fn onboardee() -> Self {
        Self {
            onboarding: Some(OnboardingStatus::Incomplete),
            sign_in: Some(true),
        }
    }

    pub fn check(&self, ctx: &SessionContext) -> Result<(), ApiError> {
        if let Some(expected) = self.onboarding {
            if ctx.onboarding != expected {
                tracing::debug!(
                    person_id = ctx.person_id,
                    expected = ?expected,
                    actual = ?ctx.onboarding,
                    "onboarding status mismatch"
                );
                return Err(ApiError::status_mismatch(
                    "Wrong onboarding stage for this route",
                ));
            }
        }
        if let Some(expected) = self.sign_in {
            if ctx.signed_in != expected {
                tracing::debug!(
                    person_id = ctx.person_id,
                    expected,
                    actual = ctx.signed_in,
                    "sign-in status mismatch"
                );
                return Err(ApiError::status_mismatch(
                    "Wrong sign-in status for this route",
                ));
            }
        }
        Ok(())
    }
}

/// Ordered stages for one route group.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    pub limits: Vec<RateLimitRule>,
    pub auth: Option<Guard>,
}

impl RoutePolicy {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn session(guard: Guard) -> Self {
        Self {
            limits: Vec::new(),
            auth: Some(guard),
        }
    }

    pub fn limit(mut self, rule: RateLimitRule) -> Self {
        self.limits.push(rule);
        self
    }
}

pub type PolicyState = (AppState, Arc<RoutePolicy>);

/// The middleware driving a [`RoutePolicy`]. Every stage must admit for the
/// request to reach the handler; any rejection short-circuits with the
/// stage's error before business logic runs.
pub async fn enforce(
    State((state, policy)): State<PolicyState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);

    // Stage 1: coarse IP-scoped limits, before any store lookups.
    for rule in policy.limits.iter().filter(|r| r.scope == Scope::Ip) {
        state.limiter.check_and_consume(rule, &ip)?;
    }

    // Stage 2: session resolution + expected-status guard.
    let ctx = match &policy.auth {
        Some(guard) => {
            let ctx = session::resolve(state.sessions.as_ref(), request.headers()).await?;
            guard.check(&ctx)?;
            Some(ctx)
        }
        None => None,
    };

    // Stage 3: account-scoped rules stacked on the route itself.
    if let Some(ctx) = &ctx {
        let account_key = ctx.person_id.to_string();
        for rule in policy.limits.iter().filter(|r| r.scope == Scope::Account) {
            state.limiter.check_and_consume(rule, &account_key)?;
        }
    }

    if let Some(ctx) = ctx {
        request.extensions_mut().insert(ctx);
    }

    Ok(next.run(request).await)
}

/// Client identity for IP-scoped buckets: forwarded headers first (proxied
/// deployments), then the peer address.
pub fn client_ip(request: &Request) -> String {
    let headers = request.headers();

    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
