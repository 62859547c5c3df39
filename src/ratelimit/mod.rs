//! Keyed quota accounting for the request-authorization layer.
//!
//! The limiter is an injected service constructed once at startup. Quota
//! strings such as "10 per minute" are parsed into structured values at
//! configuration time; counters live in a process-wide map keyed by
//! (rule id, scope key) so routes that share a rule id share a bucket.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::LimitConfig;

/// Parsed form of a textual quota such as "10 per minute" or "1 per 5 minutes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Quota {
    pub count: u32,
    pub window: Duration,
}

impl Quota {
    pub const fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaParseError {
    #[error("quota must look like \"<count> per [<n>] <unit>\", got: {0}")]
    Malformed(String),
    #[error("unknown quota window unit: {0}")]
    UnknownUnit(String),
    #[error("quota count and window must be non-zero")]
    Zero,
}

impl FromStr for Quota {
    type Err = QuotaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || QuotaParseError::Malformed(s.to_string());
        let mut parts = s.split_whitespace();

        let count: u32 = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(malformed)?;

        if parts.next() != Some("per") {
            return Err(malformed());
        }

        let rest: Vec<&str> = parts.collect();
        let (multiple, unit): (u64, &str) = match rest.as_slice() {
            [unit] => (1, unit),
            [n, unit] => (n.parse().map_err(|_| malformed())?, unit),
            _ => return Err(malformed()),
        };

        let unit_secs = match unit.trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86_400,
            other => return Err(QuotaParseError::UnknownUnit(other.to_string())),
        };

        if count == 0 || multiple == 0 {
            return Err(QuotaParseError::Zero);
        }

        Ok(Quota::new(count, Duration::from_secs(multiple * unit_secs)))
    }
}

/// Identity a counter is bucketed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Ip,
    Account,
}

/// When a rule is bypassed without consuming quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exempt {
    Never,
    IpLimitingDisabled,
}

/// One quota rule. Rules sharing an `id` share counters, which is how the
/// OTP request/resend/check routes draw from a single bucket.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub id: &'static str,
    pub quota: Quota,
    pub scope: Scope,
    pub exempt: Exempt,
}

impl RateLimitRule {
    pub fn per_ip(id: &'static str, quota: Quota) -> Self {
        Self {
            id,
            quota,
            scope: Scope::Ip,
            exempt: Exempt::IpLimitingDisabled,
        }
    }

    pub fn per_account(id: &'static str, quota: Quota) -> Self {
        Self {
            id,
            quota,
            scope: Scope::Account,
            exempt: Exempt::Never,
        }
    }

    pub fn exempt_when(mut self, exempt: Exempt) -> Self {
        self.exempt = exempt;
        self
    }
}

/// The rules the route table and dispatchers consume, built once from
/// configuration so quota strings are never re-parsed per request.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub default_ip: RateLimitRule,
    pub otp: RateLimitRule,
    pub uncached_search: RateLimitRule,
    pub skip_report: RateLimitRule,
    pub skip_report_by_uuid: RateLimitRule,
}

impl RuleSet {
    pub fn from_config(limits: &LimitConfig) -> Self {
        Self {
            default_ip: RateLimitRule::per_ip("default", limits.default_ip),
            otp: RateLimitRule::per_ip("otp", limits.otp),
            uncached_search: RateLimitRule::per_account("uncached-search", limits.uncached_search)
                .exempt_when(Exempt::IpLimitingDisabled),
            skip_report: RateLimitRule::per_account("skip-report", limits.skip_report)
                .exempt_when(Exempt::IpLimitingDisabled),
            skip_report_by_uuid: RateLimitRule::per_account(
                "skip-report-by-uuid",
                limits.skip_report_by_uuid,
            )
            .exempt_when(Exempt::IpLimitingDisabled),
        }
    }
}

/// Quota exceeded for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("quota exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Time source seam so tests can drive window expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
    ttl: Duration,
}

type BucketKey = (&'static str, String);

/// Fixed-window counter store shared by every concurrent request.
///
/// check-and-increment happens under a single lock acquisition, so two
/// requests racing for the last slot in a window can never both be admitted.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    ip_limiting_disabled: bool,
    buckets: Mutex<HashMap<BucketKey, Window>>,
}

impl RateLimiter {
    pub fn new(ip_limiting_disabled: bool) -> Self {
        Self::with_clock(Arc::new(SystemClock), ip_limiting_disabled)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ip_limiting_disabled: bool) -> Self {
        Self {
            clock,
            ip_limiting_disabled,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn is_exempt(&self, rule: &RateLimitRule) -> bool {
        match rule.exempt {
            Exempt::Never => false,
            Exempt::IpLimitingDisabled => self.ip_limiting_disabled,
        }
    }

    /// Admit or reject one request against `rule` for `key`.
    ///
    /// The exemption predicate runs first and admits without touching the
    /// counter. An elapsed window is lazily overwritten rather than kept
    /// around, so counters never grow without bound within a bucket.
    pub fn check_and_consume(&self, rule: &RateLimitRule, key: &str) -> Result<(), RateLimited> {
        if self.is_exempt(rule) {
            return Ok(());
        }

        let now = self.clock.now();
        let mut buckets = self.lock_buckets();

        let window = buckets
            .entry((rule.id, key.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
                ttl: rule.quota.window,
            });

        if now.duration_since(window.started) >= window.ttl {
            window.started = now;
            window.count = 0;
            window.ttl = rule.quota.window;
        }

        if window.count >= rule.quota.count {
            let retry_after = window.ttl - now.duration_since(window.started);
            tracing::debug!(
                rule = rule.id,
                key = key,
                limit = rule.quota.count,
                "rate limit exceeded"
            );
            return Err(RateLimited { retry_after });
        }

        window.count += 1;
        Ok(())
    }

    /// Current count within the live window (for monitoring).
    pub fn current_count(&self, rule: &RateLimitRule, key: &str) -> u32 {
        let now = self.clock.now();
        let buckets = self.lock_buckets();
        match buckets.get(&(rule.id, key.to_string())) {
            Some(w) if now.duration_since(w.started) < w.ttl => w.count,
            _ => 0,
        }
    }

    /// Drop every bucket whose window has elapsed.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut buckets = self.lock_buckets();
        buckets.retain(|_, w| now.duration_since(w.started) < w.ttl);
    }

    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, HashMap<BucketKey, Window>> {
        // A poisoned lock only means another request panicked mid-update;
        // the counter map itself is still coherent.
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ip_limiting_disabled", &self.ip_limiting_disabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn quota(s: &str) -> Quota {
        s.parse().unwrap()
    }

    #[test]
    fn parses_simple_quota_strings() {
        assert_eq!(quota("10 per minute"), Quota::new(10, Duration::from_secs(60)));
        assert_eq!(quota("1 per 5 minutes"), Quota::new(1, Duration::from_secs(300)));
        assert_eq!(quota("100 per hour"), Quota::new(100, Duration::from_secs(3600)));
        assert_eq!(quota("3 per 30 seconds"), Quota::new(3, Duration::from_secs(30)));
        assert_eq!(quota("2 per day"), Quota::new(2, Duration::from_secs(86_400)));
    }

    #[test]
    fn rejects_malformed_quota_strings() {
        assert!("".parse::<Quota>().is_err());
        assert!("ten per minute".parse::<Quota>().is_err());
        assert!("10 minutes".parse::<Quota>().is_err());
        assert!("10 per fortnight".parse::<Quota>().is_err());
        assert!("0 per minute".parse::<Quota>().is_err());
        assert!("10 per 0 minutes".parse::<Quota>().is_err());
    }

    #[test]
    fn admits_exactly_n_per_window() {
        let limiter = RateLimiter::new(false);
        let rule = RateLimitRule::per_ip("t", quota("3 per minute"));

        for _ in 0..3 {
            assert!(limiter.check_and_consume(&rule, "1.2.3.4").is_ok());
        }
        let denied = limiter.check_and_consume(&rule, "1.2.3.4").unwrap_err();
        assert!(denied.retry_after <= Duration::from_secs(60));
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn counter_resets_when_window_elapses() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), false);
        let rule = RateLimitRule::per_ip("t", quota("2 per minute"));

        assert!(limiter.check_and_consume(&rule, "k").is_ok());
        assert!(limiter.check_and_consume(&rule, "k").is_ok());
        assert!(limiter.check_and_consume(&rule, "k").is_err());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check_and_consume(&rule, "k").is_ok());
        assert_eq!(limiter.current_count(&rule, "k"), 1);
    }

    #[test]
    fn rules_with_one_id_share_a_bucket() {
        // Two rule values standing in for two routes configured with the
        // same shared limit.
        let limiter = RateLimiter::new(false);
        let route_a = RateLimitRule::per_ip("otp", quota("2 per minute"));
        let route_b = RateLimitRule::per_ip("otp", quota("2 per minute"));

        assert!(limiter.check_and_consume(&route_a, "9.9.9.9").is_ok());
        assert!(limiter.check_and_consume(&route_b, "9.9.9.9").is_ok());
        assert!(limiter.check_and_consume(&route_a, "9.9.9.9").is_err());
        assert!(limiter.check_and_consume(&route_b, "9.9.9.9").is_err());
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let limiter = RateLimiter::new(false);
        let rule = RateLimitRule::per_account("t", quota("1 per minute"));

        assert!(limiter.check_and_consume(&rule, "41").is_ok());
        assert!(limiter.check_and_consume(&rule, "41").is_err());
        assert!(limiter.check_and_consume(&rule, "42").is_ok());
    }

    #[test]
    fn exemption_admits_without_consuming() {
        let limiter = RateLimiter::with_clock(Arc::new(SystemClock), true);
        let rule = RateLimitRule::per_ip("t", quota("1 per minute"));

        for _ in 0..5 {
            assert!(limiter.check_and_consume(&rule, "k").is_ok());
        }
        assert_eq!(limiter.current_count(&rule, "k"), 0);
    }

    #[test]
    fn account_rules_apply_even_when_ip_limiting_is_disabled() {
        let limiter = RateLimiter::with_clock(Arc::new(SystemClock), true);
        let rule = RateLimitRule::per_account("t", quota("1 per minute"));

        assert!(limiter.check_and_consume(&rule, "7").is_ok());
        assert!(limiter.check_and_consume(&rule, "7").is_err());
    }

    #[test]
    fn sweep_drops_only_elapsed_windows() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), false);
        let short = RateLimitRule::per_ip("short", quota("1 per 30 seconds"));
        let long = RateLimitRule::per_ip("long", quota("1 per hour"));

        limiter.check_and_consume(&short, "k").unwrap();
        limiter.check_and_consume(&long, "k").unwrap();

        clock.advance(Duration::from_secs(31));
        limiter.sweep();

        assert_eq!(limiter.current_count(&short, "k"), 0);
        assert_eq!(limiter.current_count(&long, "k"), 1);
    }

    #[test]
    fn concurrent_consumers_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new(false));
        let rule = RateLimitRule::per_account("t", quota("50 per minute"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let rule = rule.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.check_and_consume(&rule, "k").is_ok())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
