use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

use crate::ratelimit::Quota;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub limits: LimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub session_expiry_hours: u64,
    pub otp_expiry_secs: u64,
}

/// Quota strings are parsed here, once, at startup. Handlers and the route
/// table only ever see the structured values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Skips every IP-scoped rule and the rules marked bypassable; used for
    /// trusted/internal traffic and local load tests.
    pub disable_ip_rate_limit: bool,
    /// Coarse per-IP limit in front of every policied route.
    pub default_ip: Quota,
    /// Shared bucket across OTP request/resend/check.
    pub otp: Quota,
    /// Account-scoped limit on the fresh-ranking search path.
    pub uncached_search: Quota,
    /// Account-scoped limit on skips that carry an abuse report.
    pub skip_report: Quota,
    /// Same, for the UUID-addressed skip route.
    pub skip_report_by_uuid: Quota,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // API overrides
        if let Ok(v) = env::var("API_DEFAULT_PAGE_SIZE") {
            self.api.default_page_size = v.parse().unwrap_or(self.api.default_page_size);
        }
        if let Ok(v) = env::var("API_MAX_PAGE_SIZE") {
            self.api.max_page_size = v.parse().unwrap_or(self.api.max_page_size);
        }
        if let Ok(v) = env::var("API_ENABLE_CORS") {
            self.api.enable_cors = v.parse().unwrap_or(self.api.enable_cors);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECT_TIMEOUT_SECS") {
            self.database.connect_timeout_secs =
                v.parse().unwrap_or(self.database.connect_timeout_secs);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_SESSION_EXPIRY_HOURS") {
            self.security.session_expiry_hours =
                v.parse().unwrap_or(self.security.session_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_OTP_EXPIRY_SECS") {
            self.security.otp_expiry_secs = v.parse().unwrap_or(self.security.otp_expiry_secs);
        }

        // Rate limit overrides; quota strings like "10 per minute"
        if let Ok(v) = env::var("LIMIT_DISABLE_IP_RATE_LIMIT") {
            self.limits.disable_ip_rate_limit =
                v.parse().unwrap_or(self.limits.disable_ip_rate_limit);
        }
        if let Ok(v) = env::var("LIMIT_DEFAULT_IP") {
            self.limits.default_ip = v.parse().unwrap_or(self.limits.default_ip);
        }
        if let Ok(v) = env::var("LIMIT_OTP") {
            self.limits.otp = v.parse().unwrap_or(self.limits.otp);
        }
        if let Ok(v) = env::var("LIMIT_UNCACHED_SEARCH") {
            self.limits.uncached_search = v.parse().unwrap_or(self.limits.uncached_search);
        }
        if let Ok(v) = env::var("LIMIT_SKIP_REPORT") {
            self.limits.skip_report = v.parse().unwrap_or(self.limits.skip_report);
        }
        if let Ok(v) = env::var("LIMIT_SKIP_REPORT_BY_UUID") {
            self.limits.skip_report_by_uuid =
                v.parse().unwrap_or(self.limits.skip_report_by_uuid);
        }

        self
    }

    fn quotas() -> LimitConfig {
        // Observed production policy; every preset starts from these.
        LimitConfig {
            disable_ip_rate_limit: false,
            default_ip: "100 per minute".parse().expect("valid quota"),
            otp: "5 per minute".parse().expect("valid quota"),
            uncached_search: "10 per minute".parse().expect("valid quota"),
            skip_report: "1 per minute".parse().expect("valid quota"),
            skip_report_by_uuid: "1 per 5 minutes".parse().expect("valid quota"),
        }
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            api: ApiConfig {
                default_page_size: 10,
                max_page_size: 100,
                enable_cors: true,
            },
            database: DatabaseConfig {
                max_connections: 10,
                connect_timeout_secs: 30,
            },
            security: SecurityConfig {
                session_expiry_hours: 24 * 90,
                otp_expiry_secs: 600,
            },
            limits: Self::quotas(),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            api: ApiConfig {
                default_page_size: 10,
                max_page_size: 100,
                enable_cors: true,
            },
            database: DatabaseConfig {
                max_connections: 20,
                connect_timeout_secs: 10,
            },
            security: SecurityConfig {
                session_expiry_hours: 24 * 30,
                otp_expiry_secs: 600,
            },
            limits: Self::quotas(),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            api: ApiConfig {
                default_page_size: 10,
                max_page_size: 100,
                enable_cors: false,
            },
            database: DatabaseConfig {
                max_connections: 50,
                connect_timeout_secs: 5,
            },
            security: SecurityConfig {
                session_expiry_hours: 24 * 90,
                otp_expiry_secs: 600,
            },
            limits: Self::quotas(),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn development_defaults() {
        let config = AppConfig::development();
        assert!(config.api.enable_cors);
        assert!(!config.limits.disable_ip_rate_limit);
        assert_eq!(config.limits.uncached_search.count, 10);
        assert_eq!(config.limits.uncached_search.window, Duration::from_secs(60));
    }

    #[test]
    fn production_defaults() {
        let config = AppConfig::production();
        assert!(!config.api.enable_cors);
        assert_eq!(config.limits.skip_report_by_uuid.window, Duration::from_secs(300));
        assert_eq!(config.limits.otp.count, 5);
    }
}
