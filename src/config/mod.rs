use axum::http::HeaderValue;
use once_cell::sync::Lazy;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::net::IpAddr;

/// Secret used when `JWT_SECRET` is not set. Refused in production.
pub const DEVELOPMENT_JWT_SECRET: &str = "haven-development-secret-do-not-use-in-production";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub threat: ThreatConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub max_request_size_bytes: usize,
    pub trust_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub jwt_expiry_hours: u64,
    pub cors_origins: Vec<String>,
    pub enable_hsts: bool,
    pub login_max_failures: u32,
    pub login_lockout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ThreatConfig {
    pub enable_scanning: bool,
    /// Reject matching requests with 400. When false, matches are only logged.
    pub block_requests: bool,
    pub offence_threshold: u32,
    pub offence_window_secs: u64,
    pub block_duration_secs: u64,
    pub deny_list: Vec<IpAddr>,
    pub recent_events_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    /// GET requests under these prefixes count as PHI reads and are audited.
    pub phi_path_prefixes: Vec<String>,
    /// Fields never rewritten by the sanitizer nor scanned for threats.
    pub sanitize_skip_fields: Vec<String>,
}

impl AuditConfig {
    /// Prefix match on whole path segments, so `/api/notes` covers
    /// `/api/notes/<id>` but not `/api/notesx`.
    pub fn is_phi_path(&self, path: &str) -> bool {
        self.phi_path_prefixes.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path == prefix || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
        })
    }
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
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            if !v.trim().is_empty() {
                self.database.url = Some(v);
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Ok(v) = env::var("HAVEN_API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_REQUESTS") {
            self.api.rate_limit_requests = v.parse().unwrap_or(self.api.rate_limit_requests);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_WINDOW_SECS") {
            self.api.rate_limit_window_secs = v.parse().unwrap_or(self.api.rate_limit_window_secs);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("API_TRUST_PROXY") {
            self.api.trust_proxy = v.parse().unwrap_or(self.api.trust_proxy);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            if !v.is_empty() {
                self.security.jwt_secret = SecretString::from(v);
            }
        }
        if let Ok(v) = env::var("JWT_ISSUER") {
            self.security.jwt_issuer = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = split_list(&v);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_HSTS") {
            self.security.enable_hsts = v.parse().unwrap_or(self.security.enable_hsts);
        }
        if let Ok(v) = env::var("SECURITY_LOGIN_MAX_FAILURES") {
            self.security.login_max_failures = v.parse().unwrap_or(self.security.login_max_failures);
        }
        if let Ok(v) = env::var("SECURITY_LOGIN_LOCKOUT_SECS") {
            self.security.login_lockout_secs = v.parse().unwrap_or(self.security.login_lockout_secs);
        }

        // Threat overrides
        if let Ok(v) = env::var("THREAT_ENABLE_SCANNING") {
            self.threat.enable_scanning = v.parse().unwrap_or(self.threat.enable_scanning);
        }
        if let Ok(v) = env::var("THREAT_BLOCK_REQUESTS") {
            self.threat.block_requests = v.parse().unwrap_or(self.threat.block_requests);
        }
        if let Ok(v) = env::var("THREAT_OFFENCE_THRESHOLD") {
            self.threat.offence_threshold = v.parse().unwrap_or(self.threat.offence_threshold);
        }
        if let Ok(v) = env::var("THREAT_OFFENCE_WINDOW_SECS") {
            self.threat.offence_window_secs = v.parse().unwrap_or(self.threat.offence_window_secs);
        }
        if let Ok(v) = env::var("THREAT_BLOCK_DURATION_SECS") {
            self.threat.block_duration_secs = v.parse().unwrap_or(self.threat.block_duration_secs);
        }
        if let Ok(v) = env::var("THREAT_DENY_LIST") {
            self.threat.deny_list = split_list(&v)
                .iter()
                .filter_map(|s| match s.parse() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid THREAT_DENY_LIST entry '{}'", s);
                        None
                    }
                })
                .collect();
        }

        // Audit overrides
        if let Ok(v) = env::var("AUDIT_ENABLED") {
            self.audit.enabled = v.parse().unwrap_or(self.audit.enabled);
        }
        if let Ok(v) = env::var("AUDIT_PHI_PATH_PREFIXES") {
            self.audit.phi_path_prefixes = split_list(&v);
        }
        if let Ok(v) = env::var("AUDIT_SANITIZE_SKIP_FIELDS") {
            self.audit.sanitize_skip_fields = split_list(&v);
        }

        self
    }

    /// Reject configurations that must never reach a running server.
    pub fn validate(&self) -> Result<(), String> {
        let secret = self.security.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err("JWT_SECRET must not be empty".to_string());
        }
        if self.environment != Environment::Development && secret == DEVELOPMENT_JWT_SECRET {
            return Err("JWT_SECRET must be set outside development".to_string());
        }
        if self.environment == Environment::Production && secret.len() < 32 {
            return Err("JWT_SECRET must be at least 32 characters in production".to_string());
        }
        if self.api.rate_limit_requests == 0 || self.api.rate_limit_window_secs == 0 {
            return Err("rate limit requests and window must be positive".to_string());
        }
        // Credentialed CORS cannot use a wildcard, and tower-http panics on one in a list
        for origin in &self.security.cors_origins {
            if origin == "*" {
                return Err("SECURITY_CORS_ORIGINS must list explicit origins, not '*'".to_string());
            }
            if HeaderValue::from_str(origin).is_err() {
                return Err(format!("SECURITY_CORS_ORIGINS entry '{}' is not a valid origin", origin));
            }
        }
        Ok(())
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                port: 3000,
                enable_rate_limiting: true,
                rate_limit_requests: 1000,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                trust_proxy: true,
            },
            security: SecurityConfig {
                jwt_secret: SecretString::from(DEVELOPMENT_JWT_SECRET.to_string()),
                jwt_issuer: "haven-api".to_string(),
                jwt_expiry_hours: 24,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                enable_hsts: false,
                login_max_failures: 10,
                login_lockout_secs: 60,
            },
            threat: ThreatConfig {
                enable_scanning: true,
                block_requests: false,
                offence_threshold: 20,
                offence_window_secs: 300,
                block_duration_secs: 60,
                deny_list: Vec::new(),
                recent_events_capacity: 200,
            },
            audit: AuditConfig {
                enabled: true,
                phi_path_prefixes: default_phi_prefixes(),
                sanitize_skip_fields: default_skip_fields(),
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig {
                port: 3000,
                enable_rate_limiting: true,
                rate_limit_requests: 300,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
                trust_proxy: true,
            },
            security: SecurityConfig {
                jwt_secret: SecretString::from(DEVELOPMENT_JWT_SECRET.to_string()),
                jwt_issuer: "haven-api".to_string(),
                jwt_expiry_hours: 12,
                cors_origins: vec!["https://staging.havenrelationships.app".to_string()],
                enable_hsts: true,
                login_max_failures: 5,
                login_lockout_secs: 15 * 60,
            },
            threat: ThreatConfig {
                enable_scanning: true,
                block_requests: true,
                offence_threshold: 10,
                offence_window_secs: 300,
                block_duration_secs: 15 * 60,
                deny_list: Vec::new(),
                recent_events_capacity: 500,
            },
            audit: AuditConfig {
                enabled: true,
                phi_path_prefixes: default_phi_prefixes(),
                sanitize_skip_fields: default_skip_fields(),
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig {
                port: 3000,
                enable_rate_limiting: true,
                rate_limit_requests: 100,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
                trust_proxy: false,
            },
            security: SecurityConfig {
                jwt_secret: SecretString::from(DEVELOPMENT_JWT_SECRET.to_string()),
                jwt_issuer: "haven-api".to_string(),
                jwt_expiry_hours: 4,
                cors_origins: vec!["https://app.havenrelationships.app".to_string()],
                enable_hsts: true,
                login_max_failures: 5,
                login_lockout_secs: 15 * 60,
            },
            threat: ThreatConfig {
                enable_scanning: true,
                block_requests: true,
                offence_threshold: 5,
                offence_window_secs: 600,
                block_duration_secs: 60 * 60,
                deny_list: Vec::new(),
                recent_events_capacity: 1000,
            },
            audit: AuditConfig {
                enabled: true,
                phi_path_prefixes: default_phi_prefixes(),
                sanitize_skip_fields: default_skip_fields(),
            },
        }
    }
}

fn default_phi_prefixes() -> Vec<String> {
    vec!["/api/notes".to_string()]
}

fn default_skip_fields() -> Vec<String> {
    ["password", "current_password", "new_password", "token"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
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

    #[test]
    fn development_config_logs_threats_without_blocking() {
        let config = AppConfig::development();
        assert!(config.threat.enable_scanning);
        assert!(!config.threat.block_requests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_config_blocks_and_rejects_default_secret() {
        let config = AppConfig::production();
        assert!(config.threat.block_requests);
        assert!(config.api.enable_rate_limiting);
        assert!(config.validate().is_err());

        let mut config = config;
        config.security.jwt_secret = SecretString::from("x".repeat(48));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn wildcard_and_malformed_cors_origins_are_refused() {
        let mut config = AppConfig::development();
        config.security.cors_origins = vec!["https://app.example.com".to_string(), "*".to_string()];
        assert!(config.validate().unwrap_err().contains("'*'"));

        config.security.cors_origins = vec!["https://bad\norigin".to_string()];
        assert!(config.validate().unwrap_err().contains("not a valid origin"));

        let mut config = AppConfig::production();
        config.security.jwt_secret = SecretString::from("x".repeat(48));
        config.security.cors_origins.push("*".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn skip_fields_follow_the_environment() {
        env::set_var("AUDIT_SANITIZE_SKIP_FIELDS", "password, pin ,");
        let config = AppConfig::development().with_env_overrides();
        env::remove_var("AUDIT_SANITIZE_SKIP_FIELDS");
        assert_eq!(config.audit.sanitize_skip_fields, vec!["password".to_string(), "pin".to_string()]);
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn phi_paths_match_whole_segments() {
        let audit = AppConfig::development().audit;
        assert!(audit.is_phi_path("/api/notes"));
        assert!(audit.is_phi_path("/api/notes/4b1c"));
        assert!(!audit.is_phi_path("/api/notesx"));
        assert!(!audit.is_phi_path("/api/auth/whoami"));
    }
}
