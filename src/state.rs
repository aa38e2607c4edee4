use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenService;
use crate::config::AppConfig;
use crate::crypto::PhiKeyring;
use crate::database::{DatabaseManager, Stores};
use crate::security::{IpBlocklist, SlidingWindowLimiter, ThreatMonitor};

/// Everything the router and middleware share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: Stores,
    /// `None` when running on the in-memory stores.
    pub database: Option<DatabaseManager>,
    pub tokens: Arc<TokenService>,
    pub keyring: Arc<PhiKeyring>,
    pub blocklist: Arc<IpBlocklist>,
    pub threats: Arc<ThreatMonitor>,
    pub request_limiter: Arc<SlidingWindowLimiter<IpAddr>>,
    /// Failed logins per `ip|email`.
    pub login_failures: Arc<SlidingWindowLimiter<String>>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub limiter_keys: usize,
    pub login_keys: usize,
    pub offence_keys: usize,
    pub expired_blocks: usize,
    pub revoked_tokens: usize,
    pub phi_keys: usize,
}

impl AppState {
    pub fn new(config: AppConfig, stores: Stores, database: Option<DatabaseManager>) -> Self {
        let request_limiter = SlidingWindowLimiter::new(
            config.api.rate_limit_requests,
            Duration::from_secs(config.api.rate_limit_window_secs),
        );
        let login_failures = SlidingWindowLimiter::new(
            config.security.login_max_failures,
            Duration::from_secs(config.security.login_lockout_secs),
        );

        Self {
            tokens: Arc::new(TokenService::new(&config.security)),
            keyring: Arc::new(PhiKeyring::new()),
            blocklist: Arc::new(IpBlocklist::from_config(&config.threat)),
            threats: Arc::new(ThreatMonitor::new(&config.threat)),
            request_limiter: Arc::new(request_limiter),
            login_failures: Arc::new(login_failures),
            config: Arc::new(config),
            stores,
            database,
            started_at: Utc::now(),
        }
    }

    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, Stores::in_memory(), None)
    }

    /// Drop state that can no longer affect a decision.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            limiter_keys: self.request_limiter.purge_idle(),
            login_keys: self.login_failures.purge_idle(),
            offence_keys: self.threats.purge_idle(),
            expired_blocks: self.blocklist.purge_expired(),
            revoked_tokens: self.tokens.purge_revoked(),
            phi_keys: self.keyring.purge_expired(),
        };
        tracing::debug!(?report, "Maintenance pass complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_nothing_to_purge() {
        let state = AppState::in_memory(AppConfig::development());
        assert_eq!(state.run_maintenance(), MaintenanceReport::default());
        assert!(state.database.is_none());
    }
}
