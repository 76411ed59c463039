use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{AccountNumber, AppKey, Domain};

pub const REAL_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
pub const VIRTUAL_BASE_URL: &str = "https://openapivts.koreainvestment.com:29443";

pub const TOKEN_ISSUE_PATH: &str = "/oauth2/tokenP";
pub const TOKEN_REVOKE_PATH: &str = "/oauth2/revokeP";

/// Vendor code: per-second call quota exceeded.
pub const QUOTA_EXCEEDED_CODE: &str = "EGW00201";
/// Vendor code: access token expired.
pub const TOKEN_EXPIRED_CODE: &str = "EGW00123";

/// Fixed-window call quota for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    pub rate: u32,
    pub period_ms: u64,
}

impl RateLimitPolicy {
    pub const fn new(rate: u32, period: Duration) -> Self {
        Self {
            rate,
            period_ms: period.as_millis() as u64,
        }
    }

    pub const fn real_default() -> Self {
        Self {
            rate: 19,
            period_ms: 1_000,
        }
    }

    pub const fn virtual_default() -> Self {
        Self {
            rate: 2,
            period_ms: 1_000,
        }
    }

    pub const fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Client construction settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub real: AppKey,
    #[serde(default, rename = "virtual")]
    pub virtual_: Option<AppKey>,
    #[serde(default)]
    pub account: Option<AccountNumber>,
    /// Directory for persisted tokens. Persistence is off when unset.
    #[serde(default)]
    pub token_cache_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_quota_backoff_ms")]
    pub quota_backoff_ms: u64,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "RateLimitPolicy::real_default")]
    pub real_rate_limit: RateLimitPolicy,
    #[serde(default = "RateLimitPolicy::virtual_default")]
    pub virtual_rate_limit: RateLimitPolicy,
    #[serde(default = "default_real_base_url")]
    pub real_base_url: String,
    #[serde(default = "default_virtual_base_url")]
    pub virtual_base_url: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_quota_backoff_ms() -> u64 {
    100
}

fn default_refresh_threshold_secs() -> u64 {
    600
}

fn default_real_base_url() -> String {
    String::from(REAL_BASE_URL)
}

fn default_virtual_base_url() -> String {
    String::from(VIRTUAL_BASE_URL)
}

impl ClientConfig {
    /// Live-trading configuration with vendor defaults.
    pub fn new(real: AppKey) -> Self {
        Self {
            real,
            virtual_: None,
            account: None,
            token_cache_dir: None,
            timeout_ms: default_timeout_ms(),
            quota_backoff_ms: default_quota_backoff_ms(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            real_rate_limit: RateLimitPolicy::real_default(),
            virtual_rate_limit: RateLimitPolicy::virtual_default(),
            real_base_url: default_real_base_url(),
            virtual_base_url: default_virtual_base_url(),
        }
    }

    /// Platform cache directory for persisted tokens, if one exists.
    pub fn default_token_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("kistrade"))
    }

    pub fn with_virtual(mut self, app_key: AppKey) -> Self {
        self.virtual_ = Some(app_key);
        self
    }

    pub fn with_account(mut self, account: AccountNumber) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_token_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.token_cache_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_quota_backoff(mut self, backoff: Duration) -> Self {
        self.quota_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold_secs = threshold.as_secs();
        self
    }

    pub fn with_rate_limit(mut self, domain: Domain, policy: RateLimitPolicy) -> Self {
        match domain {
            Domain::Real => self.real_rate_limit = policy,
            Domain::Virtual => self.virtual_rate_limit = policy,
        }
        self
    }

    pub fn with_base_url(mut self, domain: Domain, url: impl Into<String>) -> Self {
        match domain {
            Domain::Real => self.real_base_url = url.into(),
            Domain::Virtual => self.virtual_base_url = url.into(),
        }
        self
    }

    pub fn credential(&self, domain: Domain) -> Option<&AppKey> {
        match domain {
            Domain::Real => Some(&self.real),
            Domain::Virtual => self.virtual_.as_ref(),
        }
    }

    pub fn base_url(&self, domain: Domain) -> &str {
        match domain {
            Domain::Real => &self.real_base_url,
            Domain::Virtual => &self.virtual_base_url,
        }
    }

    pub fn rate_limit(&self, domain: Domain) -> RateLimitPolicy {
        match domain {
            Domain::Real => self.real_rate_limit,
            Domain::Virtual => self.virtual_rate_limit,
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub const fn quota_backoff(&self) -> Duration {
        Duration::from_millis(self.quota_backoff_ms)
    }

    pub const fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    /// Domain used when a request does not name one.
    pub fn default_domain(&self) -> Domain {
        if self.virtual_.is_some() {
            Domain::Virtual
        } else {
            Domain::Real
        }
    }
}
