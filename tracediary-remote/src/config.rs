//! Content store configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_API_BASE: &str = "TRACEDIARY_API_BASE";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "TRACEDIARY_REQUEST_TIMEOUT_SECS";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the contents API (e.g. "https://gitee.com/api/v5").
    pub api_base: String,

    /// Web host accepted in repository URLs.
    pub web_host: String,

    /// Branch used when the connection settings leave it blank.
    pub default_branch: String,

    /// Branches tried, in order, after the configured one reports missing.
    pub fallback_branches: Vec<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Also send the token as an `access_token` query parameter.
    pub use_access_token_query: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gitee.com/api/v5".to_string(),
            web_host: "gitee.com".to_string(),
            default_branch: "master".to_string(),
            fallback_branches: vec!["main".to_string(), "master".to_string()],
            request_timeout_secs: 20,
            use_access_token_query: true,
        }
    }
}

impl StoreConfig {
    /// Defaults overlaid with values from `lookup` (usually the process env).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(base) = lookup(ENV_API_BASE).map(|v| v.trim().to_string()) {
            if !base.is_empty() {
                config.api_base = base;
            }
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS).and_then(|v| v.trim().parse().ok()) {
            config.request_timeout_secs = secs;
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Config pointing at a local mock server.
    pub fn for_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub(crate) fn normalized_api_base(&self) -> &str {
        self.api_base.trim().trim_end_matches('/')
    }

    /// The branch to start from: `preferred` when non-blank, else the default.
    pub fn resolve_branch(&self, preferred: Option<&str>) -> String {
        preferred
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(self.default_branch.trim())
            .to_string()
    }
}
