//! Settings: JSON file plus `DROPWIRE_*` environment overrides.
//!
//! ```json
//! {
//!   "api_url": "https://api.example.com/api",
//!   "relay_url": "https://relay.example.com/api",
//!   "direct_routes": { "resumes": "https://api.example.com/api/resumes/{id}" },
//!   "aliases": { "cover-letters": "cover_letters" },
//!   "retry": { "max_retries": 3, "base_delay_ms": 1000 },
//!   "circuit_breaker": { "failure_threshold": 3, "cooldown_ms": 30000 }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dropwire_core::credential::CredentialSource;
use dropwire_core::dispatch::{DispatcherConfig, StrategyChain};
use dropwire_core::executor::{ResilienceConfig, ResilienceContext};
use dropwire_core::normalize::{Normalizer, NormalizerConfig, PolicyTable};
use dropwire_core::policy::{CircuitBreakerConfig, RetryConfig};
use dropwire_core::strategy::{RouteConfig, StrategyKind, StrategySet};

use crate::client::{ClientConfig, ReqwestTransport};

pub const ENV_API_URL: &str = "DROPWIRE_API_URL";
pub const ENV_RELAY_URL: &str = "DROPWIRE_RELAY_URL";
pub const ENV_MAX_RETRIES: &str = "DROPWIRE_MAX_RETRIES";
pub const ENV_BASE_DELAY_MS: &str = "DROPWIRE_BASE_DELAY_MS";
pub const ENV_FAILURE_THRESHOLD: &str = "DROPWIRE_FAILURE_THRESHOLD";
pub const ENV_COOLDOWN_MS: &str = "DROPWIRE_COOLDOWN_MS";
pub const ENV_STRATEGY_TIMEOUT_MS: &str = "DROPWIRE_STRATEGY_TIMEOUT_MS";

/// Errors from loading or applying [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_backoff_factor: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            rate_limit_backoff_factor: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Everything needed to assemble a [`ResilienceContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_url: String,
    pub relay_url: Option<String>,
    /// Collection name → absolute URL template containing `{id}`.
    pub direct_routes: BTreeMap<String, String>,
    /// Collection name → alternate spelling.
    pub aliases: BTreeMap<String, String>,
    /// Trailing-slash policy rows; `None` keeps the built-in table.
    pub policies: Option<PolicyTable>,
    pub allow_insecure_loopback: bool,
    /// Strategies enabled by default, in any order; `None` enables all.
    pub strategies: Option<Vec<StrategyKind>>,
    pub strategy_timeout_ms: u64,
    pub fallback_on_not_found: bool,
    pub request_timeout_ms: u64,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api".to_string(),
            relay_url: None,
            direct_routes: BTreeMap::new(),
            aliases: BTreeMap::new(),
            policies: None,
            allow_insecure_loopback: true,
            strategies: None,
            strategy_timeout_ms: 10_000,
            fallback_on_not_found: false,
            request_timeout_ms: 30_000,
            retry: RetrySettings::default(),
            circuit_breaker: CircuitSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Defaults with process environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env()?;
        Ok(settings)
    }

    /// Overlay `DROPWIRE_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|var| std::env::var(var).ok())
    }

    /// Overlay variables from `lookup`; unset variables leave values alone.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(url) = lookup(ENV_RELAY_URL) {
            self.relay_url = (!url.trim().is_empty()).then_some(url);
        }
        if let Some(n) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            self.retry.max_retries = n;
        }
        if let Some(ms) = parse_var(&lookup, ENV_BASE_DELAY_MS)? {
            self.retry.base_delay_ms = ms;
        }
        if let Some(n) = parse_var(&lookup, ENV_FAILURE_THRESHOLD)? {
            self.circuit_breaker.failure_threshold = n;
        }
        if let Some(ms) = parse_var(&lookup, ENV_COOLDOWN_MS)? {
            self.circuit_breaker.cooldown_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, ENV_STRATEGY_TIMEOUT_MS)? {
            self.strategy_timeout_ms = ms;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_url is empty".into()));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.strategy_timeout_ms == 0 {
            return Err(ConfigError::Invalid("strategy_timeout_ms must be positive".into()));
        }
        if matches!(&self.strategies, Some(kinds) if kinds.is_empty()) {
            return Err(ConfigError::Invalid("strategies is empty".into()));
        }
        if let Some((name, _)) = self.direct_routes.iter().find(|(_, t)| !t.contains("{id}")) {
            return Err(ConfigError::Invalid(format!(
                "direct route for {name:?} has no {{id}} placeholder"
            )));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(
            self.policies.clone().unwrap_or_default(),
            NormalizerConfig {
                allow_insecure_loopback: self.allow_insecure_loopback,
            },
        )
    }

    pub fn routes(&self) -> RouteConfig {
        let mut routes = RouteConfig::new(&self.api_url);
        if let Some(relay) = &self.relay_url {
            routes = routes.with_relay(relay);
        }
        for (collection, template) in &self.direct_routes {
            routes = routes.with_direct_route(collection, template);
        }
        for (name, alternate) in &self.aliases {
            routes = routes.with_alias(name, alternate);
        }
        routes
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let enabled = match &self.strategies {
            Some(kinds) => StrategySet::only(kinds),
            None => StrategySet::all(),
        };
        DispatcherConfig {
            strategy_timeout: Duration::from_millis(self.strategy_timeout_ms),
            enabled,
            fallback_on_not_found: self.fallback_on_not_found,
            ..Default::default()
        }
    }

    pub fn resilience_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryConfig {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                rate_limit_backoff_factor: self.retry.rate_limit_backoff_factor,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                cooldown: Duration::from_millis(self.circuit_breaker.cooldown_ms),
            },
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..Default::default()
        }
    }

    /// Assemble the process-wide context over a reqwest transport.
    pub fn build_context(
        &self,
        credential: Arc<dyn CredentialSource>,
    ) -> Result<ResilienceContext, ConfigError> {
        self.validate()?;
        let transport = ReqwestTransport::new(self.client_config())?;
        let chain = StrategyChain::new(
            Arc::new(self.normalizer()),
            self.routes(),
            Arc::new(transport),
            credential,
            self.dispatcher_config(),
        );
        tracing::debug!(api_url = %self.api_url, relay = ?self.relay_url, "resilience context built");
        Ok(ResilienceContext::new(chain, self.resilience_config()))
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
