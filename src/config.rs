//! Environment-driven configuration for the session authority and its adapters.
//!
//! Every value has a default; malformed values are logged and ignored.

use std::time::Duration;

use tracing::warn;

use crate::identity::{RestProviderConfig, SessionOptions};
use crate::routes::{normalize_path, DEFAULT_LANDING_PATH, DEFAULT_LOGIN_PATH};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend_url: String,
    /// Identity toolkit API key; `None` selects the in-process provider.
    pub identity_api_key: Option<String>,
    pub identity_endpoint: String,
    pub token_endpoint: String,
    pub request_timeout: Duration,
    pub role_recheck: Option<Duration>,
    pub login_path: String,
    pub landing_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            identity_api_key: None,
            identity_endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            role_recheck: None,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self { Self::from_lookup(|name| std::env::var(name).ok()) }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Config::default();
        if let Some(url) = get("HOMENEST_BACKEND_URL") {
            cfg.backend_url = url.trim_end_matches('/').to_string();
        }
        cfg.identity_api_key = get("HOMENEST_IDENTITY_API_KEY");
        if let Some(ep) = get("HOMENEST_IDENTITY_ENDPOINT") {
            cfg.identity_endpoint = ep.trim_end_matches('/').to_string();
        }
        if let Some(ep) = get("HOMENEST_TOKEN_ENDPOINT") {
            cfg.token_endpoint = ep.trim_end_matches('/').to_string();
        }
        if let Some(ms) = get("HOMENEST_REQUEST_TIMEOUT_MS") {
            match parse_positive(&ms) {
                Some(ms) => cfg.request_timeout = Duration::from_millis(ms),
                None => warn!(target: "startup", value = %ms, "invalid HOMENEST_REQUEST_TIMEOUT_MS; using default"),
            }
        }
        if let Some(secs) = get("HOMENEST_ROLE_RECHECK_SECS") {
            match parse_positive(&secs) {
                Some(secs) => cfg.role_recheck = Some(Duration::from_secs(secs)),
                None => warn!(target: "startup", value = %secs, "invalid HOMENEST_ROLE_RECHECK_SECS; re-check disabled"),
            }
        }
        if let Some(p) = get("HOMENEST_LOGIN_PATH") {
            cfg.login_path = normalize_path(&p);
        }
        if let Some(p) = get("HOMENEST_LANDING_PATH") {
            cfg.landing_path = normalize_path(&p);
        }
        cfg
    }

    /// Apply `--backend <url>` and `--recheck <secs>` overrides. Returns the
    /// arguments that were not consumed.
    pub fn apply_args(&mut self, args: &[String]) -> Vec<String> {
        let mut rest = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--backend" if i + 1 < args.len() => {
                    self.backend_url = args[i + 1].trim_end_matches('/').to_string();
                    i += 2;
                }
                "--recheck" if i + 1 < args.len() => {
                    match parse_positive(&args[i + 1]) {
                        Some(secs) => self.role_recheck = Some(Duration::from_secs(secs)),
                        None => warn!(target: "startup", value = %args[i + 1], "invalid --recheck value; ignored"),
                    }
                    i += 2;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }
        rest
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions { role_timeout: self.request_timeout, recheck_interval: self.role_recheck }
    }

    /// REST provider settings, when an API key is configured.
    pub fn rest_provider(&self) -> Option<RestProviderConfig> {
        let api_key = self.identity_api_key.clone()?;
        Some(RestProviderConfig {
            api_key,
            identity_endpoint: self.identity_endpoint.clone(),
            token_endpoint: self.token_endpoint.clone(),
            timeout: self.request_timeout,
            request_uri: "http://localhost".to_string(),
        })
    }
}

fn parse_positive(s: &str) -> Option<u64> {
    s.trim().parse::<u64>().ok().filter(|v| *v > 0)
}
