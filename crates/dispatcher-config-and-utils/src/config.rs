//! Configuration management.
//!
//! Values come from `~/.mailroom/config.json` (or an explicit file) and are
//! then overridden by environment variables. Secrets are normally supplied
//! only through the environment.

use crate::{CoreError, CoreResult, Paths};
use email_outbox_dispatcher::{DispatchMode, EmailConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default HTTP listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";

/// Default Resend API base URL.
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";

/// Items fetched per run when the caller does not ask for a size.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Upper bound on a caller-supplied batch size.
pub const MAX_BATCH_SIZE: usize = 100;

/// Where the outbox lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local SQLite database under the base directory.
    #[default]
    Sqlite,
    /// Supabase project reached through PostgREST.
    Supabase,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Supabase => "supabase",
        })
    }
}

impl FromStr for Backend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "supabase" => Ok(Self::Supabase),
            other => Err(CoreError::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Main service configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Outbox backend.
    pub backend: Backend,
    /// HTTP listen address for `serve`.
    pub bind_addr: String,
    /// Shared secret required by the dispatch endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_secret: Option<String>,
    /// Supabase project URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    /// Supabase service-role key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase_service_role_key: Option<String>,
    /// Resend API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resend_api_key: Option<String>,
    /// Resend API base URL.
    pub resend_api_url: String,
    /// Batch size used when a request does not specify one.
    pub default_batch_size: usize,
    /// Largest batch a request may ask for.
    pub max_batch_size: usize,
    /// Seconds after which an unfinished claim is considered abandoned.
    pub claim_ttl_secs: u64,
    /// Outbound HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Delivery policy.
    pub email: EmailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            backend: Backend::Sqlite,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            dispatch_secret: None,
            supabase_url: None,
            supabase_service_role_key: None,
            resend_api_key: None,
            resend_api_url: DEFAULT_RESEND_API_URL.to_string(),
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            claim_ttl_secs: 300,
            request_timeout_secs: 30,
            email: EmailConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(secret: &Option<String>) -> &'static str {
            if secret.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }

        f.debug_struct("Config")
            .field("log_level", &self.log_level)
            .field("backend", &self.backend)
            .field("bind_addr", &self.bind_addr)
            .field("dispatch_secret", &mask(&self.dispatch_secret))
            .field("supabase_url", &self.supabase_url)
            .field(
                "supabase_service_role_key",
                &mask(&self.supabase_service_role_key),
            )
            .field("resend_api_key", &mask(&self.resend_api_key))
            .field("resend_api_url", &self.resend_api_url)
            .field("default_batch_size", &self.default_batch_size)
            .field("max_batch_size", &self.max_batch_size)
            .field("claim_ttl_secs", &self.claim_ttl_secs)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the default file (if present), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.finish_loading()
    }

    /// Load configuration from an explicit file, then apply environment
    /// overrides.
    pub fn load_with_file(path: &Path) -> CoreResult<Self> {
        Self::load_from_file(path)?.finish_loading()
    }

    fn finish_loading(mut self) -> CoreResult<Self> {
        self.apply_env_overrides(|name| std::env::var(name).ok())?;
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override values from environment variables resolved by `lookup`.
    ///
    /// Blank values are ignored. Values that fail to parse are errors.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).and_then(non_empty);

        if let Some(level) = var("MAILROOM_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(backend) = var("MAILROOM_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(addr) = var("MAILROOM_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(secret) = var("DISPATCH_SECRET") {
            self.dispatch_secret = Some(secret);
        }
        if let Some(url) = var("SUPABASE_URL") {
            self.supabase_url = Some(url);
        }
        if let Some(key) = var("SUPABASE_SERVICE_ROLE_KEY") {
            self.supabase_service_role_key = Some(key);
        }
        if let Some(key) = var("RESEND_API_KEY") {
            self.resend_api_key = Some(key);
        }

        if let Some(mode) = var("EMAIL_MODE") {
            self.email.mode = mode
                .parse::<DispatchMode>()
                .map_err(CoreError::Config)?;
        }
        if let Some(list) = var("EMAIL_ALLOWLIST") {
            self.email.allowlist = EmailConfig::parse_allowlist(&list);
        }
        if let Some(cap) = var("EMAIL_CAP_MAX_PER_RUN") {
            self.email.cap_max_per_run = parse_number("EMAIL_CAP_MAX_PER_RUN", &cap)?;
        }
        if let Some(flag) = var("EMAIL_BLOCK_NON_ALLOWLIST") {
            self.email.block_non_allowlist = parse_bool("EMAIL_BLOCK_NON_ALLOWLIST", &flag)?;
        }
        if let Some(prefix) = var("EMAIL_SUBJECT_PREFIX") {
            self.email.subject_prefix = prefix;
        }
        if let Some(from) = var("EMAIL_FROM") {
            self.email.from = from;
        }
        if let Some(ms) = var("EMAIL_THROTTLE_MS") {
            self.email.throttle_ms = parse_number("EMAIL_THROTTLE_MS", &ms)?;
        }

        Ok(())
    }

    /// Reject inconsistent values.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_batch_size == 0 {
            return Err(CoreError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.default_batch_size == 0 || self.default_batch_size > self.max_batch_size {
            return Err(CoreError::Config(format!(
                "default_batch_size must be between 1 and {}",
                self.max_batch_size
            )));
        }
        Ok(())
    }

    /// Resolve a requested batch size: default when absent, clamped to
    /// `1..=max_batch_size` otherwise.
    pub fn batch_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_batch_size)
            .clamp(1, self.max_batch_size.max(1))
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        let raw = self
            .supabase_url
            .as_deref()
            .ok_or_else(|| CoreError::Config("SUPABASE_URL is not set".to_string()))?;
        Url::parse(raw).map_err(CoreError::from)
    }

    /// Get the Resend API base URL as a parsed URL.
    pub fn resend_api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.resend_api_url).map_err(CoreError::from)
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> CoreResult<T> {
    raw.parse()
        .map_err(|_| CoreError::Config(format!("invalid {name}: {raw}")))
}

fn parse_bool(name: &str, raw: &str) -> CoreResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Config(format!("invalid {name}: {raw}"))),
    }
}
