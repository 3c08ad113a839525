//! Runtime configuration for the RepoRecon backend.
//!
//! A [`ConfigSnapshot`] is an immutable view of every setting the core reads. The process
//! keeps the current one in a [`ConfigStore`]; readers take an `Arc` for the duration of a
//! request and the admin path swaps in a whole new snapshot, so a reader never observes a
//! half-applied update.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | GITHUB_REPO | "" | `owner/repo` the service reports on. |
//! | GITHUB_TOKEN | "" | Token for GitHub REST access (activity feed). |
//! | GITHUB_TIMEOUT_SEC | 10 | GitHub request timeout, clamped to 1–60 on update. |
//! | GITHUB_WEBHOOK_SECRET | "" | HMAC secret for `X-Hub-Signature-256`. Empty disables verification. |
//! | AI_PROVIDER | auto | auto \| local (ollama) \| remote (api) \| mock |
//! | OLLAMA_HOST / OLLAMA_MODEL | http://localhost:11434 / llama3 | Local model server. |
//! | LLM_API_BASE_URL / LLM_API_MODEL | https://api.openai.com/v1 / gpt-4o-mini | Remote OpenAI-compatible API. |
//! | LLM_API_KEY | "" | Bearer credential for the remote API. |
//! | LLM_API_TIMEOUT_SEC | 20 | Per-call model timeout, clamped to 1–120 on update. |
//! | NEXT_PUBLIC_CONVEX_URL / CONVEX_SITE_URL | "" | Public client endpoint and site origin. |
//! | SITE_URL | http://localhost:3000 | OAuth redirect target. |
//! | AUTH_GITHUB_ID / AUTH_GITHUB_SECRET | "" | OAuth app credentials. |
//! | CONVEX_DEPLOYMENT | "" | Deployment whose env is consulted for OAuth keys. |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/recon.toml";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost";
const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3";
const DEFAULT_LLM_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_API_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GITHUB_TIMEOUT_SEC: f64 = 10.0;
const DEFAULT_LLM_API_TIMEOUT_SEC: f64 = 20.0;
const GITHUB_TIMEOUT_RANGE: (f64, f64) = (1.0, 60.0);
const LLM_API_TIMEOUT_RANGE: (f64, f64) = (1.0, 120.0);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which backend answers a chat message. `Auto` is a request, never a terminal choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    #[default]
    Auto,
    #[serde(alias = "ollama")]
    Local,
    #[serde(alias = "api")]
    Remote,
    Mock,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Auto => "auto",
            ProviderMode::Local => "local",
            ProviderMode::Remote => "remote",
            ProviderMode::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ProviderMode::Auto),
            "local" | "ollama" => Ok(ProviderMode::Local),
            "remote" | "api" => Ok(ProviderMode::Remote),
            "mock" => Ok(ProviderMode::Mock),
            other => Err(ConfigError::Invalid {
                field: "AI_PROVIDER",
                reason: format!("must be one of auto, local, remote, mock (got {:?})", other),
            }),
        }
    }
}

/// Raw settings as produced by the `config` crate (env keys lowercased).
#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    #[serde(default)]
    github_token: String,
    #[serde(default)]
    github_repo: String,
    #[serde(default = "default_github_timeout_sec")]
    github_timeout_sec: f64,
    #[serde(default)]
    github_webhook_secret: String,
    #[serde(default)]
    smee_url: String,
    #[serde(default = "default_allowed_origins")]
    allowed_origins: String,
    #[serde(default)]
    convex_deployment: String,
    #[serde(default)]
    convex_site_url: String,
    #[serde(default)]
    next_public_convex_site_url: String,
    #[serde(default)]
    next_public_convex_url: String,
    #[serde(default = "default_site_url")]
    site_url: String,
    #[serde(default)]
    auth_github_id: String,
    #[serde(default)]
    auth_github_secret: String,
    #[serde(default = "default_ai_provider")]
    ai_provider: String,
    #[serde(default = "default_ollama_host")]
    ollama_host: String,
    #[serde(default = "default_ollama_model")]
    ollama_model: String,
    #[serde(default = "default_llm_api_base_url")]
    llm_api_base_url: String,
    #[serde(default = "default_llm_api_model")]
    llm_api_model: String,
    #[serde(default)]
    llm_api_key: String,
    #[serde(default = "default_llm_api_timeout_sec")]
    llm_api_timeout_sec: f64,
}

fn default_github_timeout_sec() -> f64 {
    DEFAULT_GITHUB_TIMEOUT_SEC
}

fn default_llm_api_timeout_sec() -> f64 {
    DEFAULT_LLM_API_TIMEOUT_SEC
}

fn default_allowed_origins() -> String {
    DEFAULT_ALLOWED_ORIGINS.to_string()
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_ai_provider() -> String {
    "auto".to_string()
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    DEFAULT_OLLAMA_MODEL.to_string()
}

fn default_llm_api_base_url() -> String {
    DEFAULT_LLM_API_BASE_URL.to_string()
}

fn default_llm_api_model() -> String {
    DEFAULT_LLM_API_MODEL.to_string()
}

/// Immutable view of the runtime configuration. Build a new one to change anything.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub github_token: String,
    pub github_repo: String,
    pub github_timeout_sec: f64,
    pub github_webhook_secret: String,
    pub smee_url: String,
    pub allowed_origins: String,
    pub convex_deployment: String,
    pub convex_site_url: String,
    pub next_public_convex_url: String,
    pub site_url: String,
    pub auth_github_id: String,
    pub auth_github_secret: String,
    pub ai_provider: ProviderMode,
    pub ollama_host: String,
    pub ollama_model: String,
    pub llm_api_base_url: String,
    pub llm_api_model: String,
    pub llm_api_key: String,
    pub llm_api_timeout_sec: f64,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            github_token: String::new(),
            github_repo: String::new(),
            github_timeout_sec: DEFAULT_GITHUB_TIMEOUT_SEC,
            github_webhook_secret: String::new(),
            smee_url: String::new(),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
            convex_deployment: String::new(),
            convex_site_url: String::new(),
            next_public_convex_url: String::new(),
            site_url: DEFAULT_SITE_URL.to_string(),
            auth_github_id: String::new(),
            auth_github_secret: String::new(),
            ai_provider: ProviderMode::Auto,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            llm_api_base_url: DEFAULT_LLM_API_BASE_URL.to_string(),
            llm_api_model: DEFAULT_LLM_API_MODEL.to_string(),
            llm_api_key: String::new(),
            llm_api_timeout_sec: DEFAULT_LLM_API_TIMEOUT_SEC,
        }
    }
}

impl ConfigSnapshot {
    /// Load `.env.local` then `.env`, then build from defaults, the optional TOML file
    /// (`RECON_CONFIG`, default `config/recon.toml`) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        for file in [".env.local", ".env"] {
            if let Err(e) = dotenvy::from_filename(file) {
                tracing::debug!(target: "recon::config", file, "env file not loaded: {}", e);
            }
        }
        let config_path =
            std::env::var("RECON_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let builder = config::Config::builder();
        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder.add_source(config::Environment::default()).build()?;
        Self::from_config(built)
    }

    /// Build a snapshot from an already assembled `config::Config`. Missing keys take defaults.
    pub fn from_config(source: config::Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = source.try_deserialize()?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawSettings) -> Self {
        let next_public_convex_url = raw.next_public_convex_url.trim().to_string();
        let convex_site_url = [raw.convex_site_url.trim(), raw.next_public_convex_site_url.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_convex_site_url(&next_public_convex_url).unwrap_or_default());
        let ai_provider = raw.ai_provider.parse().unwrap_or_else(|e| {
            tracing::warn!(target: "recon::config", "{}; falling back to auto", e);
            ProviderMode::Auto
        });
        Self {
            github_token: raw.github_token,
            github_repo: raw.github_repo,
            github_timeout_sec: bounded_timeout(
                raw.github_timeout_sec,
                GITHUB_TIMEOUT_RANGE,
                DEFAULT_GITHUB_TIMEOUT_SEC,
            ),
            github_webhook_secret: raw.github_webhook_secret,
            smee_url: raw.smee_url,
            allowed_origins: raw.allowed_origins,
            convex_deployment: raw.convex_deployment,
            convex_site_url,
            next_public_convex_url,
            site_url: raw.site_url.trim_end_matches('/').to_string(),
            auth_github_id: raw.auth_github_id,
            auth_github_secret: raw.auth_github_secret,
            ai_provider,
            ollama_host: raw.ollama_host.trim_end_matches('/').to_string(),
            ollama_model: raw.ollama_model,
            llm_api_base_url: raw.llm_api_base_url.trim_end_matches('/').to_string(),
            llm_api_model: raw.llm_api_model,
            llm_api_key: raw.llm_api_key,
            llm_api_timeout_sec: bounded_timeout(
                raw.llm_api_timeout_sec,
                LLM_API_TIMEOUT_RANGE,
                DEFAULT_LLM_API_TIMEOUT_SEC,
            ),
        }
    }

    /// Remote API key with surrounding whitespace and quotes removed.
    pub fn remote_api_key(&self) -> &str {
        unquote(&self.llm_api_key)
    }

    pub fn has_remote_credential(&self) -> bool {
        !self.remote_api_key().is_empty()
    }

    pub fn model_timeout(&self) -> Duration {
        timeout_duration(self.llm_api_timeout_sec, LLM_API_TIMEOUT_RANGE, DEFAULT_LLM_API_TIMEOUT_SEC)
    }

    pub fn github_timeout(&self) -> Duration {
        timeout_duration(self.github_timeout_sec, GITHUB_TIMEOUT_RANGE, DEFAULT_GITHUB_TIMEOUT_SEC)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Non-secret view with presence flags for every credential.
    pub fn view(&self) -> ConfigView {
        ConfigView {
            github_repo: self.github_repo.clone(),
            github_timeout_sec: self.github_timeout_sec,
            smee_url: self.smee_url.clone(),
            allowed_origins: self.allowed_origins.clone(),
            convex_deployment: self.convex_deployment.clone(),
            convex_site_url: self.convex_site_url.clone(),
            next_public_convex_url: self.next_public_convex_url.clone(),
            site_url: self.site_url.clone(),
            ai_provider: self.ai_provider,
            ollama_host: self.ollama_host.clone(),
            ollama_model: self.ollama_model.clone(),
            llm_api_base_url: self.llm_api_base_url.clone(),
            llm_api_model: self.llm_api_model.clone(),
            llm_api_timeout_sec: self.llm_api_timeout_sec,
            github_token_configured: is_set(&self.github_token),
            github_webhook_secret_configured: is_set(&self.github_webhook_secret),
            llm_api_key_configured: is_set(&self.llm_api_key),
            auth_github_id_configured: is_set(&self.auth_github_id),
            auth_github_secret_configured: is_set(&self.auth_github_secret),
        }
    }

    /// Validate `update` against this snapshot and return the snapshot it produces.
    /// Any invalid field rejects the whole update.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<ConfigSnapshot, ConfigError> {
        let mut next = self.clone();

        if let Some(v) = non_blank(&update.github_token) {
            next.github_token = v.to_string();
        }
        if let Some(v) = non_blank(&update.github_repo) {
            next.github_repo = v.to_string();
        }
        if let Some(t) = update.github_timeout_sec {
            next.github_timeout_sec = bounded_timeout(t, GITHUB_TIMEOUT_RANGE, DEFAULT_GITHUB_TIMEOUT_SEC);
        }
        if let Some(v) = non_blank(&update.github_webhook_secret) {
            next.github_webhook_secret = v.to_string();
        }
        if let Some(v) = non_blank(&update.smee_url) {
            next.smee_url = v.to_string();
        }
        if let Some(v) = non_blank(&update.allowed_origins) {
            next.allowed_origins = v.to_string();
        }
        if let Some(v) = non_blank(&update.convex_deployment) {
            next.convex_deployment = v.to_string();
        }
        if let Some(v) = non_blank(&update.convex_site_url) {
            next.convex_site_url = require_http_url("CONVEX_SITE_URL", v)?;
        }
        if let Some(v) = non_blank(&update.next_public_convex_url) {
            next.next_public_convex_url = require_http_url("NEXT_PUBLIC_CONVEX_URL", v)?;
            if self.convex_site_url.trim().is_empty() && update.convex_site_url.is_none() {
                if let Some(derived) = derive_convex_site_url(v) {
                    next.convex_site_url = derived;
                }
            }
        }
        if let Some(v) = non_blank(&update.site_url) {
            next.site_url = require_http_url("SITE_URL", v.trim_end_matches('/'))?;
        }
        if let Some(v) = non_blank(&update.auth_github_id) {
            next.auth_github_id = v.to_string();
        }
        if let Some(v) = non_blank(&update.auth_github_secret) {
            next.auth_github_secret = v.to_string();
        }
        if let Some(v) = non_blank(&update.ai_provider) {
            next.ai_provider = v.parse()?;
        }
        if let Some(v) = non_blank(&update.ollama_host) {
            next.ollama_host = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = non_blank(&update.ollama_model) {
            next.ollama_model = v.to_string();
        }
        if let Some(v) = non_blank(&update.llm_api_base_url) {
            next.llm_api_base_url = require_http_url("LLM_API_BASE_URL", v.trim_end_matches('/'))?;
        }
        if let Some(v) = non_blank(&update.llm_api_model) {
            next.llm_api_model = v.to_string();
        }
        if let Some(v) = non_blank(&update.llm_api_key) {
            next.llm_api_key = v.to_string();
        }
        if let Some(t) = update.llm_api_timeout_sec {
            next.llm_api_timeout_sec =
                bounded_timeout(t, LLM_API_TIMEOUT_RANGE, DEFAULT_LLM_API_TIMEOUT_SEC);
        }

        Ok(next)
    }
}

/// Partial update from the admin endpoint. `None` and blank strings leave a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub github_token: Option<String>,
    pub github_repo: Option<String>,
    pub github_timeout_sec: Option<f64>,
    pub github_webhook_secret: Option<String>,
    pub smee_url: Option<String>,
    pub allowed_origins: Option<String>,
    pub convex_deployment: Option<String>,
    pub convex_site_url: Option<String>,
    pub next_public_convex_url: Option<String>,
    pub site_url: Option<String>,
    pub auth_github_id: Option<String>,
    pub auth_github_secret: Option<String>,
    pub ai_provider: Option<String>,
    pub ollama_host: Option<String>,
    pub ollama_model: Option<String>,
    pub llm_api_base_url: Option<String>,
    pub llm_api_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_api_timeout_sec: Option<f64>,
}

/// What `GET /api/config` returns: values that are safe to show plus credential presence flags.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub github_repo: String,
    pub github_timeout_sec: f64,
    pub smee_url: String,
    pub allowed_origins: String,
    pub convex_deployment: String,
    pub convex_site_url: String,
    pub next_public_convex_url: String,
    pub site_url: String,
    pub ai_provider: ProviderMode,
    pub ollama_host: String,
    pub ollama_model: String,
    pub llm_api_base_url: String,
    pub llm_api_model: String,
    pub llm_api_timeout_sec: f64,
    pub github_token_configured: bool,
    pub github_webhook_secret_configured: bool,
    pub llm_api_key_configured: bool,
    pub auth_github_id_configured: bool,
    pub auth_github_secret_configured: bool,
}

/// Process-wide holder of the current snapshot.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot in effect right now. Hold it for the whole request.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate and swap in the result of `update`. On error the current snapshot is kept.
    pub fn update(&self, update: &ConfigUpdate) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = Arc::new(guard.apply(update)?);
        *guard = Arc::clone(&next);
        tracing::info!(
            target: "recon::config",
            ai_provider = %next.ai_provider,
            repo = %next.github_repo,
            "runtime configuration updated"
        );
        Ok(next)
    }
}

/// True when `value` is an absolute `http`/`https` URL with a host.
pub fn is_absolute_http_url(value: &str) -> bool {
    match reqwest::Url::parse(value.trim()) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().map(|h| !h.is_empty()).unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// `https://x.convex.cloud` -> `https://x.convex.site`; `None` for anything else.
pub fn derive_convex_site_url(value: &str) -> Option<String> {
    let url = reqwest::Url::parse(value.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let prefix = host.strip_suffix(".convex.cloud")?;
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Some(format!("{}://{}.convex.site{}", url.scheme(), prefix, port))
}

fn require_http_url(field: &'static str, value: &str) -> Result<String, ConfigError> {
    if is_absolute_http_url(value) {
        Ok(value.to_string())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: "must be an absolute http(s) URL".to_string(),
        })
    }
}

/// Clamp to `range`; NaN and infinities fall back to `default`.
fn bounded_timeout(seconds: f64, range: (f64, f64), default: f64) -> f64 {
    if seconds.is_finite() {
        seconds.clamp(range.0, range.1)
    } else {
        default
    }
}

fn timeout_duration(seconds: f64, range: (f64, f64), default: f64) -> Duration {
    let seconds = bounded_timeout(seconds, range, default);
    Duration::try_from_secs_f64(seconds).unwrap_or_else(|_| Duration::from_secs(default as u64))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '\'' || c == '"').trim()
}

fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}
