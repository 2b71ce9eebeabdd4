//! Server configuration.

use serde::{Deserialize, Serialize};

use tandem_core::{Error, Result};

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Default: disabled (secure-by-default).
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Voice provider connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Bearer API key attached to every dispatch.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Assistant to run the conversation.
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Provider-side phone number to place calls from.
    #[serde(default)]
    pub phone_number_id: Option<String>,
    /// Request timeout for the dispatch call (seconds).
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.vapi.ai".to_string(),
            api_key: None,
            assistant_id: None,
            phone_number_id: None,
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("assistant_id", &self.assistant_id)
            .field("phone_number_id", &self.phone_number_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Default admission limits applied to tenants without overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Dispatches allowed per rate window, per tenant.
    pub rate_limit: u32,
    /// Rate window length (seconds).
    pub rate_window_secs: u64,
    /// Simultaneous in-progress calls allowed per tenant.
    pub max_concurrent_calls: usize,
    /// Age at which an `InProgress` call is considered stale (seconds).
    pub max_call_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit: 10,
            rate_window_secs: 60,
            max_concurrent_calls: 5,
            max_call_secs: 3600,
        }
    }
}

/// Configuration for the Tandem API server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - missing secrets are tolerated (local development)
    ///
    /// When disabled:
    /// - `api_token`, `webhook_secret`, and the provider credentials are
    ///   required at startup
    pub debug: bool,

    /// Emit JSON logs instead of pretty-printed ones.
    #[serde(default)]
    pub log_json: bool,

    /// Bearer token required on the dispatch-trigger endpoints.
    ///
    /// Empty/whitespace values are treated as unset.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Shared secret the provider sends in `X-Provider-Secret`.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Voice provider connection settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Default admission limits.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            debug: false,
            log_json: false,
            api_token: None,
            webhook_secret: None,
            provider: ProviderConfig::default(),
            admission: AdmissionConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field("debug", &self.debug)
            .field("log_json", &self.log_json)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("provider", &self.provider)
            .field("admission", &self.admission)
            .field("cors", &self.cors)
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Recognized variables:
    ///
    /// - `TANDEM_HTTP_PORT`
    /// - `TANDEM_DEBUG`
    /// - `TANDEM_LOG_JSON`
    /// - `TANDEM_API_TOKEN`
    /// - `TANDEM_WEBHOOK_SECRET`
    /// - `TANDEM_PROVIDER_BASE_URL`
    /// - `TANDEM_PROVIDER_API_KEY`
    /// - `TANDEM_PROVIDER_ASSISTANT_ID`
    /// - `TANDEM_PROVIDER_PHONE_NUMBER_ID`
    /// - `TANDEM_PROVIDER_TIMEOUT_SECS`
    /// - `TANDEM_RATE_LIMIT`
    /// - `TANDEM_RATE_WINDOW_SECS`
    /// - `TANDEM_MAX_CONCURRENT_CALLS`
    /// - `TANDEM_MAX_CALL_SECS`
    /// - `TANDEM_CORS_ORIGINS` (comma-separated, or `*`)
    /// - `TANDEM_CORS_MAX_AGE_SECONDS`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("TANDEM_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("TANDEM_DEBUG")? {
            config.debug = debug;
        }
        if let Some(log_json) = env_bool("TANDEM_LOG_JSON")? {
            config.log_json = log_json;
        }
        config.api_token = env_string("TANDEM_API_TOKEN");
        config.webhook_secret = env_string("TANDEM_WEBHOOK_SECRET");

        if let Some(base_url) = env_string("TANDEM_PROVIDER_BASE_URL") {
            config.provider.base_url = base_url;
        }
        config.provider.api_key = env_string("TANDEM_PROVIDER_API_KEY");
        config.provider.assistant_id = env_string("TANDEM_PROVIDER_ASSISTANT_ID");
        config.provider.phone_number_id = env_string("TANDEM_PROVIDER_PHONE_NUMBER_ID");
        if let Some(timeout) = env_u64("TANDEM_PROVIDER_TIMEOUT_SECS")? {
            if timeout == 0 {
                return Err(Error::InvalidInput(
                    "TANDEM_PROVIDER_TIMEOUT_SECS must be greater than 0".to_string(),
                ));
            }
            config.provider.timeout_secs = timeout;
        }

        if let Some(limit) = env_u32("TANDEM_RATE_LIMIT")? {
            config.admission.rate_limit = limit;
        }
        if let Some(window) = env_u64("TANDEM_RATE_WINDOW_SECS")? {
            if window == 0 {
                return Err(Error::InvalidInput(
                    "TANDEM_RATE_WINDOW_SECS must be greater than 0".to_string(),
                ));
            }
            config.admission.rate_window_secs = window;
        }
        if let Some(max) = env_usize("TANDEM_MAX_CONCURRENT_CALLS")? {
            config.admission.max_concurrent_calls = max;
        }
        if let Some(secs) = env_u64("TANDEM_MAX_CALL_SECS")? {
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "TANDEM_MAX_CALL_SECS must be greater than 0".to_string(),
                ));
            }
            config.admission.max_call_secs = secs;
        }

        if let Some(origins) = env_string("TANDEM_CORS_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_u64("TANDEM_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        Ok(config)
    }

    /// Validates settings a deployment must not run without.
    ///
    /// Debug mode tolerates missing secrets so a local instance can
    /// start bare; everything else must carry them.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or unsafe setting.
    pub fn validate(&self) -> Result<()> {
        if self.debug {
            return Ok(());
        }

        if is_unset(self.api_token.as_deref()) {
            return Err(Error::InvalidInput(
                "TANDEM_API_TOKEN is required when TANDEM_DEBUG is false".to_string(),
            ));
        }
        if is_unset(self.webhook_secret.as_deref()) {
            return Err(Error::InvalidInput(
                "TANDEM_WEBHOOK_SECRET is required when TANDEM_DEBUG is false".to_string(),
            ));
        }
        if is_unset(self.provider.api_key.as_deref()) {
            return Err(Error::InvalidInput(
                "TANDEM_PROVIDER_API_KEY is required when TANDEM_DEBUG is false".to_string(),
            ));
        }
        if is_unset(self.provider.assistant_id.as_deref()) {
            return Err(Error::InvalidInput(
                "TANDEM_PROVIDER_ASSISTANT_ID is required when TANDEM_DEBUG is false".to_string(),
            ));
        }
        if is_unset(self.provider.phone_number_id.as_deref()) {
            return Err(Error::InvalidInput(
                "TANDEM_PROVIDER_PHONE_NUMBER_ID is required when TANDEM_DEBUG is false"
                    .to_string(),
            ));
        }
        if self.cors.allowed_origins.iter().any(|o| o == "*") {
            return Err(Error::InvalidInput(
                "TANDEM_CORS_ORIGINS cannot be '*' when TANDEM_DEBUG is false".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_unset(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
