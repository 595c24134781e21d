//! Relay configuration.
//!
//! The relay resolves its configuration exactly once, at process start, and
//! hands the resulting [`RelayConfig`] to everything that needs it. A missing
//! secret key does not stop the process: it makes [`RelayConfig::credentials`]
//! fail so that every endpoint answers "service unavailable".

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ChatSettings, SecretKey};

/// Environment variable holding the upstream credential.
pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";
/// Environment variable holding the model identifier.
pub const MODEL_VAR: &str = "OPENROUTER_MODEL";
/// Environment variable holding the reply token limit.
pub const MAX_TOKENS_VAR: &str = "OPENROUTER_MAX_TOKENS";
/// Environment variable holding the sampling temperature.
pub const TEMPERATURE_VAR: &str = "OPENROUTER_TEMPERATURE";
/// Environment variable holding the system prompt.
pub const SYSTEM_PROMPT_VAR: &str = "OPENROUTER_SYSTEM_PROMPT";
/// Environment variable holding the streaming default advertised to clients.
pub const USE_STREAMING_VAR: &str = "OPENROUTER_USE_STREAMING";
/// Environment variable overriding the upstream endpoint.
pub const API_URL_VAR: &str = "OPENROUTER_API_URL";
/// Environment variable holding the `X-Title` sent upstream.
pub const APP_TITLE_VAR: &str = "OPENROUTER_APP_TITLE";

/// Default model.
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
/// Default reply token limit.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
/// Default upstream endpoint.
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
/// Default `X-Title`.
pub const DEFAULT_APP_TITLE: &str = "Website Chat";
/// Default upstream timeout for buffered requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Key values that ship in example configs and must never be used.
const PLACEHOLDER_KEYS: &[&str] = &["your_api_key_here", "YOUR_OPENROUTER_API_KEY"];

/// Resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Model identifier sent upstream.
    pub model: String,
    /// Token limit per reply, always positive.
    pub max_tokens: u32,
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f32,
    /// System prompt injected ahead of client messages.
    pub system_prompt: String,
    /// Streaming default advertised to clients.
    pub use_streaming: bool,
    /// Upstream completion endpoint.
    pub api_url: String,
    /// `X-Title` sent upstream.
    pub app_title: String,
    /// Timeout for buffered upstream requests.
    pub timeout: Duration,
    secret_key: Option<SecretKey>,
}

impl RelayConfig {
    /// Creates a configuration with every default and the given key.
    pub fn new(secret_key: Option<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            use_streaming: true,
            api_url: DEFAULT_API_URL.to_string(),
            app_title: DEFAULT_APP_TITLE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            secret_key: secret_key.map(SecretKey::new),
        }
    }

    /// Resolves the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolves the configuration from an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a numeric value does not parse or is
    /// out of range. An absent key is not an error here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::new(get(API_KEY_VAR));
        if let Some(model) = get(MODEL_VAR) {
            config.model = model;
        }
        if let Some(raw) = get(MAX_TOKENS_VAR) {
            config.max_tokens = parse_max_tokens(&raw)?;
        }
        if let Some(raw) = get(TEMPERATURE_VAR) {
            config.temperature = parse_temperature(&raw)?;
        }
        if let Some(prompt) = get(SYSTEM_PROMPT_VAR) {
            config.system_prompt = prompt;
        }
        if let Some(raw) = get(USE_STREAMING_VAR) {
            config.use_streaming = parse_bool(&raw).ok_or_else(|| {
                Error::validation(
                    format!("cannot interpret {raw:?} as a boolean"),
                    Some(USE_STREAMING_VAR.to_string()),
                )
            })?;
        }
        if let Some(api_url) = get(API_URL_VAR) {
            url::Url::parse(&api_url)?;
            config.api_url = api_url;
        }
        if let Some(title) = get(APP_TITLE_VAR) {
            config.app_title = title;
        }
        Ok(config)
    }

    /// Sets the buffered-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the upstream endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Returns the credential.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when the key is absent or still a
    /// placeholder. Callers report this as "service unavailable" and must
    /// not retry.
    pub fn credentials(&self) -> Result<&SecretKey> {
        match &self.secret_key {
            Some(key) if !is_placeholder(key.expose()) => Ok(key),
            _ => Err(Error::configuration("")),
        }
    }

    /// True when a usable key is configured.
    pub fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    /// The client-safe view of this configuration.
    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.model.clone(),
            use_streaming: self.use_streaming,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

fn is_placeholder(key: &str) -> bool {
    key.trim().is_empty() || PLACEHOLDER_KEYS.contains(&key)
}

fn parse_max_tokens(raw: &str) -> Result<u32> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::validation(
            format!("max tokens must be a positive integer, got {raw:?}"),
            Some(MAX_TOKENS_VAR.to_string()),
        )),
    }
}

fn parse_temperature(raw: &str) -> Result<f32> {
    match raw.parse::<f32>() {
        Ok(t) if (0.0..=2.0).contains(&t) => Ok(t),
        _ => Err(Error::validation(
            format!("temperature must be within [0, 2], got {raw:?}"),
            Some(TEMPERATURE_VAR.to_string()),
        )),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = RelayConfig::from_lookup(lookup(&[(API_KEY_VAR, "sk-test")])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.use_streaming);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.is_configured());
    }

    #[test]
    fn overrides_apply() {
        let config = RelayConfig::from_lookup(lookup(&[
            (API_KEY_VAR, "sk-test"),
            (MODEL_VAR, "openai/gpt-4"),
            (MAX_TOKENS_VAR, "250"),
            (TEMPERATURE_VAR, "1.5"),
            (SYSTEM_PROMPT_VAR, "You sell contracting services."),
            (USE_STREAMING_VAR, "off"),
        ]))
        .unwrap();
        assert_eq!(config.model, "openai/gpt-4");
        assert_eq!(config.max_tokens, 250);
        assert_eq!(config.temperature, 1.5);
        assert_eq!(config.system_prompt, "You sell contracting services.");
        assert!(!config.use_streaming);
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        let err = config.credentials().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn placeholder_keys_are_rejected() {
        for placeholder in PLACEHOLDER_KEYS {
            let config =
                RelayConfig::from_lookup(lookup(&[(API_KEY_VAR, placeholder)])).unwrap();
            assert!(!config.is_configured(), "{placeholder} accepted");
        }
        let config = RelayConfig::from_lookup(lookup(&[(API_KEY_VAR, "   ")])).unwrap();
        assert!(!config.is_configured());
    }

    #[test]
    fn invalid_numbers_fail_resolution() {
        assert!(RelayConfig::from_lookup(lookup(&[(MAX_TOKENS_VAR, "0")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(MAX_TOKENS_VAR, "lots")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(TEMPERATURE_VAR, "2.5")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(TEMPERATURE_VAR, "-0.1")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[(USE_STREAMING_VAR, "maybe")])).is_err());
    }

    #[test]
    fn key_never_appears_in_debug_or_settings() {
        let config = RelayConfig::new(Some("sk-or-v1-supersecret".to_string()));
        assert!(!format!("{config:?}").contains("supersecret"));
        let settings = serde_json::to_string(&config.settings()).unwrap();
        assert!(!settings.contains("supersecret"));
    }
}
