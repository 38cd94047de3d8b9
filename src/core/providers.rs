use std::error::Error;
use std::fmt;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "API_KEY";
pub const BASE_URL_ENV: &str = "GEMINI_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const QUICK_FIXES: &[&str] = &[
    "export GEMINI_API_KEY=...       # Key from Google AI Studio",
    "mathlogos set model <MODEL>     # Choose another model",
    "mathlogos set temperature 0.7   # Reset the sampling temperature",
];

/// Missing or invalid settings that make any request pointless.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationError {
    message: String,
    quick_fixes: &'static [&'static str],
    exit_code: i32,
}

impl ConfigurationError {
    pub fn missing_api_key() -> Self {
        Self::new(
            "❌ GEMINI_API_KEY environment variable not set\n\nPlease set your API key:\n   export GEMINI_API_KEY=\"your-api-key-here\"\n   export GEMINI_BASE_URL=\"https://generativelanguage.googleapis.com/v1beta\"  # Optional",
        )
    }

    pub fn empty_model() -> Self {
        Self::new("❌ No model configured. Set one with 'mathlogos set model <MODEL>'.")
    }

    pub fn invalid_temperature(temperature: f32) -> Self {
        Self::new(format!(
            "❌ Temperature {temperature} is out of range; expected a value between 0.0 and 2.0."
        ))
    }

    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            quick_fixes: QUICK_FIXES,
            exit_code: 2,
        }
    }

    pub fn quick_fixes(&self) -> &'static [&'static str] {
        self.quick_fixes
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ConfigurationError {}

#[derive(Clone)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Reads the API key from the process environment.
///
/// The base URL comes from `GEMINI_BASE_URL`, then `configured_base_url`, then
/// the public endpoint.
pub fn resolve_env_credentials(
    configured_base_url: Option<&str>,
) -> Result<ProviderCredentials, ConfigurationError> {
    resolve_credentials_with(|name| std::env::var(name).ok(), configured_base_url)
}

fn resolve_credentials_with(
    lookup: impl Fn(&str) -> Option<String>,
    configured_base_url: Option<&str>,
) -> Result<ProviderCredentials, ConfigurationError> {
    let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    let api_key = non_empty(API_KEY_ENV)
        .or_else(|| non_empty(FALLBACK_API_KEY_ENV))
        .ok_or_else(ConfigurationError::missing_api_key)?;

    let base_url = non_empty(BASE_URL_ENV)
        .or_else(|| {
            configured_base_url
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    Ok(ProviderCredentials { api_key, base_url })
}
