//! Client configuration.
//!
//! Configuration is explicit: every client, codec and authenticator takes
//! its own config struct, and nothing is read from process globals except
//! through [`ClientConfig::from_env`]. Secret material is redacted in Debug
//! output.

use crate::transport::{RetryPolicy, TlsMaterial};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Default TCP/TLS connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Default delay between two attempts of a failed request, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MILLIS: u64 = 3000;

/// Default duration a verified token is trusted without asking the authority
/// again, in seconds.
pub const DEFAULT_CACHE_VALIDITY_SECONDS: u64 = 300;

/// Upper bound on the cache validity, in seconds (1 hour).
pub const MAX_CACHE_VALIDITY_SECONDS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid authority URL: {0}")]
    InvalidAuthorityUrl(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid cache validity configuration: {0}")]
    InvalidCacheValidity(String),

    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(String),
}

fn parse_u64(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, String> {
    match vars.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| format!("{name} must be a valid non-negative integer, got '{raw}': {e}")),
    }
}

fn read_file(vars: &HashMap<String, String>, name: &str) -> Result<Option<String>, ConfigError> {
    let Some(path) = vars.get(name) else {
        return Ok(None);
    };
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|e| ConfigError::InvalidTls(format!("{name}: unable to read '{path}': {e}")))
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Configuration of the authority client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the authority, without trailing slash.
    pub authority_url: String,

    /// Root CAs and optional client identity.
    pub tls: TlsMaterial,

    /// Bound on a single HTTP attempt.
    pub request_timeout: Duration,

    /// Bound on establishing a connection.
    pub connect_timeout: Duration,

    /// Retry policy for issuance and verification calls.
    pub retry: RetryPolicy,

    /// Value of the `X-External-Tracking-Type` header, if any.
    pub tracking_type: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("authority_url", &self.authority_url)
            .field("tls", &self.tls)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("tracking_type", &self.tracking_type)
            .finish()
    }
}

impl ClientConfig {
    /// Configuration with defaults for `authority_url`.
    ///
    /// # Errors
    ///
    /// `InvalidAuthorityUrl` if the URL is empty or not http(s).
    pub fn new(authority_url: impl Into<String>) -> Result<Self, ConfigError> {
        let authority_url = normalize_url(authority_url.into())?;
        Ok(Self {
            authority_url,
            tls: TlsMaterial::default(),
            request_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            retry: RetryPolicy::default(),
            tracking_type: None,
        })
    }

    /// Like [`ClientConfig::new`] but refuses anything other than `https://`.
    ///
    /// # Errors
    ///
    /// `InvalidAuthorityUrl` for non-https URLs.
    pub fn new_secure(authority_url: impl Into<String>, tls: TlsMaterial) -> Result<Self, ConfigError> {
        let config = Self::new(authority_url)?.with_tls(tls);
        if !config.authority_url.starts_with("https://") {
            return Err(ConfigError::InvalidAuthorityUrl(format!(
                "'{}' must use https",
                config.authority_url
            )));
        }
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` when `AUTHN_AUTHORITY_URL` is absent, otherwise the
    /// variant matching the first invalid value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let authority_url = vars
            .get("AUTHN_AUTHORITY_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTHN_AUTHORITY_URL".to_string()))?
            .clone();

        let mut config = Self::new(authority_url)?;

        if let Some(secs) =
            parse_u64(vars, "AUTHN_HTTP_TIMEOUT_SECONDS").map_err(ConfigError::InvalidTimeout)?
        {
            if secs == 0 {
                return Err(ConfigError::InvalidTimeout(
                    "AUTHN_HTTP_TIMEOUT_SECONDS must be greater than 0".to_string(),
                ));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        let delay = parse_u64(vars, "AUTHN_RETRY_DELAY_MILLIS")
            .map_err(ConfigError::InvalidRetryPolicy)?
            .unwrap_or(DEFAULT_RETRY_DELAY_MILLIS);
        let mut retry = RetryPolicy::default().with_delay(Duration::from_millis(delay));

        // 0 or absent means retry until the caller gives up.
        if let Some(attempts) =
            parse_u64(vars, "AUTHN_RETRY_MAX_ATTEMPTS").map_err(ConfigError::InvalidRetryPolicy)?
        {
            if attempts > 0 {
                let attempts = u32::try_from(attempts).map_err(|_| {
                    ConfigError::InvalidRetryPolicy(format!(
                        "AUTHN_RETRY_MAX_ATTEMPTS must fit in 32 bits, got {attempts}"
                    ))
                })?;
                retry = retry.with_max_attempts(attempts);
            }
        }
        config.retry = retry;

        config.tracking_type = vars
            .get("AUTHN_TRACKING_TYPE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut tls = TlsMaterial::default();
        if let Some(ca) = read_file(vars, "AUTHN_CA_PEM_FILE")? {
            tls = tls.with_root_ca_pem(ca);
        }
        match (
            read_file(vars, "AUTHN_CLIENT_CERT_PEM_FILE")?,
            read_file(vars, "AUTHN_CLIENT_KEY_PEM_FILE")?,
        ) {
            (Some(cert), Some(key)) => {
                tls = tls.with_client_identity(cert, SecretString::from(key));
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::InvalidTls(
                    "AUTHN_CLIENT_CERT_PEM_FILE and AUTHN_CLIENT_KEY_PEM_FILE must be set together"
                        .to_string(),
                ))
            }
        }
        config.tls = tls;

        Ok(config)
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tracking_type(mut self, tracking_type: impl Into<String>) -> Self {
        self.tracking_type = Some(tracking_type.into());
        self
    }
}

fn normalize_url(url: String) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidAuthorityUrl(
            "authority URL must not be empty".to_string(),
        ));
    }
    if !trimmed.starts_with("https://") && !trimmed.starts_with("http://") {
        return Err(ConfigError::InvalidAuthorityUrl(format!(
            "'{trimmed}' must start with http:// or https://"
        )));
    }
    Ok(trimmed.to_string())
}

// =============================================================================
// AuthenticatorConfig
// =============================================================================

/// Configuration of the authenticator facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorConfig {
    /// How long a verified token is trusted without re-checking the
    /// authority. Independent of the token's own expiry.
    pub cache_validity: Duration,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            cache_validity: Duration::from_secs(DEFAULT_CACHE_VALIDITY_SECONDS),
        }
    }
}

impl AuthenticatorConfig {
    #[must_use]
    pub fn new(cache_validity: Duration) -> Self {
        Self { cache_validity }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatorConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// `InvalidCacheValidity` if `AUTHN_CACHE_VALIDITY_SECONDS` is not an
    /// integer in `1..=3600`.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let Some(secs) = parse_u64(vars, "AUTHN_CACHE_VALIDITY_SECONDS")
            .map_err(ConfigError::InvalidCacheValidity)?
        else {
            return Ok(Self::default());
        };

        if secs == 0 || secs > MAX_CACHE_VALIDITY_SECONDS {
            return Err(ConfigError::InvalidCacheValidity(format!(
                "AUTHN_CACHE_VALIDITY_SECONDS must be between 1 and {MAX_CACHE_VALIDITY_SECONDS}, got {secs}"
            )));
        }

        Ok(Self::new(Duration::from_secs(secs)))
    }
}

// =============================================================================
// CodecConfig
// =============================================================================

/// Expected issuer and audience of verified tokens, also stamped on issued
/// ones. An empty value disables the corresponding check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecConfig {
    pub issuer: String,
    pub audience: String,
}

impl CodecConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }
}
