use base64::{engine::general_purpose, Engine as _};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Minimum decoded length of `SESSION_KEY` (cookie signing + encryption).
pub const MIN_SESSION_KEY_BYTES: usize = 64;

/// Upper bound for every TTL and interval setting (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

/// What a nonce is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceBinding {
    /// The wallet address supplied when requesting the nonce.
    Address,
    /// The caller's session cookie.
    Session,
}

impl FromStr for NonceBinding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" => Ok(NonceBinding::Address),
            "session" => Ok(NonceBinding::Session),
            other => Err(format!("expected 'address' or 'session', got '{}'", other)),
        }
    }
}

impl fmt::Display for NonceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonceBinding::Address => write!(f, "address"),
            NonceBinding::Session => write!(f, "session"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    // Cookie encryption key (decoded)
    pub session_key: Vec<u8>,

    // Server
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,

    // Nonce store; in-memory when unset
    pub redis_url: Option<String>,

    // Handshake
    pub nonce_binding: NonceBinding,
    pub siwe_domain: Option<String>,

    // TTLs (in seconds)
    pub nonce_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,

    // Cookie
    pub cookie_name: String,
    pub cookie_secure: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("session_key", &"[REDACTED]")
            .field("bind_addr", &self.bind_addr)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("nonce_binding", &self.nonce_binding)
            .field("siwe_domain", &self.siwe_domain)
            .field("nonce_ttl_secs", &self.nonce_ttl_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        let session_key = env::var("SESSION_KEY")
            .map_err(|_| ConfigError::MissingVar("SESSION_KEY".to_string()))?;
        let session_key = decode_session_key(&session_key)?;

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;
        let max_body_bytes = parse_env_or_default("MAX_BODY_BYTES", 16_384)?;

        let redis_url = optional_env("REDIS_URL");

        // Handshake
        let nonce_binding = parse_env_or_default("NONCE_BINDING", NonceBinding::Address)?;
        let siwe_domain = optional_env("SIWE_DOMAIN");
        if let Some(domain) = &siwe_domain {
            if domain.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidValue(
                    "SIWE_DOMAIN".to_string(),
                    "must not contain whitespace".to_string(),
                ));
            }
        }

        // TTLs
        let nonce_ttl_secs = parse_env_or_default("NONCE_TTL_SECS", 300)?;
        let session_ttl_secs = parse_env_or_default("SESSION_TTL_SECS", 86_400)?;
        let cleanup_interval_secs = parse_env_or_default("CLEANUP_INTERVAL_SECS", 60)?;
        for (key, value) in [
            ("NONCE_TTL_SECS", nonce_ttl_secs),
            ("SESSION_TTL_SECS", session_ttl_secs),
            ("CLEANUP_INTERVAL_SECS", cleanup_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
            if value > MAX_TTL_SECS {
                return Err(ConfigError::InvalidValue(
                    key.to_string(),
                    format!("must be at most {} seconds", MAX_TTL_SECS),
                ));
            }
        }

        // Cookie
        let cookie_name =
            env::var("COOKIE_NAME").unwrap_or_else(|_| "meritbase-session".to_string());
        if cookie_name.is_empty()
            || !cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidValue(
                "COOKIE_NAME".to_string(),
                "may only contain alphanumeric characters, hyphens, and underscores".to_string(),
            ));
        }
        let cookie_secure = parse_env_or_default("COOKIE_SECURE", true)?;

        Ok(Config {
            session_key,
            bind_addr,
            max_body_bytes,
            redis_url,
            nonce_binding,
            siwe_domain,
            nonce_ttl_secs,
            session_ttl_secs,
            cleanup_interval_secs,
            cookie_name,
            cookie_secure,
        })
    }

    pub fn nonce_ttl(&self) -> chrono::Duration {
        ttl_duration(self.nonce_ttl_secs)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        ttl_duration(self.session_ttl_secs)
    }
}

fn ttl_duration(secs: u64) -> chrono::Duration {
    // Clamped so the cast and expiry arithmetic stay in range
    chrono::Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

/// Decode and length-check a base64 `SESSION_KEY`.
pub fn decode_session_key(encoded: &str) -> Result<Vec<u8>, ConfigError> {
    if encoded.is_empty() {
        return Err(ConfigError::InvalidValue(
            "SESSION_KEY".to_string(),
            "cannot be empty".to_string(),
        ));
    }

    let bytes = general_purpose::STANDARD.decode(encoded).map_err(|e| {
        ConfigError::InvalidValue("SESSION_KEY".to_string(), format!("invalid base64: {}", e))
    })?;

    if bytes.len() < MIN_SESSION_KEY_BYTES {
        return Err(ConfigError::InvalidValue(
            "SESSION_KEY".to_string(),
            format!(
                "expected at least {} bytes, got {}",
                MIN_SESSION_KEY_BYTES,
                bytes.len()
            ),
        ));
    }

    Ok(bytes)
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
