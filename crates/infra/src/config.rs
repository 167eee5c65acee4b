//! Process configuration, read once from the environment at startup.
//!
//! Every constructor takes the piece of [`AppConfig`] it needs by reference;
//! nothing reads the environment after `from_env` returns.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use natsgate_observability::LogFormat;
use thiserror::Error;

pub const DEFAULT_AUTH_SUBJECT: &str = "$SYS.REQ.USER.AUTH";
pub const DEFAULT_NATS_SERVER: &str = "nats://127.0.0.1:4222";
pub const DEFAULT_IDENTITY_CLAIM: &str = "user_id";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// A value that must never show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Account keys used to sign everything sent back to NATS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    pub account_public_key: String,
    pub seed: Secret,
}

/// OpenID Connect provider used to verify bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    pub jwks_uri: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub identity_claim: String,
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub user: Option<String>,
    pub password: Option<Secret>,
    pub auth_subject: String,
    pub queue_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalloutConfig {
    /// Budget for store and provider round trips within one call.
    pub timeout: Duration,
    pub verify_request_signature: bool,
    pub deny_catch_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub signing: SigningConfig,
    pub oidc: OidcConfig,
    pub nats: NatsConfig,
    pub callout: CalloutConfig,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<Secret>,
    pub http_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let signing = SigningConfig {
            account_public_key: env.required("NATS_ACCOUNT_PUBLIC_KEY")?,
            seed: Secret::new(env.required("NATS_AUTH_NKEY_SEED")?),
        };

        let refresh_secs: u64 = env.parsed("JWKS_REFRESH_SECS", 300)?;
        if refresh_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "JWKS_REFRESH_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        let oidc = OidcConfig {
            jwks_uri: env.required("OIDC_JWKS_URI")?,
            issuer: env.optional("OIDC_ISSUER"),
            audience: env.optional("OIDC_AUDIENCE"),
            identity_claim: env
                .optional("OIDC_IDENTITY_CLAIM")
                .unwrap_or_else(|| DEFAULT_IDENTITY_CLAIM.to_string()),
            refresh_interval: Duration::from_secs(refresh_secs),
        };

        let servers: Vec<String> = env
            .optional("NATS_SERVERS")
            .unwrap_or_else(|| DEFAULT_NATS_SERVER.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if servers.is_empty() {
            return Err(ConfigError::Invalid {
                var: "NATS_SERVERS",
                reason: "no server addresses".to_string(),
            });
        }
        let nats = NatsConfig {
            servers,
            user: env.optional("NATS_USER"),
            password: env.optional("NATS_PASSWORD").map(Secret::new),
            auth_subject: env
                .optional("NATS_AUTH_SUBJECT")
                .unwrap_or_else(|| DEFAULT_AUTH_SUBJECT.to_string()),
            queue_group: env.optional("NATS_QUEUE_GROUP"),
        };

        let timeout_ms: u64 = env.parsed("AUTH_CALLOUT_TIMEOUT_MS", 2000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "AUTH_CALLOUT_TIMEOUT_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        let callout = CalloutConfig {
            timeout: Duration::from_millis(timeout_ms),
            verify_request_signature: env.flag("VERIFY_REQUEST_SIGNATURE", false)?,
            deny_catch_all: env.flag("USER_DENY_CATCH_ALL", true)?,
        };

        let http_addr = env.parsed("HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 7001)))?;
        let log_format = env.parsed("LOG_FORMAT", LogFormat::default())?;

        Ok(Self {
            signing,
            oidc,
            nats,
            callout,
            database_url: env.optional("DATABASE_URL").map(Secret::new),
            http_addr,
            log_format,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Present and non-blank, trimmed.
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.optional(var) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: format!("'{raw}': {e}"),
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(var).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    reason: format!("'{v}' is not a boolean"),
                }),
            },
        }
    }
}
