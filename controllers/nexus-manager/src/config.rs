//! Process configuration
//!
//! Read once at startup from environment variables. Invalid values fail
//! startup with [`ControllerError::InvalidConfig`].

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ControllerError;

/// Values used when neither the Host nor the active HostDefaults set a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDefaults {
    pub image: Option<String>,
    pub replicas: i32,
    pub port: i32,
    pub expose: bool,
}

/// PEM files for the admission endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Restrict the Host watch to one namespace
    pub watch_namespace: Option<String>,
    /// Name of the active HostDefaults object
    pub defaults_name: String,
    pub builtin: BuiltinDefaults,
    pub concurrency: u16,
    pub debounce: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Requeue interval after a successful pass
    pub resync: Duration,
    /// Probes and metrics
    pub http_addr: SocketAddr,
    /// Admission endpoint
    pub webhook_addr: SocketAddr,
    /// Plain HTTP when `None`
    pub webhook_tls: Option<TlsPaths>,
    /// Reporting instance on published events
    pub instance: Option<String>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let builtin = BuiltinDefaults {
            image: get("DEFAULT_HOST_IMAGE"),
            replicas: parse(&get, "DEFAULT_HOST_REPLICAS", 1)?,
            port: parse(&get, "DEFAULT_HOST_PORT", 8080)?,
            expose: parse(&get, "DEFAULT_HOST_EXPOSE", true)?,
        };
        if builtin.replicas < 0 {
            return Err(invalid("DEFAULT_HOST_REPLICAS must not be negative"));
        }
        if !(1..=65535).contains(&builtin.port) {
            return Err(invalid("DEFAULT_HOST_PORT must be between 1 and 65535"));
        }

        let backoff_min = Duration::from_secs(parse(&get, "BACKOFF_MIN_SECS", 1)?);
        let backoff_max = Duration::from_secs(parse(&get, "BACKOFF_MAX_SECS", 300)?);
        if backoff_min.is_zero() || backoff_min > backoff_max {
            return Err(invalid("BACKOFF_MIN_SECS must be positive and not above BACKOFF_MAX_SECS"));
        }

        let webhook_tls = match (get("WEBHOOK_TLS_CERT"), get("WEBHOOK_TLS_KEY")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(invalid("WEBHOOK_TLS_CERT and WEBHOOK_TLS_KEY must be set together")),
        };

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            defaults_name: get("HOST_DEFAULTS_NAME").unwrap_or_else(|| "default".to_string()),
            builtin,
            concurrency: parse(&get, "RECONCILE_CONCURRENCY", 4)?,
            debounce: Duration::from_millis(parse(&get, "RECONCILE_DEBOUNCE_MS", 500)?),
            backoff_min,
            backoff_max,
            resync: Duration::from_secs(parse(&get, "RESYNC_INTERVAL_SECS", 300)?),
            http_addr: parse(&get, "HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            webhook_addr: parse(&get, "WEBHOOK_ADDR", SocketAddr::from(([0, 0, 0, 0], 8443)))?,
            webhook_tls,
            instance: get("POD_NAME"),
        })
    }
}

fn invalid(msg: &str) -> ControllerError {
    ControllerError::InvalidConfig(msg.to_string())
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}
