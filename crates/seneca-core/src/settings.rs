//! Transport settings block and resolved addresses.
//!
//! A settings block selects the transport (`type = "tcp"`), names either a
//! host/port pair or a filesystem socket path, and tunes bind-retry and
//! reconnect pacing. Fields are optional with conventional defaults so a
//! configuration file only states what differs, and an older file missing
//! newer fields keeps working.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport selector accepted by [`TransportSettings::validate`].
pub const TRANSPORT_TYPE: &str = "tcp";

/// Host used when the settings block names none.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port used when the settings block names none. `port = 0` still requests
/// an OS-assigned ephemeral port.
pub const DEFAULT_PORT: u16 = 10201;

/// Bind attempts when `max_listen_attempts` is unset (single attempt, no retry).
pub const DEFAULT_LISTEN_ATTEMPTS: u32 = 1;

/// Pause between bind retries when `attempt_delay` is unset.
pub const DEFAULT_BIND_RETRY_DELAY_MS: u64 = 100;

/// Pause between reconnect attempts when `attempt_delay` is unset.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

/// Error type for settings validation and parsing.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The `type` field selects a transport this crate does not provide.
    #[error("unsupported transport type {0:?} (expected \"tcp\")")]
    UnsupportedType(String),

    /// Both `path` and an explicit host/port were set.
    #[error("`path` is mutually exclusive with `host`/`port`")]
    PathConflict,

    /// The TOML content could not be parsed.
    #[error("failed to parse transport settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One transport settings block.
///
/// ```toml
/// type = "tcp"
/// host = "127.0.0.1"
/// port = 0
/// max_listen_attempts = 10
/// attempt_delay = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Transport selector; must be `"tcp"`.
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,

    /// Bind/connect host. Defaults to `127.0.0.1` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Bind/connect port. `0` requests an OS-assigned ephemeral port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Filesystem socket path; mutually exclusive with host/port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Bind retry ceiling. Defaults to 1 (a single attempt, no retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_listen_attempts: Option<u32>,

    /// Milliseconds between bind retries and between reconnect attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_delay: Option<u64>,
}

fn default_type() -> String {
    TRANSPORT_TYPE.to_string()
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: default_type(),
            host: None,
            port: None,
            path: None,
            max_listen_attempts: None,
            attempt_delay: None,
        }
    }
}

impl TransportSettings {
    /// Parses a settings block from TOML text; absent fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] on malformed TOML.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Checks the block for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnsupportedType`] for a foreign `type` and
    /// [`SettingsError::PathConflict`] when both `path` and an explicit
    /// host or port are present.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.kind != TRANSPORT_TYPE {
            return Err(SettingsError::UnsupportedType(self.kind.clone()));
        }
        if self.path.is_some() && (self.host.is_some() || self.port.is_some()) {
            return Err(SettingsError::PathConflict);
        }
        Ok(())
    }

    /// The effective host, falling back to [`DEFAULT_HOST`].
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    /// The effective port, falling back to [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// The effective bind retry ceiling; always at least 1.
    pub fn max_listen_attempts(&self) -> u32 {
        self.max_listen_attempts.unwrap_or(DEFAULT_LISTEN_ATTEMPTS).max(1)
    }

    /// The effective retry pacing, with a context-specific fallback
    /// ([`DEFAULT_BIND_RETRY_DELAY_MS`] or [`DEFAULT_RECONNECT_DELAY_MS`]).
    pub fn attempt_delay(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.attempt_delay.unwrap_or(default_ms))
    }

    /// Validates the block and resolves the endpoint it names.
    ///
    /// # Errors
    ///
    /// Propagates [`SettingsError`] from [`validate`](Self::validate).
    pub fn target(&self) -> Result<Target, SettingsError> {
        self.validate()?;
        Ok(match &self.path {
            Some(path) => Target::Path(path.clone()),
            None => Target::Tcp {
                host: self.host().to_string(),
                port: self.port(),
            },
        })
    }
}

/// Endpoint a settings block resolves to before any socket is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A TCP endpoint; `port` may still be 0 (ephemeral) at this stage.
    Tcp { host: String, port: u16 },
    /// A filesystem socket path.
    Path(PathBuf),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Tcp { host, port } => write!(f, "{host}:{port}"),
            Target::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Endpoint actually bound, reported once a listener is up.
///
/// Unlike [`Target`], a TCP `Address` always carries the real bound port:
/// requesting port 0 resolves to the OS-assigned one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    Tcp { host: String, port: u16 },
    Path(PathBuf),
}

impl Address {
    /// The bound TCP port, if this is a TCP address.
    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Tcp { port, .. } => Some(*port),
            Address::Path(_) => None,
        }
    }

    /// The bound host, if this is a TCP address.
    pub fn host(&self) -> Option<&str> {
        match self {
            Address::Tcp { host, .. } => Some(host),
            Address::Path(_) => None,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "{host}:{port}"),
            Address::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
