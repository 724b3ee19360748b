//! Registry configuration.
//!
//! Read from YAML (or JSON, which is valid YAML). Every field has a default,
//! so an empty document is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, de};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::path;

/// Default ZooKeeper ensemble.
pub const DEFAULT_CONNECT_STRING: &str = "127.0.0.1:2181";
/// Default session timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default parent node for server entries.
pub const DEFAULT_ROOT_PATH: &str = "/servers";
/// Default name prefix of server entries.
pub const DEFAULT_NODE_PREFIX: &str = "server_";

/// Where to register and how to reach the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Comma separated `host:port` list of the ensemble.
    pub connect_string: String,
    /// Session timeout; also bounds the wait for the first connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub session_timeout: Duration,
    /// Parent node of server entries.
    pub root_path: String,
    /// Name prefix of server entries.
    pub node_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_string: DEFAULT_CONNECT_STRING.to_owned(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            root_path: DEFAULT_ROOT_PATH.to_owned(),
            node_prefix: DEFAULT_NODE_PREFIX.to_owned(),
        }
    }
}

impl RegistryConfig {
    /// Read and validate a config file.
    pub fn parse<P: AsRef<Path>>(path: P) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        let config = Self::parse_str(text)?;
        debug!(?config, path = %path.display(), "loaded registry config");
        Ok(config)
    }

    /// Decode and validate a config document.
    pub fn parse_str<S: AsRef<str>>(s: S) -> RegistryResult<Self> {
        let s = s.as_ref();
        let config: Self = if s.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(s)
                .map_err(|e| RegistryError::Config(format!("invalid registry config: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check field values that serde can't.
    pub fn validate(&self) -> RegistryResult<()> {
        if self.connect_string.trim().is_empty() {
            return Err(RegistryError::Config("connect_string is empty".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(RegistryError::Config("session_timeout cannot be zero".into()));
        }
        path::validate(&self.root_path)?;
        if self.node_prefix.is_empty() || self.node_prefix.contains('/') {
            return Err(RegistryError::Config(format!(
                "node_prefix '{}' must be a non-empty name without '/'",
                self.node_prefix
            )));
        }
        Ok(())
    }
}

/// Parse `"500ms"`, `"5s"`, `"2m"` or a bare number of milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".into());
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num, unit) = s.split_at(end);
    let num = num
        .parse::<u64>()
        .map_err(|e| format!("invalid number in '{s}': {e}"))?;

    let millis = match unit.trim() {
        "" | "ms" => Some(num),
        "s" => num.checked_mul(1_000),
        "m" => num.checked_mul(60_000),
        other => {
            return Err(format!(
                "unknown time unit '{other}', only 'ms', 's' or 'm' are supported"
            ));
        }
    };
    millis
        .map(Duration::from_millis)
        .ok_or_else(|| "duration value overflow".into())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Millis(u64),
    String(String),
}

fn deserialize_duration<'de, D>(de: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match WireDuration::deserialize(de)? {
        WireDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
        WireDuration::String(s) => parse_duration(&s).map_err(de::Error::custom),
    }
}
