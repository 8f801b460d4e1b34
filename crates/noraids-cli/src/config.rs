//! Daemon configuration: defaults, then an optional TOML file, then
//! `NORAIDS_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use noraids_core::{DEFAULT_IDLE_TIMEOUT, DEFAULT_TIMEFRAME, DEFAULT_WINDOW_CAPACITY, DetectorConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

const REDACTED: &str = "<redacted>";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
    Missing(&'static str),
    ZeroIdleTimeout,
    Detector(noraids_core::ConfigError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config in {}: {source}", path.display())
            }
            ConfigError::Serialize(e) => write!(f, "failed to render config: {e}"),
            ConfigError::InvalidEnv { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
            ConfigError::Missing(var) => write!(f, "{var} is not set"),
            ConfigError::ZeroIdleTimeout => write!(f, "idle_timeout_secs must be at least 1"),
            ConfigError::Detector(e) => write!(f, "invalid detector settings: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(e) => Some(e),
            ConfigError::Detector(e) => Some(e),
            ConfigError::InvalidEnv { .. }
            | ConfigError::Missing(_)
            | ConfigError::ZeroIdleTimeout => None,
        }
    }
}

impl From<noraids_core::ConfigError> for ConfigError {
    fn from(e: noraids_core::ConfigError) -> Self {
        ConfigError::Detector(e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote gate service.
    pub gate_url: Option<String>,
    pub gate_api_key: Option<String>,
    /// Bot API token. Required by `serve`.
    pub bot_token: Option<String>,
    /// Operator chat for error dumps and commands.
    pub log_chat_id: Option<i64>,
    /// Appended to the version string reported to the gate service.
    pub app_version_suffix: String,
    pub window_capacity: usize,
    pub timeframe_secs: u64,
    pub idle_timeout_secs: u64,
    /// Admin API bind address. Unset disables the API.
    pub listen: Option<String>,
    /// Count plain messages as well as joins.
    pub count_messages: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gate_url: None,
            gate_api_key: None,
            bot_token: None,
            log_chat_id: None,
            app_version_suffix: String::new(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            timeframe_secs: DEFAULT_TIMEFRAME.as_secs(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            listen: None,
            count_messages: false,
        }
    }
}

impl Config {
    /// Load `path` if given (it must exist), otherwise `data_dir/config.toml`
    /// when present, otherwise defaults. Environment overrides are applied
    /// separately by [`Config::apply_env`].
    pub fn load(path: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = data_dir.join(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Override fields from `NORAIDS_*` variables. `lookup` is
    /// `std::env::var(..).ok()` outside of tests. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NORAIDS_GATE_URL") {
            self.gate_url = Some(v);
        }
        if let Some(v) = get("NORAIDS_GATE_API_KEY") {
            self.gate_api_key = Some(v);
        }
        if let Some(v) = get("NORAIDS_BOT_TOKEN") {
            self.bot_token = Some(v);
        }
        if let Some(v) = get("NORAIDS_LOG_CHAT_ID") {
            self.log_chat_id = Some(parse_env("NORAIDS_LOG_CHAT_ID", &v)?);
        }
        if let Some(v) = get("NORAIDS_APP_VERSION_SUFFIX") {
            self.app_version_suffix = v;
        }
        if let Some(v) = get("NORAIDS_WINDOW_CAPACITY") {
            self.window_capacity = parse_env("NORAIDS_WINDOW_CAPACITY", &v)?;
        }
        if let Some(v) = get("NORAIDS_TIMEFRAME_SECS") {
            self.timeframe_secs = parse_env("NORAIDS_TIMEFRAME_SECS", &v)?;
        }
        if let Some(v) = get("NORAIDS_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse_env("NORAIDS_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("NORAIDS_LISTEN") {
            self.listen = Some(v);
        }
        if let Some(v) = get("NORAIDS_COUNT_MESSAGES") {
            self.count_messages = parse_bool("NORAIDS_COUNT_MESSAGES", &v)?;
        }
        Ok(())
    }

    pub fn detector(&self) -> Result<DetectorConfig, ConfigError> {
        Ok(DetectorConfig::new(
            self.window_capacity,
            Duration::from_secs(self.timeframe_secs),
        )?)
    }

    /// Reject settings that would load but break the daemon at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector()?;
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn require_gate_url(&self) -> Result<&str, ConfigError> {
        self.gate_url
            .as_deref()
            .ok_or(ConfigError::Missing("NORAIDS_GATE_URL"))
    }

    pub fn require_bot_token(&self) -> Result<&str, ConfigError> {
        self.bot_token
            .as_deref()
            .ok_or(ConfigError::Missing("NORAIDS_BOT_TOKEN"))
    }

    /// Version string reported to the gate service.
    pub fn app_version(&self) -> String {
        format!(
            "noraids {}{}",
            env!("CARGO_PKG_VERSION"),
            self.app_version_suffix
        )
    }

    /// Copy with secrets masked, for printing.
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| REDACTED.to_string());
        Self {
            gate_api_key: mask(&self.gate_api_key),
            bot_token: mask(&self.bot_token),
            ..self.clone()
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window_capacity, 30);
        assert_eq!(config.timeframe_secs, 3600);
        assert_eq!(config.idle_timeout_secs, 900);
        assert!(!config.count_messages);
        assert!(config.listen.is_none());
        assert!(config.detector().is_ok());
    }

    #[test]
    fn test_missing_default_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::load(None, dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml")), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_file_in_data_dir_is_read() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "gate_url = \"http://gate.local\"\nwindow_capacity = 5\n",
        )
        .unwrap();

        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config.gate_url.as_deref(), Some("http://gate.local"));
        assert_eq!(config.window_capacity, 5);
        assert_eq!(config.timeframe_secs, 3600);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "window_capacity = \"many\"").unwrap();
        let err = Config::load(Some(&path), dir.path()).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config {
            window_capacity: 5,
            ..Config::default()
        };
        config
            .apply_env(env(&[
                ("NORAIDS_WINDOW_CAPACITY", "12"),
                ("NORAIDS_LOG_CHAT_ID", "-1001234"),
                ("NORAIDS_COUNT_MESSAGES", "yes"),
                ("NORAIDS_BOT_TOKEN", ""),
            ]))
            .unwrap();
        assert_eq!(config.window_capacity, 12);
        assert_eq!(config.log_chat_id, Some(-1001234));
        assert!(config.count_messages);
        assert!(config.bot_token.is_none());
    }

    #[test]
    fn test_invalid_env_names_variable() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("NORAIDS_TIMEFRAME_SECS", "an hour")]))
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid NORAIDS_TIMEFRAME_SECS="));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = Config {
            window_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.detector(), Err(ConfigError::Detector(_))));
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("NORAIDS_WINDOW_CAPACITY", "1000000000")]))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Detector(noraids_core::ConfigError::CapacityTooLarge(1_000_000_000))
        ));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let config = Config {
            idle_timeout_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroIdleTimeout)));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_require_names_variable() {
        let err = Config::default().require_gate_url().unwrap_err();
        assert_eq!(err.to_string(), "NORAIDS_GATE_URL is not set");
    }

    #[test]
    fn test_redacted_masks_secrets_only() {
        let config = Config {
            gate_url: Some("http://gate.local".into()),
            gate_api_key: Some("k".into()),
            bot_token: Some("123:abc".into()),
            ..Config::default()
        };
        let shown = config.redacted();
        assert_eq!(shown.gate_api_key.as_deref(), Some(REDACTED));
        assert_eq!(shown.bot_token.as_deref(), Some(REDACTED));
        assert_eq!(shown.gate_url, config.gate_url);
        assert!(!shown.to_toml().unwrap().contains("123:abc"));
    }

    #[test]
    fn test_app_version_suffix() {
        let config = Config {
            app_version_suffix: "-staging".into(),
            ..Config::default()
        };
        assert!(config.app_version().starts_with("noraids "));
        assert!(config.app_version().ends_with("-staging"));
    }
}
