//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::idle::IdleDuration;

/// Leading words of daemon input lines that are commands, not target names.
pub const COMMAND_WORDS: [&str; 3] = ["idle", "forget", "forget-all"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Idle timer defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Duration used for targets that list none, in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: default_duration_ms(),
        }
    }
}

/// One watched target and its idle thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    /// Thresholds in milliseconds. Empty means the default duration only.
    #[serde(default)]
    pub durations_ms: Vec<u64>,
}

impl TargetConfig {
    /// Thresholds to register, falling back to `default_ms`.
    pub fn durations(&self, default_ms: u64) -> Vec<u64> {
        if self.durations_ms.is_empty() {
            vec![default_ms]
        } else {
            self.durations_ms.clone()
        }
    }
}

/// Which raw input signals count as activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_signals")]
    pub signals: Vec<String>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            signals: default_signals(),
        }
    }
}

impl ActivityConfig {
    /// Whether a signal of this kind resets idleness. Case-insensitive.
    pub fn counts(&self, kind: &str) -> bool {
        self.signals.iter().any(|s| s.eq_ignore_ascii_case(kind))
    }
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for the event log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Returns the logs directory path.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

// Default value functions
fn default_duration_ms() -> u64 {
    IdleDuration::DEFAULT.as_millis()
}

fn default_targets() -> Vec<TargetConfig> {
    vec![TargetConfig {
        name: "document".to_string(),
        durations_ms: Vec::new(),
    }]
}

fn default_signals() -> Vec<String> {
    ["mousemove", "keydown", "mousewheel", "dommousescroll", "mousedown"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".idlewatch"))
        .unwrap_or_else(|| PathBuf::from(".idlewatch"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle: IdleConfig::default(),
            targets: default_targets(),
            activity: ActivityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::load_from(config_path, &default_paths())
    }

    /// Load from `config_path`, else the first existing file in `search`, else defaults.
    pub fn load_from(config_path: Option<&Path>, search: &[PathBuf]) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            let mut loaded = None;
            for path in search {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply `IDLEWATCH_*` overrides fetched through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("IDLEWATCH_DEFAULT_DURATION_MS") {
            if let Ok(v) = val.parse() {
                self.idle.default_duration_ms = v;
            }
        }
        if let Some(val) = var("IDLEWATCH_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
        if let Some(val) = var("IDLEWATCH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("IDLEWATCH_LOG_FORMAT") {
            match val.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.idle.default_duration_ms == 0 {
            anyhow::bail!("Default idle duration must be greater than 0");
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                anyhow::bail!("Target names cannot be empty");
            }
            if COMMAND_WORDS.contains(&target.name.as_str()) {
                anyhow::bail!("{:?} is an input command and cannot name a target", target.name);
            }
            if !names.insert(target.name.as_str()) {
                anyhow::bail!("Target {:?} is configured more than once", target.name);
            }
            if target.durations_ms.contains(&0) {
                anyhow::bail!("Idle durations for {:?} must be greater than 0", target.name);
            }
        }
        if self.activity.signals.is_empty() {
            anyhow::bail!("At least one activity signal must be configured");
        }
        Ok(())
    }
}

/// Config files tried in order when no path is given.
fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config/default.toml"),
        dirs::config_dir()
            .map(|d| d.join("idlewatch/config.toml"))
            .unwrap_or_default(),
    ]
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    // Tests that read IDLEWATCH_* from the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_watch_document_for_thirty_seconds() {
        let config = Config::default();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].name, "document");
        assert_eq!(
            config.targets[0].durations(config.idle.default_duration_ms),
            vec![30_000]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_targets_and_policy() {
        let file = write_config(
            r#"
[idle]
default_duration_ms = 45000

[[targets]]
name = "document"
durations_ms = [30000, 60000, 100000]

[[targets]]
name = "my_form"

[activity]
signals = ["KeyDown", "mousemove"]

[logging]
level = "debug"
format = "json"
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].durations(45_000), vec![30_000, 60_000, 100_000]);
        assert_eq!(config.targets[1].durations(45_000), vec![45_000]);
        assert!(config.activity.counts("keydown"));
        assert!(!config.activity.counts("click"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_duration() {
        let file = write_config(
            r#"
[[targets]]
name = "document"
durations_ms = [30000, 0]
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_targets() {
        let mut config = Config::default();
        config.targets.push(config.targets[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_signal_list() {
        let mut config = Config::default();
        config.activity.signals.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_command_words_as_target_names() {
        for word in COMMAND_WORDS {
            let mut config = Config::default();
            config.targets[0].name = word.to_string();
            assert!(config.validate().is_err(), "{word:?} accepted as a target");
        }
    }

    #[test]
    fn overrides_replace_every_field() {
        let vars: HashMap<&str, &str> = [
            ("IDLEWATCH_DEFAULT_DURATION_MS", "45000"),
            ("IDLEWATCH_DATA_DIR", "/var/lib/idlewatch"),
            ("IDLEWATCH_LOG_LEVEL", "debug"),
            ("IDLEWATCH_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.idle.default_duration_ms, 45_000);
        assert_eq!(config.logging.data_dir, PathBuf::from("/var/lib/idlewatch"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let mut config = Config::default();
        config.logging.format = LogFormat::Json;
        config.apply_overrides(|key| match key {
            "IDLEWATCH_DEFAULT_DURATION_MS" => Some("soon".to_string()),
            "IDLEWATCH_LOG_FORMAT" => Some("yaml".to_string()),
            _ => None,
        });

        assert_eq!(config.idle.default_duration_ms, 30_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn load_applies_process_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        let file = write_config("[idle]\ndefault_duration_ms = 10000\n");

        std::env::set_var("IDLEWATCH_DEFAULT_DURATION_MS", "45000");
        let loaded = Config::load_from(Some(file.path()), &[]);
        std::env::remove_var("IDLEWATCH_DEFAULT_DURATION_MS");

        assert_eq!(loaded.unwrap().idle.default_duration_ms, 45_000);
    }

    #[test]
    fn load_searches_paths_in_order() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::write(&first, "[idle]\ndefault_duration_ms = 11000\n").unwrap();
        std::fs::write(&second, "[idle]\ndefault_duration_ms = 22000\n").unwrap();

        let config =
            Config::load_from(None, &[missing.clone(), second.clone(), first.clone()]).unwrap();
        assert_eq!(config.idle.default_duration_ms, 22_000);

        let config = Config::load_from(Some(&first), &[second]).unwrap();
        assert_eq!(config.idle.default_duration_ms, 11_000);

        let config = Config::load_from(None, &[missing]).unwrap();
        assert_eq!(config.idle.default_duration_ms, 30_000);
        assert_eq!(config.targets[0].name, "document");
    }

    #[test]
    fn load_expands_tilde_in_data_dir() {
        let _guard = ENV_LOCK.lock().unwrap();
        let file = write_config("[logging]\ndata_dir = \"~/idle-data\"\n");

        let config = Config::load_from(Some(file.path()), &[]).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.logging.data_dir, home.join("idle-data"));
        }
    }

    #[test]
    fn expand_tilde_leaves_other_paths_alone() {
        assert_eq!(expand_tilde(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        assert_eq!(expand_tilde(Path::new("x/~/y")), PathBuf::from("x/~/y"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x")), home.join("x"));
        }
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[idle\ndefault_duration_ms = ");
        assert!(Config::from_file(file.path()).is_err());
    }
}
