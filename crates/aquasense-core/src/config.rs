//! Configuration resolution for AquaSense.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/aquasense/settings.json`)
//! 3. Project config (.aquasense/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete AquaSense configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

/// Feed action performed by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FeederConfig {
    /// Record the feeding without driving hardware.
    #[default]
    Log,
    /// Spawn `program` with `args` followed by uid, schedule id and grams.
    Command {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_feeder_timeout")]
        timeout_secs: u64,
    },
}

const fn default_feeder_timeout() -> u64 {
    30
}

/// Background runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_secs: u64,
    /// Device owners whose ponds this runtime serves.
    pub owners: Vec<String>,
    /// Max documents fetched per query.
    pub batch_size: u32,
    pub max_feed_attempts: u32,
    /// In-progress schedules older than this are considered interrupted.
    pub stale_in_progress_secs: i64,
    /// Pond local time offset from UTC, used for report buckets.
    pub utc_offset_minutes: i32,
    pub feeder: FeederConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            owners: Vec::new(),
            batch_size: 200,
            max_feed_attempts: 3,
            stale_in_progress_secs: 15 * 60,
            utc_offset_minutes: 0,
            feeder: FeederConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub const fn utc_offset_secs(&self) -> i32 {
        self.utc_offset_minutes * 60
    }
}

/// Dashboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardConfig {
    /// Fallback refresh period for live views.
    pub refresh_interval_secs: u64,
    pub default_limit: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            default_limit: 20,
        }
    }
}

/// Access rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// TOML rule file replacing the built-in rules.
    pub rules_path: Option<PathBuf>,
}

/// Configuration source priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    Global = 1,
    Project = 2,
    Environment = 3,
    Cli = 4,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        layers.push(global_path);
    }
    if let Some(dir) = project_dir {
        let project_path = dir.join(".aquasense").join("settings.json");
        if project_path.exists() {
            layers.push(project_path);
        }
    }

    let mut config = load_layers(&layers)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Defaults with each file laid over them in order. A file only overrides
/// the keys it sets.
fn load_layers(files: &[PathBuf]) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for file in files {
        merge_config(&mut merged, load_config_file(file)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aquasense"))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("settings.json"))
}

/// Default database path shared by the runtime and the dashboards.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("aquasense.db"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    // Reject bad types here so the error names the file.
    Config::deserialize(&value).map_err(|e| {
        Error::Config(format!("Invalid config file {}: {}", path.display(), e))
    })?;
    Ok(value)
}

fn merge_config(base: &mut Value, mut overlay: Value) {
    let runtime = overlay.get_mut("runtime").and_then(Value::as_object_mut);
    let (owners, feeder) = match runtime {
        Some(runtime) => (runtime.remove("owners"), runtime.remove("feeder")),
        None => (None, None),
    };

    // Owners accumulate so a project file can add ponds to a global list.
    if let (Some(Value::Array(extra)), Some(Value::Array(owners))) =
        (owners, base.pointer_mut("/runtime/owners"))
    {
        for owner in extra {
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
    }
    // The feeder is one tagged value; fields of two kinds never mix.
    if let (Some(feeder), Some(slot)) = (feeder, base.pointer_mut("/runtime/feeder")) {
        *slot = feeder;
    }

    merge_values(base, overlay);
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("AQUASENSE_DB_PATH") {
        config.store.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = var("AQUASENSE_LOG_LEVEL") {
        config.store.log_level = val;
    }
    if let Some(n) = var("AQUASENSE_TICK_SECS").and_then(|v| v.parse().ok()) {
        config.runtime.tick_interval_secs = n;
    }
    if let Some(val) = var("AQUASENSE_OWNERS") {
        config.runtime.owners = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(n) = var("AQUASENSE_UTC_OFFSET_MINUTES").and_then(|v| v.parse().ok()) {
        config.runtime.utc_offset_minutes = n;
    }
    if let Some(val) = var("AQUASENSE_RULES_PATH") {
        config.access.rules_path = Some(PathBuf::from(val));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_ticks_every_minute() {
        let config = Config::default();
        assert_eq!(config.runtime.tick_interval_secs, 60);
        assert_eq!(config.runtime.feeder, FeederConfig::Log);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"runtime": {"owners": ["u1"], "utc_offset_minutes": 480}}"#)
                .unwrap();
        assert_eq!(config.runtime.owners, vec!["u1"]);
        assert_eq!(config.runtime.utc_offset_secs(), 480 * 60);
        assert_eq!(config.runtime.max_feed_attempts, 3);
        assert_eq!(config.dashboard.default_limit, 20);
    }

    #[test]
    fn command_feeder_parses() {
        let config: Config = serde_json::from_str(
            r#"{"runtime": {"feeder": {"kind": "command", "program": "/usr/bin/feed"}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.runtime.feeder,
            FeederConfig::Command {
                program: PathBuf::from("/usr/bin/feed"),
                args: Vec::new(),
                timeout_secs: 30,
            }
        );
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("AQUASENSE_OWNERS", "pond-a, pond-b,"),
            ("AQUASENSE_TICK_SECS", "5"),
            ("AQUASENSE_TICK_SECS_IGNORED", "x"),
            ("AQUASENSE_DB_PATH", "/tmp/a.db"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(ToString::to_string));
        assert_eq!(config.runtime.owners, vec!["pond-a", "pond-b"]);
        assert_eq!(config.runtime.tick_interval_secs, 5);
        assert_eq!(config.store.database_path, Some(PathBuf::from("/tmp/a.db")));
    }

    fn write_settings(dir: &Path, body: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn project_file_merges_over_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let project = write_settings(
            &dir.path().join(".aquasense"),
            r#"{"dashboard": {"refresh_interval_secs": 5}, "runtime": {"owners": ["u9"]}}"#,
        );

        let config = load_layers(&[project]).unwrap();
        assert_eq!(config.dashboard.refresh_interval_secs, 5);
        assert_eq!(config.dashboard.default_limit, 20);
        assert_eq!(config.runtime.owners, vec!["u9"]);
    }

    #[test]
    fn later_layer_overrides_only_what_it_sets() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = write_settings(
            &dir.path().join("global"),
            r#"{
                "store": {"log_level": "debug"},
                "runtime": {
                    "tick_interval_secs": 5,
                    "max_feed_attempts": 9,
                    "owners": ["pond-a"],
                    "feeder": {"kind": "command", "program": "/usr/bin/feed", "args": ["-v"]}
                }
            }"#,
        );
        let project = write_settings(
            &dir.path().join("project"),
            r#"{"dashboard": {"default_limit": 50}, "runtime": {"owners": ["pond-b", "pond-a"]}}"#,
        );

        let config = load_layers(&[global, project]).unwrap();
        assert_eq!(config.runtime.tick_interval_secs, 5);
        assert_eq!(config.runtime.max_feed_attempts, 9);
        assert_eq!(config.runtime.owners, vec!["pond-a", "pond-b"]);
        assert_eq!(config.store.log_level, "debug");
        assert_eq!(config.dashboard.default_limit, 50);
        assert_eq!(config.dashboard.refresh_interval_secs, 30);
        assert!(matches!(config.runtime.feeder, FeederConfig::Command { .. }));
    }

    #[test]
    fn feeder_is_replaced_whole() {
        let dir = tempfile::TempDir::new().unwrap();
        let global = write_settings(
            &dir.path().join("global"),
            r#"{"runtime": {"feeder": {"kind": "command", "program": "/usr/bin/feed"}}}"#,
        );
        let project = write_settings(
            &dir.path().join("project"),
            r#"{"runtime": {"feeder": {"kind": "log"}}}"#,
        );
        let config = load_layers(&[global, project]).unwrap();
        assert_eq!(config.runtime.feeder, FeederConfig::Log);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let broken = write_settings(dir.path(), "{not json");
        assert!(matches!(load_config_file(&broken), Err(Error::Config(_))));

        let mistyped = write_settings(
            &dir.path().join("typed"),
            r#"{"runtime": {"tick_interval_secs": "soon"}}"#,
        );
        assert!(matches!(load_config_file(&mistyped), Err(Error::Config(_))));
    }
}
