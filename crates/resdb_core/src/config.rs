//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Lower bound of the compaction garbage ratio.
pub const MIN_GARBAGE_RATIO: f64 = 0.10;

/// Upper bound of the compaction garbage ratio.
pub const MAX_GARBAGE_RATIO: f64 = 0.90;

/// Prefix of the environment variables read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "RESDB_";

/// Configuration for a resource database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the directory and data file generations.
    pub base_path: PathBuf,

    /// File name prefix of directory generations.
    pub directory_prefix: String,

    /// File name prefix of data log generations.
    pub data_prefix: String,

    /// Period of the background flush timer.
    #[serde(with = "millis")]
    pub flush_period: Duration,

    /// Log size below which compaction never runs.
    pub compaction_min_size: u64,

    /// Fraction of the log that must be garbage before compaction runs.
    pub garbage_ratio: f64,

    /// Emit per-entry debug logging.
    pub debug: bool,

    /// Persist the tree at all; when false the engine is a plain in-memory tree.
    pub persistence_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/persistence/"),
            directory_prefix: "resMap".to_string(),
            data_prefix: "resData".to_string(),
            flush_period: Duration::from_secs(10),
            compaction_min_size: 1024 * 1024, // 1 MiB
            garbage_ratio: 0.75,
            debug: false,
            persistence_enabled: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store directory.
    #[must_use]
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }

    /// Sets the directory generation prefix.
    #[must_use]
    pub fn directory_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.directory_prefix = prefix.into();
        self
    }

    /// Sets the data log generation prefix.
    #[must_use]
    pub fn data_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.data_prefix = prefix.into();
        self
    }

    /// Sets the flush timer period.
    #[must_use]
    pub const fn flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Sets the minimum log size for compaction.
    #[must_use]
    pub const fn compaction_min_size(mut self, size: u64) -> Self {
        self.compaction_min_size = size;
        self
    }

    /// Sets the garbage ratio, clamped to
    /// [`MIN_GARBAGE_RATIO`]..=[`MAX_GARBAGE_RATIO`].
    #[must_use]
    pub fn garbage_ratio(mut self, ratio: f64) -> Self {
        self.garbage_ratio = clamp_ratio(ratio);
        self
    }

    /// Enables per-entry debug logging.
    #[must_use]
    pub const fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }

    /// Enables or disables persistence.
    #[must_use]
    pub const fn persistence_enabled(mut self, value: bool) -> Self {
        self.persistence_enabled = value;
        self
    }

    /// Garbage ratio as used by the compactor, clamped even if the field
    /// was set directly or deserialized.
    #[must_use]
    pub fn effective_garbage_ratio(&self) -> f64 {
        clamp_ratio(self.garbage_ratio)
    }

    /// Defaults overridden by `RESDB_*` environment variables.
    ///
    /// Recognized: `RESDB_PATH`, `RESDB_DIRECTORY_PREFIX`, `RESDB_DATA_PREFIX`,
    /// `RESDB_FLUSH_PERIOD_MS`, `RESDB_COMPACTION_MIN_SIZE`,
    /// `RESDB_GARBAGE_RATIO`, `RESDB_DEBUG`, `RESDB_PERSISTENCE`.
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(path) = var("PATH") {
            config.base_path = PathBuf::from(path);
        }
        if let Some(prefix) = var("DIRECTORY_PREFIX") {
            config.directory_prefix = prefix;
        }
        if let Some(prefix) = var("DATA_PREFIX") {
            config.data_prefix = prefix;
        }
        if let Some(ms) = parse_var::<u64>("FLUSH_PERIOD_MS", var("FLUSH_PERIOD_MS")) {
            config.flush_period = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var("COMPACTION_MIN_SIZE", var("COMPACTION_MIN_SIZE")) {
            config.compaction_min_size = size;
        }
        if let Some(ratio) = parse_var::<f64>("GARBAGE_RATIO", var("GARBAGE_RATIO")) {
            config.garbage_ratio = clamp_ratio(ratio);
        }
        if let Some(debug) = parse_var("DEBUG", var("DEBUG")) {
            config.debug = debug;
        }
        if let Some(enabled) = parse_var("PERSISTENCE", var("PERSISTENCE")) {
            config.persistence_enabled = enabled;
        }
        config
    }
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return Config::default().garbage_ratio;
    }
    ratio.clamp(MIN_GARBAGE_RATIO, MAX_GARBAGE_RATIO)
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.base_path, PathBuf::from("./data/persistence/"));
        assert_eq!(config.directory_prefix, "resMap");
        assert_eq!(config.data_prefix, "resData");
        assert_eq!(config.flush_period, Duration::from_secs(10));
        assert_eq!(config.compaction_min_size, 1024 * 1024);
        assert!((config.garbage_ratio - 0.75).abs() < f64::EPSILON);
        assert!(config.persistence_enabled);
        assert!(!config.debug);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .base_path("/tmp/store")
            .flush_period(Duration::from_millis(50))
            .compaction_min_size(0)
            .debug(true);

        assert_eq!(config.base_path, PathBuf::from("/tmp/store"));
        assert_eq!(config.flush_period, Duration::from_millis(50));
        assert_eq!(config.compaction_min_size, 0);
        assert!(config.debug);
    }

    #[test]
    fn garbage_ratio_is_clamped() {
        assert!((Config::new().garbage_ratio(0.01).garbage_ratio - 0.10).abs() < f64::EPSILON);
        assert!((Config::new().garbage_ratio(2.0).garbage_ratio - 0.90).abs() < f64::EPSILON);

        let mut config = Config::new();
        config.garbage_ratio = 5.0;
        assert!((config.effective_garbage_ratio() - 0.90).abs() < f64::EPSILON);
    }

    #[test]
    fn environment_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("RESDB_PATH", "/var/lib/resdb"),
            ("RESDB_FLUSH_PERIOD_MS", "250"),
            ("RESDB_GARBAGE_RATIO", "0.5"),
            ("RESDB_PERSISTENCE", "false"),
            ("RESDB_COMPACTION_MIN_SIZE", "not a number"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.base_path, PathBuf::from("/var/lib/resdb"));
        assert_eq!(config.flush_period, Duration::from_millis(250));
        assert!((config.garbage_ratio - 0.5).abs() < f64::EPSILON);
        assert!(!config.persistence_enabled);
        assert_eq!(config.compaction_min_size, 1024 * 1024);
    }

    #[test]
    fn serde_uses_millis_and_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"flush_period": 1500, "data_prefix": "log"}"#).unwrap();
        assert_eq!(config.flush_period, Duration::from_millis(1500));
        assert_eq!(config.data_prefix, "log");
        assert_eq!(config.directory_prefix, "resMap");

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["flush_period"], 1500);
    }
}
