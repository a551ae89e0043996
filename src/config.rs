//! Runtime configuration read from the environment.
//! Defaults keep data under `./database`, next to the working directory.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "database";
/// Primary store compaction cadence (10 minutes).
pub const DEFAULT_COMPACTION_SECS: u64 = 600;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Holds `nodes.db` and the `nodes/` partition directory.
    pub data_dir: PathBuf,
    /// Keep every store in memory; nothing touches the disk.
    pub in_memory: bool,
    /// `None` disables background compaction.
    pub compaction_interval: Option<Duration>,
    /// History length used when a query gives no usable limit.
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            in_memory: false,
            compaction_interval: Some(Duration::from_secs(DEFAULT_COMPACTION_SECS)),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let in_memory = var("IN_MEMORY")
            .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false);

        let compaction_secs = match var("COMPACTION_INTERVAL_SECS") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|_| format!("COMPACTION_INTERVAL_SECS must be a whole number of seconds, got {:?}", s))?,
            None => DEFAULT_COMPACTION_SECS,
        };

        let history_limit = match var("HISTORY_LIMIT_DEFAULT") {
            Some(s) => match s.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(format!("HISTORY_LIMIT_DEFAULT must be a positive integer, got {:?}", s)),
            },
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Config {
            data_dir,
            in_memory,
            compaction_interval: (compaction_secs > 0).then(|| Duration::from_secs(compaction_secs)),
            history_limit,
        })
    }

    /// Configuration for an isolated, memory-only storage without background work.
    pub fn in_memory() -> Self {
        Config {
            in_memory: true,
            compaction_interval: None,
            ..Config::default()
        }
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.data_dir.join("nodes.db")
    }

    pub fn partitions_dir(&self) -> PathBuf {
        self.data_dir.join("nodes")
    }
}
