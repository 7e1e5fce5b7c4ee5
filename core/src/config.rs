//! Configuration management (`config.toml`)
//!
//! Handles loading, saving, validating, and providing defaults for the
//! synchronization settings. Settings are stored in TOML format in the
//! platform-specific config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of steps a snapshot stays restorable after a newer capture.
pub const DEFAULT_ROLLBACK_WINDOW: u32 = 7;

/// Steps per second the host simulation runs at.
pub const TICK_RATE: u32 = 60;

/// Synchronization configuration.
///
/// Contains all tunable settings organized into sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Snapshot window and pool sizing
    #[serde(default)]
    pub rollback: RollbackConfig,
    /// Stall and fast-forward thresholds
    #[serde(default)]
    pub sync: SyncThresholds,
    /// Opponent search settings
    #[serde(default)]
    pub matchmaking: MatchmakingConfig,
    /// Replay persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Background diff settings
    #[serde(default)]
    pub diff: DiffConfig,
}

/// Snapshot retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Steps a snapshot is retained behind the newest capture (default: 7)
    #[serde(default = "default_window")]
    pub window: u32,
    /// Expected snapshot size in bytes (default: 4 MiB)
    #[serde(default = "default_snapshot_size")]
    pub snapshot_size: usize,
    /// Maximum number of snapshot buffers ever allocated (default: 16)
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
}

/// Thresholds driving the per-step controller decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncThresholds {
    /// Consecutive stalled steps before the connection is flagged (default: 420)
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
    /// Remote lead that triggers a soft fast-forward (default: 3)
    #[serde(default = "default_soft_ffw_threshold")]
    pub soft_ffw_threshold: u32,
    /// Remote lead that triggers a hard fast-forward (default: 7)
    #[serde(default = "default_hard_ffw_threshold")]
    pub hard_ffw_threshold: u32,
    /// Steps the local side may run ahead of confirmed remote input (default: 7)
    #[serde(default = "default_prediction_window")]
    pub prediction_window: u32,
}

/// Matchmaking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// Seconds before an unfinished search gives up (default: 30)
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

/// What a full write queue does with a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for room
    #[default]
    Block,
    /// Oldest queued message is discarded
    DropOldest,
}

/// Replay persistence configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether replays are written at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Replay directory override (default: `<data_dir>/replays`)
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,
    /// Maximum queued writes (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Behavior when the queue is full (default: block)
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Background diff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Blocking worker threads (default: 2)
    #[serde(default = "default_diff_workers")]
    pub workers: usize,
    /// Steps between persisted checkpoint diffs, 0 disables (default: 60)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

fn default_window() -> u32 {
    DEFAULT_ROLLBACK_WINDOW
}
fn default_snapshot_size() -> usize {
    4 * 1024 * 1024
}
fn default_max_pool_size() -> usize {
    16
}

fn default_stall_threshold() -> u32 {
    7 * TICK_RATE
}
fn default_soft_ffw_threshold() -> u32 {
    3
}
fn default_hard_ffw_threshold() -> u32 {
    7
}
fn default_prediction_window() -> u32 {
    DEFAULT_ROLLBACK_WINDOW
}

fn default_search_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    256
}

fn default_diff_workers() -> usize {
    2
}
fn default_checkpoint_interval() -> u32 {
    60
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            snapshot_size: default_snapshot_size(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
            soft_ffw_threshold: default_soft_ffw_threshold(),
            hard_ffw_threshold: default_hard_ffw_threshold(),
            prediction_window: default_prediction_window(),
        }
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl MatchmakingConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            replay_dir: None,
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl PersistenceConfig {
    /// Replay directory: the override if set, else `<data_dir>/replays`.
    pub fn resolved_replay_dir(&self) -> Option<PathBuf> {
        self.replay_dir
            .clone()
            .or_else(|| data_dir().map(|dir| dir.join("replays")))
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            workers: default_diff_workers(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Invalid combinations of settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("rollback.window must be at least 1")]
    ZeroWindow,
    #[error("rollback.max_pool_size ({pool}) cannot hold rollback.window + 1 ({window} + 1) snapshots")]
    PoolSmallerThanWindow { pool: usize, window: u32 },
    #[error("sync.soft_ffw_threshold must be at least 1")]
    ZeroSoftFfwThreshold,
    #[error("sync.hard_ffw_threshold ({hard}) is below sync.soft_ffw_threshold ({soft})")]
    FfwThresholdOrder { soft: u32, hard: u32 },
    #[error("persistence.queue_capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("diff.workers must be at least 1")]
    ZeroDiffWorkers,
}

impl SyncConfig {
    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        // Every step of the window plus the newest capture must fit
        if self.rollback.max_pool_size < self.rollback.window as usize + 1 {
            return Err(ConfigError::PoolSmallerThanWindow {
                pool: self.rollback.max_pool_size,
                window: self.rollback.window,
            });
        }
        if self.sync.soft_ffw_threshold == 0 {
            return Err(ConfigError::ZeroSoftFfwThreshold);
        }
        if self.sync.hard_ffw_threshold < self.sync.soft_ffw_threshold {
            return Err(ConfigError::FfwThresholdOrder {
                soft: self.sync.soft_ffw_threshold,
                hard: self.sync.hard_ffw_threshold,
            });
        }
        if self.persistence.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.diff.workers == 0 {
            return Err(ConfigError::ZeroDiffWorkers);
        }
        Ok(())
    }

    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("io.rollsync", "", "Rollsync")
}

/// Returns the platform-specific configuration directory.
///
/// On Linux: `~/.config/Rollsync`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory (replays live here).
///
/// On Linux: `~/.local/share/Rollsync`
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Path of `config.toml` in the config directory.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Loads the configuration from disk.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> SyncConfig {
    config_path()
        .map(|path| load_from(&path))
        .unwrap_or_default()
}

/// Loads the configuration from a specific file, falling back to defaults.
pub fn load_from(path: &Path) -> SyncConfig {
    let Ok(content) = std::fs::read_to_string(path) else {
        return SyncConfig::default();
    };
    match SyncConfig::from_toml(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            SyncConfig::default()
        }
    }
}

/// Saves the configuration to the platform config directory.
///
/// Creates the directory if it doesn't exist.
pub fn save(config: &SyncConfig) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_to(config, &path),
        None => Ok(()),
    }
}

/// Saves the configuration to a specific file as pretty TOML.
pub fn save_to(config: &SyncConfig, path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}
