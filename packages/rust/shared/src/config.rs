//! Application configuration for PageWatch.
//!
//! User config lives at `~/.pagewatch/pagewatch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PageWatchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagewatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagewatch";

// ---------------------------------------------------------------------------
// Config structs (matching pagewatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Content retrieval settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Change-scoring policy settings.
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the snapshot database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Absolute run deadline, in seconds from run start.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Maximum delivery attempts for a fetch message before the run fails.
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            run_timeout_secs: default_run_timeout_secs(),
            max_fetch_attempts: default_max_fetch_attempts(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.pagewatch/data".into()
}
fn default_run_timeout_secs() -> u64 {
    300
}
fn default_max_fetch_attempts() -> u32 {
    3
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum HTTP redirects to follow.
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: u32,

    /// Override for the User-Agent header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            redirect_limit: default_redirect_limit(),
            user_agent: None,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}
fn default_redirect_limit() -> u32 {
    5
}

/// `[scoring]` section. One authoritative policy per deployment: the
/// weighted multi-factor formula plus its label threshold table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of full-text character similarity.
    #[serde(default = "default_char_weight")]
    pub char_weight: f64,
    /// Weight of word-set Jaccard similarity.
    #[serde(default = "default_word_weight")]
    pub word_weight: f64,
    /// Weight of title similarity.
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    /// Weight of description similarity.
    #[serde(default = "default_description_weight")]
    pub description_weight: f64,
    /// Weight of link-set Jaccard similarity.
    #[serde(default = "default_link_weight")]
    pub link_weight: f64,

    /// Character count above which edit distance switches to window sampling.
    #[serde(default = "default_exact_threshold")]
    pub exact_threshold: usize,
    /// Number of aligned sample windows for large texts.
    #[serde(default = "default_sample_windows")]
    pub sample_windows: usize,
    /// Characters per sample window.
    #[serde(default = "default_window_len")]
    pub window_len: usize,

    /// Label thresholds: score ≤ negligible → "negligible", and so on;
    /// above `high` → "significant".
    #[serde(default)]
    pub thresholds: LabelThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            char_weight: default_char_weight(),
            word_weight: default_word_weight(),
            title_weight: default_title_weight(),
            description_weight: default_description_weight(),
            link_weight: default_link_weight(),
            exact_threshold: default_exact_threshold(),
            sample_windows: default_sample_windows(),
            window_len: default_window_len(),
            thresholds: LabelThresholds::default(),
        }
    }
}

fn default_char_weight() -> f64 {
    0.5
}
fn default_word_weight() -> f64 {
    0.2
}
fn default_title_weight() -> f64 {
    0.15
}
fn default_description_weight() -> f64 {
    0.10
}
fn default_link_weight() -> f64 {
    0.05
}
fn default_exact_threshold() -> usize {
    512
}
fn default_sample_windows() -> usize {
    8
}
fn default_window_len() -> usize {
    256
}

/// Upper score bound for each label bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelThresholds {
    #[serde(default = "default_negligible")]
    pub negligible: f64,
    #[serde(default = "default_low")]
    pub low: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_high")]
    pub high: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            negligible: default_negligible(),
            low: default_low(),
            medium: default_medium(),
            high: default_high(),
        }
    }
}

fn default_negligible() -> f64 {
    0.05
}
fn default_low() -> f64 {
    0.15
}
fn default_medium() -> f64 {
    0.35
}
fn default_high() -> f64 {
    0.70
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagewatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PageWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagewatch/pagewatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PageWatchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PageWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_scoring(&config.scoring)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PageWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PageWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PageWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject weight tables that cannot produce a score in [0, 1] and
/// threshold tables that are not ascending.
pub fn validate_scoring(scoring: &ScoringConfig) -> Result<()> {
    let sum = scoring.char_weight
        + scoring.word_weight
        + scoring.title_weight
        + scoring.description_weight
        + scoring.link_weight;
    if (sum - 1.0).abs() > 1e-6 {
        return Err(PageWatchError::config(format!(
            "scoring weights must sum to 1.0, got {sum}"
        )));
    }

    let t = &scoring.thresholds;
    if !(t.negligible < t.low && t.low < t.medium && t.medium < t.high) {
        return Err(PageWatchError::config(
            "scoring thresholds must be strictly ascending",
        ));
    }

    if scoring.sample_windows == 0 || scoring.window_len == 0 {
        return Err(PageWatchError::config(
            "sample_windows and window_len must be positive",
        ));
    }

    Ok(())
}
