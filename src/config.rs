//! Configuration Module - User preferences from config.toml in the platform config dir
//!
//! Supports:
//! - Location of the flux tool and per-invocation timeout
//! - Drive and format candidate lists (order matters)
//! - Capture revolutions and scoring constants
//! - Dump directory and default image name

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{
    DriveId, FormatId, PipelineSettings, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_CRC_PENALTY, DEFAULT_DRIVES, DEFAULT_FORMATS, DEFAULT_REVOLUTIONS,
};
use crate::tool::null_device;

/// Flux Drill Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// External tool settings
    pub tool: ToolConfig,
    /// Drive probing and flux capture
    pub capture: CaptureConfig,
    /// Format scoring
    pub scoring: ScoringConfig,
    /// Where images go
    pub output: OutputConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// External tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Tool executable (name on PATH or full path)
    pub program: PathBuf,
    /// Kill an invocation after this many seconds (0 = never)
    pub timeout_secs: u64,
    /// Where probe reads are written
    pub discard_target: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(if cfg!(windows) { "gw.exe" } else { "gw" }),
            timeout_secs: 0,
            discard_target: null_device(),
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Drive probing and flux capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Drive candidates, probed in order
    pub drives: Vec<String>,
    /// Revolutions per track to capture
    pub revolutions: u32,
    /// Flux file name inside the dump directory
    pub flux_file: String,
    /// Stop the run when the flux read itself fails
    pub require_clean_capture: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            drives: DEFAULT_DRIVES.iter().map(|s| s.to_string()).collect(),
            revolutions: DEFAULT_REVOLUTIONS,
            flux_file: "auto.scp".to_string(),
            require_clean_capture: true,
        }
    }
}

/// Format scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Format candidates, scored in order (earlier wins ties)
    pub formats: Vec<String>,
    /// Score deduction per CRC error
    pub crc_penalty: f64,
    /// Raw score that ends the search early
    pub confidence_threshold: f64,
    /// Scratch image name inside the dump directory
    pub temp_image: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            formats: DEFAULT_FORMATS.iter().map(|s| s.to_string()).collect(),
            crc_penalty: DEFAULT_CRC_PENALTY,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            temp_image: "temp.img".to_string(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for flux captures and images
    pub dump_dir: PathBuf,
    /// Image name offered when none is given
    pub default_filename: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dump_dir: PathBuf::from("dumps"),
            default_filename: "disk.img".to_string(),
        }
    }
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_or_default(&Self::default_path())
    }

    /// Load config from `path`, falling back to defaults if it is missing
    /// or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring config, using defaults: {:#}", e);
            Self::default()
        })
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "flux-drill", "flux-drill")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".flux-drill")
                    .join("config.toml")
            })
    }

    /// Create default config file if it doesn't exist
    pub fn ensure_exists() -> Result<PathBuf> {
        let path = Self::default_path();
        if !path.exists() {
            Config::default().save_to(&path)?;
            tracing::info!("Created default config at {}", path.display());
        }
        Ok(path)
    }

    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        check_candidates("capture.drives", &self.capture.drives)?;
        check_candidates("scoring.formats", &self.scoring.formats)?;

        if self.capture.revolutions == 0 {
            bail!("capture.revolutions must be at least 1");
        }
        let threshold = self.scoring.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            bail!("scoring.confidence_threshold must be in (0, 1], got {}", threshold);
        }
        let penalty = self.scoring.crc_penalty;
        if !penalty.is_finite() || penalty < 0.0 {
            bail!("scoring.crc_penalty must be a non-negative number, got {}", penalty);
        }
        for (key, name) in [
            ("capture.flux_file", &self.capture.flux_file),
            ("scoring.temp_image", &self.scoring.temp_image),
        ] {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                bail!("{} must be a plain file name, got '{}'", key, name);
            }
        }
        if self.capture.flux_file == self.scoring.temp_image {
            bail!("capture.flux_file and scoring.temp_image must differ");
        }
        Ok(())
    }

    /// Settings for a pipeline run
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            drives: self.capture.drives.iter().map(DriveId::new).collect(),
            formats: self.scoring.formats.iter().map(FormatId::new).collect(),
            dump_dir: self.output.dump_dir.clone(),
            flux_file: self.capture.flux_file.clone(),
            temp_image: self.scoring.temp_image.clone(),
            discard_target: self.tool.discard_target.clone(),
            revolutions: self.capture.revolutions,
            require_clean_capture: self.capture.require_clean_capture,
            crc_penalty: self.scoring.crc_penalty,
            confidence_threshold: self.scoring.confidence_threshold,
        }
    }
}

fn check_candidates(key: &str, list: &[String]) -> Result<()> {
    if list.is_empty() {
        bail!("{} must list at least one candidate", key);
    }
    let mut seen = HashSet::new();
    for item in list {
        if item.trim().is_empty() {
            bail!("{} contains an empty entry", key);
        }
        if !seen.insert(item) {
            bail!("{} lists '{}' more than once", key, item);
        }
    }
    Ok(())
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# Flux Drill Configuration
# Location: see `flux-drill config` (Linux: ~/.config/flux-drill/config.toml)

[general]
# Log level: trace, debug, info, warn, error
log_level = "info"

[tool]
# Flux tool executable, on PATH or as a full path
program = "gw"

# Kill any single tool invocation after this many seconds (0 = never)
timeout_secs = 0

# Where zero-revolution probe reads are written
# discard_target = "/dev/null"

[capture]
# Drive selectors tried in order; the first that answers is used
drives = ["A", "B", "0", "1", "2"]

# Revolutions per track to capture
revolutions = 5

# Flux capture file, inside the dump directory
flux_file = "auto.scp"

# Stop when the flux read fails instead of scoring whatever was captured
require_clean_capture = true

[scoring]
# Formats tried in order; on equal scores the earlier one wins
formats = ["ibm.1440", "ibm.720", "ibm.1200", "ibm.360", "atarist.720", "amiga.amigados"]

# Score deducted per CRC error
crc_penalty = 0.01

# found/total ratio that accepts a format immediately
confidence_threshold = 0.98

# Scratch image overwritten for every format tried
temp_image = "temp.img"

[output]
# Directory for the flux capture and images
dump_dir = "dumps"

# Image name offered when none is given
default_filename = "disk.img"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.drives, vec!["A", "B", "0", "1", "2"]);
        assert_eq!(config.capture.revolutions, 5);
        assert_eq!(config.scoring.crc_penalty, 0.01);
        assert_eq!(config.scoring.confidence_threshold, 0.98);
        assert_eq!(config.tool.timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_config.toml");

        let mut config = Config::default();
        config.scoring.formats = vec!["amiga.amigados".to_string()];
        config.tool.timeout_secs = 90;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.scoring.formats, vec!["amiga.amigados"]);
        assert_eq!(loaded.tool.timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_load_or_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_or_default(&path).capture.revolutions, 5);

        fs::write(&path, "[capture]\nrevolutions = 3\n").unwrap();
        assert_eq!(Config::load_or_default(&path).capture.revolutions, 3);

        fs::write(&path, "[capture\nrevolutions = three").unwrap();
        assert!(Config::load_from(&path).is_err());
        assert_eq!(Config::load_or_default(&path).capture.revolutions, 5);
    }

    #[test]
    fn test_parse_sample_config() {
        let sample = generate_sample_config();
        let config: Config = toml::from_str(&sample).unwrap();
        config.validate().unwrap();
        assert_eq!(config.scoring.formats.len(), 6);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[capture]\nrevolutions = 3\n").unwrap();
        assert_eq!(config.capture.revolutions, 3);
        assert_eq!(config.capture.drives.len(), 5);
        assert_eq!(config.output.default_filename, "disk.img");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.scoring.formats.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.drives.push("A".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.crc_penalty = -0.01;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scoring.temp_image = "auto.scp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_settings_follow_config() {
        let mut config = Config::default();
        config.capture.drives = vec!["1".to_string(), "0".to_string()];
        config.output.dump_dir = PathBuf::from("/srv/dumps");

        let settings = config.pipeline_settings();
        assert_eq!(settings.drives, vec![DriveId::from("1"), DriveId::from("0")]);
        assert_eq!(settings.flux_path(), Path::new("/srv/dumps").join("auto.scp"));
    }
}
