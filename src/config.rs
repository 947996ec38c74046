//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating the pacing
//! configuration: controller tuning, gate margin, tier policy overrides and
//! logging options.

use crate::controller::Sensitivity;
use crate::error::ConfigError;
use crate::tier::{Tier, TierPolicyTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Directory name used under the platform config/data directories.
pub const APP_DIR: &str = "render-pacer";

/// Numeric tuning of the feedback controller.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ControllerTuning {
    /// Exponential smoothing factor for the display FPS readout.
    pub smoothing_alpha: f64,
    /// A tick is "slow" when its instantaneous FPS is below this fraction
    /// of the effective target.
    pub slow_ratio: f64,
    /// Smallest decrease applied to the effective target, in FPS.
    pub min_decrease_step: f64,
    /// Fraction of the gap between the effective target and the measured
    /// rate removed by one decrease.
    pub decrease_gain: f64,
    /// Recovery step, in FPS.
    pub increase_step: f64,
    /// Deltas above this are clamped (backgrounded tab, debugger pause).
    pub max_delta_ms: f64,
    /// Deltas below this are clamped.
    pub min_delta_ms: f64,
}

impl Default for ControllerTuning {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.15,
            slow_ratio: 0.85,
            min_decrease_step: 2.0,
            decrease_gain: 0.5,
            increase_step: 5.0,
            max_delta_ms: 250.0,
            min_delta_ms: 1.0,
        }
    }
}

/// Logging options consumed by the binary.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON on stderr instead of the human-readable format.
    pub json_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_stderr: false,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub sensitivity: Sensitivity,
    pub controller: ControllerTuning,
    /// Fraction of the target frame time the pull gate accepts as "enough".
    pub gate_margin: f64,
    pub tiers: TierPolicyTable,
    /// Forces the reduced-motion signal, overriding the environment probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduced_motion: Option<bool>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::Balanced,
            controller: ControllerTuning::default(),
            gate_margin: 0.9,
            tiers: TierPolicyTable::default(),
            reduced_motion: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn in_unit_interval(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

impl Config {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;

        if !in_unit_interval(c.smoothing_alpha) {
            return Err(ConfigError::ValidationError(format!(
                "smoothing_alpha ({}) must be in (0, 1]",
                c.smoothing_alpha
            )));
        }

        if !in_unit_interval(c.slow_ratio) {
            return Err(ConfigError::ValidationError(format!(
                "slow_ratio ({}) must be in (0, 1]",
                c.slow_ratio
            )));
        }

        if !in_unit_interval(c.decrease_gain) {
            return Err(ConfigError::ValidationError(format!(
                "decrease_gain ({}) must be in (0, 1]",
                c.decrease_gain
            )));
        }

        if !(c.min_decrease_step > 0.0 && c.increase_step > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "min_decrease_step ({}) and increase_step ({}) must be positive",
                c.min_decrease_step, c.increase_step
            )));
        }

        if !(c.min_delta_ms > 0.0) || c.max_delta_ms < c.min_delta_ms {
            return Err(ConfigError::ValidationError(format!(
                "delta bounds [{}, {}] ms must satisfy 0 < min_delta_ms <= max_delta_ms",
                c.min_delta_ms, c.max_delta_ms
            )));
        }

        if !in_unit_interval(self.gate_margin) {
            return Err(ConfigError::ValidationError(format!(
                "gate_margin ({}) must be in (0, 1]",
                self.gate_margin
            )));
        }

        for tier in Tier::ALL {
            let policy = self.tiers.policy(tier);
            if !(policy.floor_fps > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{} tier floor ({}) must be positive",
                    tier, policy.floor_fps
                )));
            }
            if policy.floor_fps > policy.target_fps {
                return Err(ConfigError::ValidationError(format!(
                    "{} tier floor ({}) cannot be greater than its target ({})",
                    tier, policy.floor_fps, policy.target_fps
                )));
            }
        }

        if self.tiers.low.target_fps > self.tiers.medium.target_fps
            || self.tiers.medium.target_fps > self.tiers.high.target_fps
        {
            return Err(ConfigError::ValidationError(
                "tier targets must be ordered low <= medium <= high".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<Config>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Load configuration from a file that must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_or_default(path)
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*config)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| Config::default())
    }

    /// Update configuration with validation.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;

        let mut current = self.config.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;

        *current = config;

        // Release lock before saving
        drop(current);

        self.save()
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (`<config dir>/render-pacer/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("config.json")
    }
}

// Sensitivity is stored as a lowercase string
impl Serialize for Sensitivity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sensitivity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "conservative" => Ok(Sensitivity::Conservative),
            "balanced" => Ok(Sensitivity::Balanced),
            "aggressive" => Ok(Sensitivity::Aggressive),
            _ => Err(serde::de::Error::custom(format!(
                "invalid sensitivity: {}, expected one of: conservative, balanced, aggressive",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierPolicy;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sensitivity, Sensitivity::Balanced);
        assert_eq!(config.gate_margin, 0.9);
        assert_eq!(config.controller.slow_ratio, 0.85);
        assert_eq!(config.tiers, TierPolicyTable::default());
        assert!(config.reduced_motion.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_manager_load_nonexistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");

        let manager = ConfigManager::load_or_default(&path).unwrap();
        assert_eq!(manager.get(), Config::default());
    }

    #[test]
    fn test_config_manager_load_requires_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let result = ConfigManager::load(&path);
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_config_manager_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let manager = ConfigManager::load_or_default(&path).unwrap();
        let mut config = manager.get();
        config.sensitivity = Sensitivity::Aggressive;
        config.gate_margin = 0.8;
        config.reduced_motion = Some(true);
        config.tiers.high = TierPolicy::new(120.0, 40.0);
        manager.update(config.clone()).unwrap();

        let manager2 = ConfigManager::load_or_default(&path).unwrap();
        assert_eq!(manager2.get(), config);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_update_rejects_invalid_without_persisting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let manager = ConfigManager::load_or_default(&path).unwrap();
        let mut config = manager.get();
        config.gate_margin = 1.5;

        assert!(manager.update(config).is_err());
        assert!(!path.exists());
        assert_eq!(manager.get(), Config::default());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"sensitivity":"conservative","controller":{"increase_step":3.0}}"#;
        let parsed: Config = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.sensitivity, Sensitivity::Conservative);
        assert_eq!(parsed.controller.increase_step, 3.0);
        assert_eq!(parsed.controller.slow_ratio, 0.85);
        assert_eq!(parsed.tiers, TierPolicyTable::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"gate_margin": 0.0}"#).unwrap();

        let result = ConfigManager::load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        fs::write(&path, "not json").unwrap();
        let result = ConfigManager::load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_floor_above_target() {
        let mut config = Config::default();
        config.tiers.medium = TierPolicy::new(45.0, 50.0);

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("medium")));
    }

    #[test]
    fn test_validation_unordered_targets() {
        let mut config = Config::default();
        config.tiers.low = TierPolicy::new(90.0, 15.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_delta_bounds() {
        let mut config = Config::default();
        config.controller.max_delta_ms = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.controller.min_delta_ms = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_sensitivity_deserialization() {
        let json = r#"{"sensitivity":"invalid"}"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid sensitivity"));
    }

    fn sensitivity_strategy() -> impl Strategy<Value = Sensitivity> {
        prop_oneof![
            Just(Sensitivity::Conservative),
            Just(Sensitivity::Balanced),
            Just(Sensitivity::Aggressive),
        ]
    }

    fn valid_config_strategy() -> impl Strategy<Value = Config> {
        (
            sensitivity_strategy(),
            0.01f64..=1.0,
            0.1f64..=1.0,
            0.1f64..=1.0,
            proptest::option::of(any::<bool>()),
        )
            .prop_map(|(sensitivity, alpha, ratio, margin, reduced_motion)| {
                let mut config = Config::default();
                config.sensitivity = sensitivity;
                config.controller.smoothing_alpha = alpha;
                config.controller.slow_ratio = ratio;
                config.gate_margin = margin;
                config.reduced_motion = reduced_motion;
                config
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_config_file_round_trip(config in valid_config_strategy()) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("config.json");

            let manager = ConfigManager::load_or_default(&path).unwrap();
            manager.update(config.clone()).unwrap();

            let manager2 = ConfigManager::load_or_default(&path).unwrap();
            prop_assert_eq!(config, manager2.get());
        }

        #[test]
        fn prop_validation_rejects_margin_outside_unit(margin in prop_oneof![-10.0f64..=0.0, 1.0001f64..10.0]) {
            let mut config = Config::default();
            config.gate_margin = margin;

            let result = config.validate();
            if let Err(ConfigError::ValidationError(msg)) = result {
                prop_assert!(msg.contains("gate_margin"));
            } else {
                prop_assert!(false, "Should be ValidationError");
            }
        }
    }
}
