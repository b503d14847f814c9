//! Game balance and protocol tuning
//!
//! Loaded from JSON; every field has a default so partial documents work.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sim::{FruitVariant, PlayArea};

/// Configuration loading/validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Simulation tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub area: PlayArea,
    /// Chance that a spawn is a bomb
    pub bomb_probability: f64,
    /// Collectible variants, picked uniformly (order is part of the stream)
    pub fruit_variants: Vec<FruitVariant>,
    pub spawn_interval_ms: u64,
    /// Difficulty ramp cadence
    pub ramp_interval_ms: u64,
    pub difficulty_step: u8,
    pub difficulty_cap: u8,
    /// Multiplier increase per ramp, in tenths (1 = +0.1x)
    pub multiplier_step_tenths: u32,
    pub time_scale_step: f32,
    /// Lowest ramp time scale (lower = faster physics)
    pub time_scale_floor: f32,
    /// Slow-motion time scale at session start
    pub intro_time_scale: f32,
    pub intro_duration_ms: u64,
    pub initial_lives: u8,
    /// Downward acceleration in reference px/s²
    pub gravity: f32,
    /// Interactive bounds radius in reference px
    pub object_radius: f32,
    /// Pointer positions kept while dragging
    pub trail_length: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            area: PlayArea::default(),
            bomb_probability: 0.3,
            fruit_variants: FruitVariant::ALL.to_vec(),
            spawn_interval_ms: 1000,
            ramp_interval_ms: 15_000,
            difficulty_step: 25,
            difficulty_cap: 100,
            multiplier_step_tenths: 1,
            time_scale_step: 0.1,
            time_scale_floor: 0.6,
            intro_time_scale: 2.0,
            intro_duration_ms: 5000,
            initial_lives: 3,
            gravity: 600.0,
            object_radius: 40.0,
            trail_length: 10,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.bomb_probability) {
            return Err(invalid("bomb_probability", "must be within [0, 1]"));
        }
        if self.fruit_variants.is_empty() {
            return Err(invalid("fruit_variants", "at least one variant is required"));
        }
        if self.spawn_interval_ms == 0 {
            return Err(invalid("spawn_interval_ms", "must be positive"));
        }
        if self.ramp_interval_ms == 0 {
            return Err(invalid("ramp_interval_ms", "must be positive"));
        }
        if self.difficulty_cap > 100 {
            return Err(invalid("difficulty_cap", "must not exceed 100"));
        }
        if !(self.time_scale_floor > 0.0 && self.time_scale_floor <= 1.0) {
            return Err(invalid("time_scale_floor", "must be within (0, 1]"));
        }
        if self.time_scale_step < 0.0 {
            return Err(invalid("time_scale_step", "must not be negative"));
        }
        if self.intro_time_scale <= 0.0 {
            return Err(invalid("intro_time_scale", "must be positive"));
        }
        if self.initial_lives == 0 {
            return Err(invalid("initial_lives", "must be at least 1"));
        }
        if self.area.width <= 0.0 || self.area.height <= 0.0 {
            return Err(invalid("area", "width and height must be positive"));
        }
        if self.object_radius <= 0.0 {
            return Err(invalid("object_radius", "must be positive"));
        }
        Ok(())
    }
}

/// Seed acquisition tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Safety margin over the oracle fee, in basis points of the fee
    pub fee_margin_bps: u32,
    /// Delay between fulfilment polls
    pub poll_interval_ms: u64,
    /// Poll attempts before giving up with an oracle timeout
    pub max_poll_attempts: u32,
    /// Ceiling for the backoff after failed ledger queries
    pub max_backoff_ms: u64,
    /// Receipt event carrying the correlation id
    pub request_event: String,
    /// Oracle event carrying the fulfilled value
    pub result_event: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fee_margin_bps: 2000,
            poll_interval_ms: 2000,
            max_poll_attempts: 30,
            max_backoff_ms: 16_000,
            request_event: "RandomnessRequested".to_owned(),
            result_event: "RandomnessResult".to_owned(),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be positive"));
        }
        if self.max_poll_attempts == 0 {
            return Err(invalid("max_poll_attempts", "must be at least 1"));
        }
        if self.max_backoff_ms < self.poll_interval_ms {
            return Err(invalid("max_backoff_ms", "must be at least poll_interval_ms"));
        }
        if self.request_event.is_empty() || self.result_event.is_empty() {
            return Err(invalid("request_event/result_event", "event names must not be empty"));
        }
        Ok(())
    }
}

/// Full configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sim: SimConfig,
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sim.validate()?;
        self.protocol.validate()
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{"sim": {"bomb_probability": 0.4}}"#)
            .expect("partial config should parse");
        assert_eq!(config.sim.bomb_probability, 0.4);
        assert_eq!(config.sim.ramp_interval_ms, 15_000);
        assert_eq!(config.protocol, ProtocolConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_probability() {
        let err = Config::from_json(r#"{"sim": {"bomb_probability": 1.5}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "bomb_probability",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_empty_variants_and_zero_polls() {
        let mut config = Config::default();
        config.sim.fruit_variants.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.max_poll_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            Config::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_variant_names_are_lowercase() {
        let json = serde_json::to_string(&SimConfig::default()).expect("serialize");
        assert!(json.contains("\"watermelon\""));
    }
}
