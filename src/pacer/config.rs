//! Pacer tuning knobs.

use serde::{Deserialize, Serialize};

use crate::error::PacerError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Baseline characters per second before category and backlog scaling.
    pub base_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Multiplier applied to ideographic tokens.
    pub script_speed_factor: f64,
    /// Buffered characters beyond which the pacer flushes at once.
    pub max_buffer_size: usize,
    /// When false, text is forwarded to the sink as soon as it arrives.
    pub enabled: bool,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            base_speed: 40.0,
            min_speed: 10.0,
            max_speed: 200.0,
            script_speed_factor: 0.6,
            max_buffer_size: 4096,
            enabled: true,
        }
    }
}

impl PacerConfig {
    /// A configuration that forwards text without pacing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), PacerError> {
        let speeds = [
            ("base_speed", self.base_speed),
            ("min_speed", self.min_speed),
            ("max_speed", self.max_speed),
            ("script_speed_factor", self.script_speed_factor),
        ];
        for (name, value) in speeds {
            if !value.is_finite() || value <= 0.0 {
                return Err(PacerError::InvalidConfig(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        if self.min_speed > self.max_speed {
            return Err(PacerError::InvalidConfig(format!(
                "min_speed ({}) exceeds max_speed ({})",
                self.min_speed, self.max_speed
            )));
        }
        if self.max_buffer_size == 0 {
            return Err(PacerError::InvalidConfig(
                "max_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `update` on top of this config and validate the result.
    pub fn merged(&self, update: &PacerConfigUpdate) -> Result<Self, PacerError> {
        let merged = Self {
            base_speed: update.base_speed.unwrap_or(self.base_speed),
            min_speed: update.min_speed.unwrap_or(self.min_speed),
            max_speed: update.max_speed.unwrap_or(self.max_speed),
            script_speed_factor: update
                .script_speed_factor
                .unwrap_or(self.script_speed_factor),
            max_buffer_size: update.max_buffer_size.unwrap_or(self.max_buffer_size),
            enabled: update.enabled.unwrap_or(self.enabled),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial pacer config; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_speed_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_buffer_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl PacerConfigUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay `other` on this update; fields set in `other` win.
    #[must_use]
    pub fn overlay(self, other: &Self) -> Self {
        Self {
            base_speed: other.base_speed.or(self.base_speed),
            min_speed: other.min_speed.or(self.min_speed),
            max_speed: other.max_speed.or(self.max_speed),
            script_speed_factor: other.script_speed_factor.or(self.script_speed_factor),
            max_buffer_size: other.max_buffer_size.or(self.max_buffer_size),
            enabled: other.enabled.or(self.enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PacerConfig::default().validate().unwrap();
        assert!(!PacerConfig::disabled().enabled);
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let base = PacerConfig::default();
        let merged = base
            .merged(&PacerConfigUpdate {
                base_speed: Some(80.0),
                ..PacerConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(merged.base_speed, 80.0);
        assert_eq!(merged.max_buffer_size, base.max_buffer_size);
    }

    #[test]
    fn rejects_inverted_speed_range() {
        let err = PacerConfig::default()
            .merged(&PacerConfigUpdate {
                min_speed: Some(500.0),
                ..PacerConfigUpdate::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("min_speed"));
    }

    #[test]
    fn rejects_non_positive_values() {
        let zero_buffer = PacerConfig {
            max_buffer_size: 0,
            ..PacerConfig::default()
        };
        assert!(zero_buffer.validate().is_err());

        let negative = PacerConfig {
            base_speed: -1.0,
            ..PacerConfig::default()
        };
        assert!(negative.validate().is_err());

        let nan = PacerConfig {
            script_speed_factor: f64::NAN,
            ..PacerConfig::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn partial_toml_table_parses() {
        let update: PacerConfigUpdate = toml::from_str("base_speed = 55.5\nenabled = false\n").unwrap();
        assert_eq!(update.base_speed, Some(55.5));
        assert_eq!(update.enabled, Some(false));
        assert_eq!(update.max_speed, None);
    }

    #[test]
    fn overlay_prefers_the_later_update() {
        let file = PacerConfigUpdate {
            base_speed: Some(30.0),
            enabled: Some(true),
            ..PacerConfigUpdate::default()
        };
        let env = PacerConfigUpdate {
            enabled: Some(false),
            ..PacerConfigUpdate::default()
        };
        let combined = file.overlay(&env);
        assert_eq!(combined.base_speed, Some(30.0));
        assert_eq!(combined.enabled, Some(false));
        assert!(PacerConfigUpdate::default().is_empty());
    }
}
