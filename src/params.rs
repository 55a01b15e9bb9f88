//! Avoidance parameters
//!
//! Thresholds, gains and feature toggles consumed by both the real-time
//! driver and the batch scorer. Loadable from partial JSON; missing fields
//! fall back to the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Tunable avoidance parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    // === Midair ===
    /// Trigger when time of closest approach is at most this (s)
    pub mid_ttc_threshold: f64,
    /// ...and the predicted miss distance is at most this (m)
    pub mid_sep_trigger: f64,
    /// Closure gain used to scale the avoidance g-load
    pub k_gain: f64,
    pub g_min: f64,
    pub g_max: f64,
    /// Shadow-test horizon and step (s)
    pub horizon_s: f64,
    pub h_dt: f64,

    // === Wall ===
    pub wall_ttc_threshold: f64,
    pub wall_padding: f64,
    /// g-load of wall-avoidance arcs
    pub wall_g: f64,

    // === Guardrail ===
    pub open_safe_sep: f64,
    pub open_hold_s: f64,

    // === Out-of-bounds return ===
    pub oob_return_after: f64,
    pub oob_return_g: f64,
    pub oob_release_margin: f64,

    // === Feature toggles ===
    pub enable_midair: bool,
    pub enable_wall: bool,
    pub enable_guardrail: bool,
    pub enable_oob_return: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            mid_ttc_threshold: 3.0,
            mid_sep_trigger: 60.0,
            k_gain: 0.2,
            g_min: 2.0,
            g_max: 4.5,
            horizon_s: 3.0,
            h_dt: 0.05,

            wall_ttc_threshold: 2.5,
            wall_padding: 10.0,
            wall_g: 3.0,

            open_safe_sep: 90.0,
            open_hold_s: 0.5,

            oob_return_after: 1.5,
            oob_return_g: 3.0,
            oob_release_margin: 5.0,

            enable_midair: true,
            enable_wall: true,
            enable_guardrail: true,
            enable_oob_return: true,
        }
    }
}

impl Params {
    /// Parse parameters from JSON, filling gaps with defaults
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load parameters from a JSON file
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        let params = Self::from_json_str(&json)?;
        log::info!("Loaded params from {}", path.display());
        Ok(params)
    }

    /// Copy with every avoidance subsystem switched off
    pub fn all_disabled() -> Self {
        Self {
            enable_midair: false,
            enable_wall: false,
            enable_guardrail: false,
            enable_oob_return: false,
            ..Self::default()
        }
    }

    /// Range checks for caller-supplied parameters.
    ///
    /// The simulation itself assumes well-formed values and never calls this.
    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("mid_ttc_threshold", self.mid_ttc_threshold),
            ("mid_sep_trigger", self.mid_sep_trigger),
            ("g_min", self.g_min),
            ("g_max", self.g_max),
            ("horizon_s", self.horizon_s),
            ("h_dt", self.h_dt),
            ("wall_ttc_threshold", self.wall_ttc_threshold),
            ("wall_g", self.wall_g),
            ("open_safe_sep", self.open_safe_sep),
            ("oob_return_g", self.oob_return_g),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidParams(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let non_negative = [
            ("k_gain", self.k_gain),
            ("wall_padding", self.wall_padding),
            ("open_hold_s", self.open_hold_s),
            ("oob_return_after", self.oob_return_after),
            ("oob_release_margin", self.oob_release_margin),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::InvalidParams(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        if self.g_min > self.g_max {
            return Err(SimError::InvalidParams(format!(
                "g_min ({}) exceeds g_max ({})",
                self.g_min, self.g_max
            )));
        }
        if self.h_dt > self.horizon_s {
            return Err(SimError::InvalidParams(format!(
                "h_dt ({}) exceeds horizon_s ({})",
                self.h_dt, self.horizon_s
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = Params::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.mid_ttc_threshold, 3.0);
        assert_eq!(params.open_safe_sep, 90.0);
        assert!(params.enable_midair && params.enable_oob_return);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let params = Params::from_json_str(r#"{"g_max": 6.0, "enable_wall": false}"#).unwrap();
        assert_eq!(params.g_max, 6.0);
        assert!(!params.enable_wall);
        assert_eq!(params.g_min, Params::default().g_min);
        assert_eq!(params.h_dt, Params::default().h_dt);
    }

    #[test]
    fn test_validate_rejects_inverted_g_range() {
        let params = Params {
            g_min: 5.0,
            g_max: 3.0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(SimError::InvalidParams(_))));
    }

    #[test]
    fn test_validate_rejects_zero_step() {
        let params = Params {
            h_dt: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_all_disabled() {
        let params = Params::all_disabled();
        assert!(!params.enable_midair);
        assert!(!params.enable_wall);
        assert!(!params.enable_guardrail);
        assert!(!params.enable_oob_return);
    }
}
