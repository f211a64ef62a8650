//! Physical constants shared by every voice, loadable as a voicing preset.

use serde::{Deserialize, Serialize};

use crate::types::SAMPLE_RATE;

#[cfg(feature = "fixed-point")]
pub type DeltaTime = crate::numeric::Fixed<23>;
#[cfg(not(feature = "fixed-point"))]
pub type DeltaTime = f32;

/// Simulation timestep in seconds.
pub const DELTA_T: f32 = 1.0 / SAMPLE_RATE as f32;

/// Material and coupling constants of the instrument. Immutable after
/// engine construction; shared read-only with the DSP worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemParameters {
    /// Young's modulus of string steel [Pa].
    pub youngs_modulus: f32,
    /// String material density [kg/m^3].
    pub string_density: f32,
    pub bridge_impedance: f32,
    pub string_loss_c1: f32,
    pub string_loss_c3: f32,
    pub soundboard_loss_c1: f32,
    pub soundboard_loss_c3: f32,
    pub soundboard_feedback: f32,
    /// Hammer strike point as a fraction of string length.
    pub hammer_position: f32,
    /// Detune ratios of the unison strings.
    pub tune: [f32; 3],
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self {
            youngs_modulus: 200e9,
            string_density: 7850.0,
            bridge_impedance: 4000.0,
            string_loss_c1: 0.25,
            string_loss_c3: 5.85,
            soundboard_loss_c1: 20.0,
            soundboard_loss_c3: 20.0,
            soundboard_feedback: -0.25,
            hammer_position: 1.0 / 7.0,
            tune: [1.0, 1.0003, 0.9996],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_roundtrips_through_json() {
        let mut p = SystemParameters::default();
        p.bridge_impedance = 3500.0;
        let text = serde_json::to_string(&p).unwrap();
        let q: SystemParameters = serde_json::from_str(&text).unwrap();
        assert_eq!(q.bridge_impedance, 3500.0);
        assert_eq!(q.tune, p.tune);
    }

    #[test]
    fn partial_preset_fills_defaults() {
        let q: SystemParameters = serde_json::from_str(r#"{"bridge_impedance": 5000.0}"#).unwrap();
        assert_eq!(q.bridge_impedance, 5000.0);
        assert_eq!(q.string_loss_c1, 0.25);
    }
}
