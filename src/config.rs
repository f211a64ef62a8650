//! Engine configuration, loadable as a JSON preset.

use serde::{Deserialize, Serialize};

use crate::params::SystemParameters;
use crate::types::{DEFAULT_MIDI_QUEUE_CAPACITY, DEFAULT_POLYPHONY};

/// Construction-time knobs for [`crate::Piano`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PianoConfig {
    /// Number of pooled voices.
    pub polyphony: usize,
    /// Soundboard output gain before the 1/8 branch normalization.
    pub soundboard_scale: f32,
    /// Capacity of the bounded MIDI input queue.
    pub midi_queue_capacity: usize,
    /// Physical voicing parameters.
    pub params: SystemParameters,
}

impl Default for PianoConfig {
    fn default() -> Self {
        Self {
            polyphony: DEFAULT_POLYPHONY,
            soundboard_scale: 10.0,
            midi_queue_capacity: DEFAULT_MIDI_QUEUE_CAPACITY,
            params: SystemParameters::default(),
        }
    }
}

impl PianoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_polyphony(mut self, polyphony: usize) -> Self {
        self.polyphony = polyphony;
        self
    }

    pub fn with_soundboard_scale(mut self, scale: f32) -> Self {
        self.soundboard_scale = scale;
        self
    }

    pub fn with_midi_queue_capacity(mut self, capacity: usize) -> Self {
        self.midi_queue_capacity = capacity;
        self
    }

    pub fn with_params(mut self, params: SystemParameters) -> Self {
        self.params = params;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains() {
        let c = PianoConfig::new()
            .with_polyphony(8)
            .with_soundboard_scale(6.0);
        assert_eq!(c.polyphony, 8);
        assert_eq!(c.soundboard_scale, 6.0);
        assert_eq!(c.midi_queue_capacity, DEFAULT_MIDI_QUEUE_CAPACITY);
    }
}
