//! Shared constants and note-number helpers.

/// Engine sample rate. The whole DSP graph is tuned for this rate; the
/// audio driver is expected to resample or sample-double as needed.
pub const SAMPLE_RATE: u32 = 22050;

/// First playable MIDI note (A0, 27.5 Hz).
pub const NOTE_BEGIN: u8 = 21;
/// One past the last playable MIDI note (C8, 4186 Hz).
pub const NOTE_END: u8 = 109;
/// Number of keys on the instrument.
pub const N_NOTES: usize = (NOTE_END - NOTE_BEGIN) as usize;

/// Largest block the engine processes in one worker hand-off. Longer
/// `update` calls are split into sub-blocks of at most this size.
pub const MAX_BLOCK_SIZE: usize = 256;

pub const DEFAULT_POLYPHONY: usize = 16;
pub const DEFAULT_MIDI_QUEUE_CAPACITY: usize = 16;

/// Voice-mix sample type. Q7.25 on the fixed-point target, `f32` in the
/// reference build used as the test oracle.
#[cfg(feature = "fixed-point")]
pub type Sample = crate::numeric::Fixed<25>;
#[cfg(not(feature = "fixed-point"))]
pub type Sample = f32;

/// Equal-tempered frequency of a MIDI note number.
pub fn note_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Maps a MIDI note number to a key index, dropping out-of-range notes.
pub fn note_index(note: u8) -> Option<usize> {
    if (NOTE_BEGIN..NOTE_END).contains(&note) {
        Some((note - NOTE_BEGIN) as usize)
    } else {
        None
    }
}

/// Scales a delay length expressed at the 44100 Hz reference rate to the
/// engine rate. Flooring is deliberate; rounding detunes the soundboard.
pub const fn at_engine_rate(samples: usize) -> usize {
    samples * SAMPLE_RATE as usize / 44100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_frequencies() {
        assert!((note_frequency(69) - 440.0).abs() < 1e-3);
        assert!((note_frequency(21) - 27.5).abs() < 1e-3);
        assert!((note_frequency(108) - 4186.009).abs() < 0.1);
    }

    #[test]
    fn note_index_range() {
        assert_eq!(note_index(20), None);
        assert_eq!(note_index(21), Some(0));
        assert_eq!(note_index(108), Some(87));
        assert_eq!(note_index(109), None);
    }

    #[test]
    fn reference_rate_scaling_floors() {
        assert_eq!(at_engine_rate(37), 18);
        assert_eq!(at_engine_rate(721), 360);
    }
}
