//! One note of the instrument: 1..3 detuned strings driven by a shared
//! hammer, synthesizing into the voice mix one sample at a time.

use std::f32::consts::PI;

use crate::hammer::{Force, Hammer, HammerState, SolverKind, Velocity};
use crate::numeric::{mul, rescale, Numeric};
use crate::params::SystemParameters;
use crate::pedal::PedalState;
use crate::string::{BridgeSample, HammerLoad, PianoString, StringSample, StringState};
use crate::types::Sample;

#[cfg(feature = "fixed-point")]
mod flavor {
    use crate::numeric::Fixed;

    pub(super) type StringCountInv = Fixed<8>;
    pub(super) type VelocitySum = Fixed<18>;
    pub(super) type BridgeRatio = Fixed<25>;
}

#[cfg(not(feature = "fixed-point"))]
mod flavor {
    pub(super) type StringCountInv = f32;
    pub(super) type VelocitySum = f32;
    pub(super) type BridgeRatio = f32;
}

use flavor::{BridgeRatio, StringCountInv, VelocitySum};

pub const MAX_STRINGS: usize = 3;

// A0 = 27.5 Hz, C8 = 4186.009 Hz
const LN_F0: f32 = 3.314_186;
const INV_LN_F87_F0: f32 = 0.198_992_4;

/// Per-voice state, pooled by the note manager. The arena backs every
/// delay segment of every string; it is sized once for the largest note
/// and re-partitioned on each key-on.
#[derive(Debug, Clone)]
pub struct NoteState {
    pub strings: [StringState; MAX_STRINGS],
    pub hammer: HammerState,
    pub key_on: bool,
    pub sostenuto: bool,
    pub idle: bool,
    pub arena: Vec<StringSample>,
}

impl NoteState {
    pub fn new(arena_len: usize) -> Self {
        Self {
            strings: [StringState::default(); MAX_STRINGS],
            hammer: HammerState::default(),
            key_on: false,
            sostenuto: false,
            idle: true,
            arena: vec![StringSample::default(); arena_len],
        }
    }
}

/// Immutable per-pitch voice configuration.
pub struct Note {
    strings: Vec<PianoString>,
    hammer: Hammer,
    solver: SolverKind,
    inv_n_strings: StringCountInv,
    bridge_load_ratio: BridgeRatio,
    arena_len: usize,
}

impl Note {
    pub fn new(freq: f32, params: &SystemParameters) -> Self {
        let ln_rate = freq.ln() - LN_F0;
        let key_rate = ln_rate * INV_LN_F87_F0;

        // scale length, gauge and the derived string constants
        let rho = params.string_density;
        let length = 0.04 + 1.4 / (1.0 + (-3.4 + 1.4 * ln_rate).exp());
        let radius = 0.002 * (1.0 + 0.6 * ln_rate).powf(-1.4);
        let rho_l = PI * radius * radius * rho;
        let tension = (2.0 * length * freq) * (2.0 * length * freq) * rho_l;
        let z = (tension * rho_l).sqrt();
        let zb = params.bridge_impedance;

        let r_core = radius.min(0.0006);
        let b_stiff = (PI * PI * PI) * params.youngs_modulus * (r_core * r_core * r_core * r_core)
            / (4.0 * length * length * tension);

        let n_strings = if freq < 47.6 {
            1 // below G1
        } else if freq < 84.8 {
            2 // below F2
        } else {
            3
        };

        let mut arena_top = 0usize;
        let strings = (0..n_strings)
            .map(|i| {
                PianoString::new(
                    freq * params.tune[i],
                    b_stiff,
                    z,
                    zb + (n_strings - 1) as f32 * z,
                    params,
                    &mut arena_top,
                )
            })
            .collect();

        let alpha = 0.1e-4 * key_rate;
        let p = 2.0 + key_rate;
        let m = 0.06 - 0.058 * key_rate.powf(0.1);
        let k = 40.0 * 0.7e-3_f32.powf(-p);

        Self {
            strings,
            hammer: Hammer::new(m, k, p, z, alpha),
            solver: SolverKind::for_key_rate(key_rate),
            inv_n_strings: Numeric::from_f32(1.0 / n_strings as f32),
            bridge_load_ratio: Numeric::from_f32(2.0 * z / (z * n_strings as f32 + zb)),
            arena_len: arena_top,
        }
    }

    /// Arena elements this note needs for all its delay segments.
    pub fn arena_len(&self) -> usize {
        self.arena_len
    }

    pub fn key_on(&self, s: &mut NoteState, velocity: f32) {
        debug_assert!(s.arena.len() >= self.arena_len);
        for (string, st) in self.strings.iter().zip(s.strings.iter_mut()) {
            string.reset(st, &mut s.arena);
        }
        s.hammer.reset(velocity);
        s.key_on = true;
        s.sostenuto = false;
        s.idle = false;
    }

    pub fn key_off(&self, s: &mut NoteState) {
        s.key_on = false;
    }

    /// Synthesizes `dst.len()` samples, accumulating into `dst`. Marks the
    /// voice idle instead when it is neither sustained nor still in hammer
    /// contact; the manager reclaims it at the end of the block.
    pub fn update(&self, dst: &mut [Sample], s: &mut NoteState, pedal: PedalState) {
        if pedal.sostenuto_trigger && s.key_on {
            s.sostenuto = true;
        }
        if !pedal.sostenuto {
            s.sostenuto = false;
        }

        let sustain = s.key_on || s.sostenuto || pedal.damper;
        if !sustain && s.hammer.idle {
            s.idle = true;
            return;
        }

        let mut hammer_mask = 0u32;

        for out in dst.iter_mut() {
            let mut v_string = StringSample::default();
            let mut load = StringSample::default();
            for (string, st) in self.strings.iter().zip(s.strings.iter_mut()) {
                v_string += string.hammer_input_velocity(st);
                string.update_delay(st, &mut s.arena);
                load += string.bridge_input_velocity(st);
            }

            let bridge_load: BridgeSample = mul(load, self.bridge_load_ratio);

            let v_sum: VelocitySum = rescale(v_string);
            let v_ave: Velocity = mul(v_sum, self.inv_n_strings);
            if !s.hammer.idle {
                self.hammer.update(&mut s.hammer, v_ave, self.solver);
            }

            let force: Force = s.hammer.f_2z;
            hammer_mask |= force.abs_mask();
            let hammer_load: HammerLoad = rescale(force);

            for (string, st) in self.strings.iter().zip(s.strings.iter_mut()) {
                *out += string.update(st, bridge_load, hammer_load);
            }
        }

        if hammer_mask == 0 {
            s.hammer.idle = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{note_frequency, SAMPLE_RATE};

    fn run_blocks(note: &Note, s: &mut NoteState, pedal: PedalState, blocks: usize) -> Vec<f32> {
        let mut all = Vec::new();
        for _ in 0..blocks {
            let mut buf = [Sample::default(); 128];
            note.update(&mut buf, s, pedal);
            all.extend(buf.iter().map(|v| v.to_f32()));
        }
        all
    }

    #[test]
    fn string_counts_by_register() {
        let params = SystemParameters::default();
        assert_eq!(Note::new(27.5, &params).strings.len(), 1);
        assert_eq!(Note::new(55.0, &params).strings.len(), 2);
        assert_eq!(Note::new(440.0, &params).strings.len(), 3);
    }

    #[test]
    fn key_on_produces_sound_and_decays() {
        let params = SystemParameters::default();
        let note = Note::new(note_frequency(69), &params);
        let mut s = NoteState::new(note.arena_len());
        note.key_on(&mut s, 5.0);

        let out = run_blocks(&note, &mut s, PedalState::default(), SAMPLE_RATE as usize / 128);
        let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.0, "no output after key-on");
        assert!(!s.idle, "held note went idle");

        let early: f32 = out[..2205].iter().map(|v| v * v).sum();
        let late: f32 = out[out.len() - 2205..].iter().map(|v| v * v).sum();
        assert!(late < early, "note did not decay");
    }

    #[test]
    fn released_note_goes_idle() {
        let params = SystemParameters::default();
        let note = Note::new(note_frequency(60), &params);
        let mut s = NoteState::new(note.arena_len());
        note.key_on(&mut s, 5.0);

        run_blocks(&note, &mut s, PedalState::default(), 20);
        note.key_off(&mut s);

        let mut blocks = 0;
        while !s.idle && blocks < 200 {
            run_blocks(&note, &mut s, PedalState::default(), 1);
            blocks += 1;
        }
        assert!(s.idle, "released note never idled");
    }

    #[test]
    fn damper_pedal_sustains_released_note() {
        let params = SystemParameters::default();
        let note = Note::new(note_frequency(60), &params);
        let mut s = NoteState::new(note.arena_len());
        note.key_on(&mut s, 5.0);
        run_blocks(&note, &mut s, PedalState::default(), 20);
        note.key_off(&mut s);

        let damper = PedalState {
            damper: true,
            ..PedalState::default()
        };
        run_blocks(&note, &mut s, damper, 50);
        assert!(!s.idle, "damper did not sustain");

        let mut blocks = 0;
        while !s.idle && blocks < 200 {
            run_blocks(&note, &mut s, PedalState::default(), 1);
            blocks += 1;
        }
        assert!(s.idle, "note never idled after damper release");
    }

    #[test]
    fn sostenuto_latches_only_held_keys() {
        let params = SystemParameters::default();
        let note = Note::new(note_frequency(60), &params);
        let mut s = NoteState::new(note.arena_len());
        note.key_on(&mut s, 5.0);

        // pedal edge while the key is held
        let trigger = PedalState {
            sostenuto: true,
            sostenuto_trigger: true,
            ..PedalState::default()
        };
        run_blocks(&note, &mut s, trigger, 1);
        assert!(s.sostenuto);

        let held = PedalState {
            sostenuto: true,
            ..PedalState::default()
        };
        note.key_off(&mut s);
        run_blocks(&note, &mut s, held, 50);
        assert!(!s.idle, "sostenuto did not hold the note");

        let mut blocks = 0;
        while !s.idle && blocks < 200 {
            run_blocks(&note, &mut s, PedalState::default(), 1);
            blocks += 1;
        }
        assert!(s.idle, "note never idled after sostenuto release");
    }
}
