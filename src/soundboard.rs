//! Eight-branch feedback-delay-network soundboard.
//!
//! Every branch feeds its neighbor's input on the next sample; a running
//! even/odd sum closes the global feedback path and also forms the output.
//! Branch lengths avoid common factors, are taken at the 44100 Hz
//! reference rate, and floor to the engine rate.

use crate::dsp::delay::DelayLine;
use crate::dsp::iir::{LossState, OnePoleLoss};
use crate::numeric::{mul, Numeric};
use crate::params::SystemParameters;
use crate::types::{at_engine_rate, Sample, SAMPLE_RATE};

#[cfg(feature = "fixed-point")]
mod flavor {
    use crate::numeric::Fixed;

    pub(super) type Value = crate::types::Sample; // Q7.25
    pub(super) type Coef = Fixed<8>;
    pub(super) type FilterHistory = Fixed<33>; // Value * Coef
    pub(super) type Result = Fixed<15>;
    pub(super) type Scale = Fixed<3>; // includes the 1/8 normalization
}

#[cfg(not(feature = "fixed-point"))]
mod flavor {
    pub(super) type Value = f32;
    pub(super) type Coef = f32;
    pub(super) type FilterHistory = f32;
    pub(super) type Result = f32;
    pub(super) type Scale = f32;
}

use flavor::{Coef, FilterHistory, Result as ResultSample, Scale, Value};

const N_BRANCHES: usize = 8;
const DELAY_LENGTHS_44K: [usize; N_BRANCHES] = [37, 87, 181, 271, 359, 592, 687, 721];

fn branch_delay(i: usize) -> usize {
    at_engine_rate(DELAY_LENGTHS_44K[i])
}

#[cfg(feature = "fixed-point")]
fn quantize(r: ResultSample) -> i32 {
    // Result is Q15: raw units are already 16-bit full-scale counts
    r.raw()
}

#[cfg(not(feature = "fixed-point"))]
fn quantize(r: ResultSample) -> i32 {
    (r * 32768.0) as i32
}

pub struct Soundboard {
    delays: [DelayLine<Value>; N_BRANCHES],
    decay: [OnePoleLoss<Coef>; N_BRANCHES],
    decay_state: [LossState<FilterHistory>; N_BRANCHES],
    o: [Value; N_BRANCHES],
    ot: Value,
    a: Coef,
    scale: Scale,
}

impl Soundboard {
    pub fn new(params: &SystemParameters, scale: f32) -> Self {
        let fs = SAMPLE_RATE as f32;
        let mut board = Self {
            delays: std::array::from_fn(|i| DelayLine::new(branch_delay(i))),
            decay: std::array::from_fn(|i| {
                OnePoleLoss::design(
                    (SAMPLE_RATE as usize / branch_delay(i)) as f32,
                    fs,
                    params.soundboard_loss_c1,
                    params.soundboard_loss_c3,
                )
            }),
            decay_state: [LossState::default(); N_BRANCHES],
            o: [Value::default(); N_BRANCHES],
            ot: Value::default(),
            a: Numeric::from_f32(params.soundboard_feedback),
            scale: Scale::default(),
        };
        board.set_scale(scale);
        board
    }

    /// Output gain; the 1/8 branch normalization is folded in.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = Numeric::from_f32(scale / 8.0);
    }

    /// Filters the voice mix `src` through the FDN and writes quantized
    /// frames into `dst`. Both slices have the block length.
    pub fn update(&mut self, dst: &mut [i32], src: &[Sample]) {
        debug_assert_eq!(dst.len(), src.len());
        for (out, &x) in dst.iter_mut().zip(src) {
            let t: Value = mul(self.ot, self.a);
            let t = t + x;

            let mut inp = [Value::default(); N_BRANCHES];
            for (i, slot) in inp.iter_mut().enumerate() {
                *slot = t + self.o[(i + 1) & (N_BRANCHES - 1)];
            }

            for i in 0..N_BRANCHES {
                let delayed = self.delays[i].update(inp[i], branch_delay(i));
                self.o[i] = self.decay[i].filter(delayed, &mut self.decay_state[i]);
            }

            let oe = self.o[0] + self.o[2] + self.o[4] + self.o[6];
            let oo = self.o[1] + self.o[3] + self.o[5] + self.o[7];
            self.ot = oe + oo;

            let r: ResultSample = mul(oe - oo, self.scale);
            *out = quantize(r);
        }
    }

    pub fn clear(&mut self) {
        for (i, d) in self.delays.iter_mut().enumerate() {
            d.clear(branch_delay(i));
        }
        for s in &mut self.decay_state {
            s.clear();
        }
        self.o = [Value::default(); N_BRANCHES];
        self.ot = Value::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_response(n: usize) -> Vec<i32> {
        let params = SystemParameters::default();
        let mut board = Soundboard::new(&params, 10.0);
        let mut src = vec![Sample::default(); n];
        src[0] = Numeric::from_f32(0.5);
        let mut dst = vec![0i32; n];
        board.update(&mut dst, &src);
        dst
    }

    #[test]
    fn impulse_travels_the_shortest_branch_first() {
        // shortest branch is 37 samples at 44100, floored to 18 here; the
        // output stays silent until that branch returns
        let min_delay = branch_delay(0);
        assert_eq!(min_delay, 18);
        let out = impulse_response(64);
        for (i, &v) in out.iter().enumerate().take(min_delay) {
            assert_eq!(v, 0, "early return at sample {i}");
        }
        assert_ne!(out[min_delay], 0, "no return after the shortest branch");
    }

    #[test]
    fn response_is_dense_and_bounded() {
        let out = impulse_response(4096);
        let nonzero = out[512..].iter().filter(|&&v| v != 0).count();
        assert!(nonzero > 3000, "reverb tail is sparse: {nonzero}");
        let peak = out.iter().map(|v| v.abs()).max().unwrap();
        assert!(peak < 32768 * 4, "unstable feedback: peak {peak}");
    }

    #[test]
    fn tail_decays() {
        let out = impulse_response(22050);
        let early: f64 = out[..2205].iter().map(|&v| (v as f64).powi(2)).sum();
        let late: f64 = out[22050 - 2205..].iter().map(|&v| (v as f64).powi(2)).sum();
        assert!(late < early, "soundboard does not decay");
    }

    #[test]
    fn scale_is_applied() {
        let params = SystemParameters::default();
        let mut loud = Soundboard::new(&params, 10.0);
        let mut quiet = Soundboard::new(&params, 5.0);
        let mut src = vec![Sample::default(); 256];
        src[0] = Numeric::from_f32(0.5);
        let mut a = vec![0i32; 256];
        let mut b = vec![0i32; 256];
        loud.update(&mut a, &src);
        quiet.update(&mut b, &src);
        let pa = a.iter().map(|v| v.abs()).max().unwrap();
        let pb = b.iter().map(|v| v.abs()).max().unwrap();
        assert!(pa > pb, "scale had no effect: {pa} vs {pb}");
    }
}
