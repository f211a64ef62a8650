//! Digital-waveguide string.
//!
//! Two coupled loops around the hammer (H) and bridge (B) junctions,
//! modeled as four delay segments with lumped dispersion, loss and tuning
//! filters on the return paths:
//!
//! ```text
//!     Z         Z         Zb
//! |<-d0a<-|H|<-d1a<-|B|<-0
//! |->d0b->| |->d1b->| |->out
//! ```
//!
//! Segment buffers live in the owning voice's arena; the string itself is
//! immutable per-pitch configuration shared by every key-on of that note.

use crate::dsp::delay::{delay_buffer_size, DelayState};
use crate::dsp::design;
use crate::dsp::iir::{Iir, IirState, LossState, OnePoleLoss, VarIir};
use crate::numeric::{mul, rescale, Numeric};
use crate::params::SystemParameters;
use crate::types::SAMPLE_RATE;

#[cfg(feature = "fixed-point")]
mod flavor {
    use crate::numeric::Fixed;

    pub type BridgeSample = crate::types::Sample; // Q7.25
    pub type StringSample = Fixed<20>;
    pub type FilterSample = Fixed<15>;
    pub(super) type FilterConst = Fixed<12>;
    pub(super) type FilterHistory = Fixed<27>; // StringSample * FilterConst
    pub(super) type ImpedanceRatio = Fixed<14>;
}

#[cfg(not(feature = "fixed-point"))]
mod flavor {
    pub type BridgeSample = f32;
    pub type StringSample = f32;
    pub type FilterSample = f32;
    pub(super) type FilterConst = f32;
    pub(super) type FilterHistory = f32;
    pub(super) type ImpedanceRatio = f32;
}

use flavor::{FilterConst, FilterHistory, ImpedanceRatio};
pub use flavor::{BridgeSample, FilterSample, StringSample};

/// Hammer force arrives on the string in the traveling-wave format.
pub type HammerLoad = StringSample;

const MAX_DISPERSION: usize = 4;
const TUNING_TAPS: usize = 8; // Thirian order up to 7

type DispersionFilter = Iir<3, FilterConst>;
type DispersionState = IirState<3, FilterHistory>;
type TuningFilter = VarIir<TUNING_TAPS, FilterConst>;
type TuningState = IirState<TUNING_TAPS, FilterHistory>;
type LossFilter = OnePoleLoss<FilterConst>;

/// One delay segment: static length and arena placement.
#[derive(Debug, Clone, Copy)]
struct DelayNode {
    delay: u16,
    size: u16,
    offset: u32,
}

/// Per-voice segment state. The in/out staging adds one sample of delay,
/// so the node stores `requested - 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayNodeState {
    inp: StringSample,
    out: StringSample,
    ring: DelayState,
}

impl DelayNode {
    fn new(requested: i32, arena_top: &mut usize) -> Self {
        let delay = (requested - 1).max(0) as usize;
        let size = delay_buffer_size(delay);
        let offset = *arena_top;
        *arena_top += size;
        Self {
            delay: delay as u16,
            size: size as u16,
            offset: offset as u32,
        }
    }

    #[inline]
    fn buf<'a>(&self, arena: &'a mut [StringSample]) -> &'a mut [StringSample] {
        &mut arena[self.offset as usize..][..self.size as usize]
    }

    #[inline]
    fn update(&self, s: &mut DelayNodeState, arena: &mut [StringSample]) {
        s.out = s.ring.update(self.buf(arena), s.inp, self.delay as usize);
    }

    fn reset(&self, s: &mut DelayNodeState, arena: &mut [StringSample]) {
        s.inp = StringSample::default();
        s.out = StringSample::default();
        s.ring = DelayState::attach(self.size as usize);
        s.ring.clear(self.buf(arena), self.delay as usize);
    }
}

/// Per-voice string state, reset on key-on.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringState {
    pub(crate) d0a: DelayNodeState,
    pub(crate) d0b: DelayNodeState,
    pub(crate) d1a: DelayNodeState,
    pub(crate) d1b: DelayNodeState,
    dispersion: [DispersionState; MAX_DISPERSION],
    lowpass: LossState<FilterHistory>,
    frac_delay: TuningState,
}

/// Immutable per-pitch string configuration.
#[derive(Debug, Clone)]
pub struct PianoString {
    d0a: DelayNode,
    d0b: DelayNode,
    d1a: DelayNode,
    d1b: DelayNode,
    alpha12: ImpedanceRatio,
    dispersion: [DispersionFilter; MAX_DISPERSION],
    lowpass: LossFilter,
    frac_delay: TuningFilter,
}

impl PianoString {
    /// Builds the string for frequency `f` with stiffness `b_stiff`,
    /// impedance `z` and effective bridge load `zb_eff`, reserving its
    /// segment buffers from `arena_top`.
    pub fn new(
        f: f32,
        b_stiff: f32,
        z: f32,
        zb_eff: f32,
        params: &SystemParameters,
        arena_top: &mut usize,
    ) -> Self {
        let fs = SAMPLE_RATE as f32;
        let delay_total = fs / f;
        let delay1 = ((params.hammer_position * 0.5 * delay_total) as i32).max(1);

        let m = if f > 400.0 { 1 } else { 4 };
        let section = {
            let (ca, cb) = design::thirian_dispersion(b_stiff, f, m);
            DispersionFilter::from_design(&ca, &cb)
        };
        let dispersion: [DispersionFilter; MAX_DISPERSION] =
            std::array::from_fn(|i| if i < m { section } else { DispersionFilter::identity() });
        let dispersion_delay = m as f32 * dispersion[0].group_delay(f, fs);

        let lowpass = LossFilter::design(f, fs, params.string_loss_c1, params.string_loss_c3);
        let lowpass_delay = lowpass.group_delay(f, fs);

        let half_loop = 0.5 * (delay_total - 2.0 * delay1 as f32);
        let delay2 = ((half_loop - dispersion_delay) as i32).max(1);
        let delay3 = ((half_loop - lowpass_delay - 5.0) as i32).max(1);

        // residual absorbed by the fractional-delay tuning allpass
        let d = delay_total
            - (delay1 * 2 + delay2 + delay3) as f32
            - dispersion_delay
            - lowpass_delay;
        let order = (d as i32).max(1) as usize;
        let frac_delay = TuningFilter::design_thirian(d, order.min(TUNING_TAPS - 1));

        let d0a = DelayNode::new(delay1, arena_top);
        let d0b = DelayNode::new(delay1, arena_top);
        let d1a = DelayNode::new(delay2, arena_top);
        let d1b = DelayNode::new(delay3, arena_top);

        Self {
            d0a,
            d0b,
            d1a,
            d1b,
            alpha12: Numeric::from_f32(2.0 * z / (z + zb_eff)),
            dispersion,
            lowpass,
            frac_delay,
        }
    }

    /// Arena elements needed by this string's four segments.
    pub fn arena_len(&self) -> usize {
        (self.d0a.size + self.d0b.size + self.d1a.size + self.d1b.size) as usize
    }

    pub fn reset(&self, s: &mut StringState, arena: &mut [StringSample]) {
        self.d0a.reset(&mut s.d0a, arena);
        self.d0b.reset(&mut s.d0b, arena);
        self.d1a.reset(&mut s.d1a, arena);
        self.d1b.reset(&mut s.d1b, arena);
        for d in &mut s.dispersion {
            d.clear();
        }
        s.lowpass.clear();
        s.frac_delay.clear();
    }

    /// Incoming wave velocity at the hammer junction.
    #[inline]
    pub fn hammer_input_velocity(&self, s: &StringState) -> StringSample {
        s.d0b.out + s.d1a.out
    }

    /// Incoming wave velocity at the bridge junction.
    #[inline]
    pub fn bridge_input_velocity(&self, s: &StringState) -> StringSample {
        s.d1b.out
    }

    /// Advances all four segments one sample.
    #[inline]
    pub fn update_delay(&self, s: &mut StringState, arena: &mut [StringSample]) {
        self.d0a.update(&mut s.d0a, arena);
        self.d0b.update(&mut s.d0b, arena);
        self.d1a.update(&mut s.d1a, arena);
        self.d1b.update(&mut s.d1b, arena);
    }

    /// Scatters at both junctions and returns the bridge output sample,
    /// which is simultaneously this string's contribution to the mix.
    #[inline]
    pub fn update(
        &self,
        s: &mut StringState,
        bridge_load: BridgeSample,
        hammer_load: HammerLoad,
    ) -> BridgeSample {
        let load_h = s.d0b.out + s.d1a.out + hammer_load;

        let load_b: BridgeSample = mul(self.alpha12, s.d1b.out);
        let load_b1: StringSample = rescale(load_b + bridge_load);

        s.d0a.inp = load_h - s.d0b.out;
        s.d0b.inp = -s.d0a.out;

        let y: FilterSample = rescale(load_h - s.d1a.out);
        s.d1b.inp = rescale(self.filter_hammer_side(y, s));

        let y: FilterSample = rescale(load_b1 - s.d1b.out);
        s.d1a.inp = rescale(self.filter_bridge_side(y, s));

        load_b
    }

    /// Dispersion cascade on the hammer-side return.
    #[inline]
    fn filter_hammer_side(&self, y: FilterSample, s: &mut StringState) -> FilterSample {
        let mut y = y;
        for (f, st) in self.dispersion.iter().zip(s.dispersion.iter_mut()) {
            y = f.filter(y, st);
        }
        y
    }

    /// Loss then fractional-delay tuning on the bridge-side return.
    #[inline]
    fn filter_bridge_side(&self, y: FilterSample, s: &mut StringState) -> FilterSample {
        let y = self.lowpass.filter(y, &mut s.lowpass);
        self.frac_delay.filter(y, &mut s.frac_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(f: f32) -> (PianoString, StringState, Vec<StringSample>) {
        let params = SystemParameters::default();
        let mut top = 0;
        // plausible single-string impedances
        let s = PianoString::new(f, 1e-4, 1.0, params.bridge_impedance, &params, &mut top);
        let mut arena = vec![StringSample::default(); top];
        let mut st = StringState::default();
        s.reset(&mut st, &mut arena);
        (s, st, arena)
    }

    #[test]
    fn arena_layout_is_dense() {
        let params = SystemParameters::default();
        let mut top = 0;
        let a = PianoString::new(110.0, 1e-4, 1.0, 4000.0, &params, &mut top);
        let first = top;
        let b = PianoString::new(110.0, 1e-4, 1.0, 4000.0, &params, &mut top);
        assert_eq!(first, a.arena_len());
        assert_eq!(top, a.arena_len() + b.arena_len());
    }

    #[test]
    fn loop_delay_matches_pitch() {
        // ring the string with a hammer impulse and measure the period of
        // the bridge output autocorrelation
        let f = 220.0;
        let (s, mut st, mut arena) = make(f);
        let n = 4096;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            s.update_delay(&mut st, &mut arena);
            let load: HammerLoad = if i < 3 {
                Numeric::from_f32(1.0)
            } else {
                HammerLoad::default()
            };
            let y = s.update(&mut st, BridgeSample::default(), load);
            out.push(y.to_f32());
        }
        let period = (SAMPLE_RATE as f32 / f).round() as usize;
        let mut best_lag = 0;
        let mut best = f32::MIN;
        for lag in period / 2..period * 2 {
            let c: f32 = (0..n - lag).map(|i| out[i] * out[i + lag]).sum();
            if c > best {
                best = c;
                best_lag = lag;
            }
        }
        let got = SAMPLE_RATE as f32 / best_lag as f32;
        assert!(
            (got - f).abs() / f < 0.03,
            "expected ~{f} Hz, measured {got} Hz"
        );
    }

    #[test]
    fn silent_string_stays_silent() {
        let (s, mut st, mut arena) = make(440.0);
        for _ in 0..1000 {
            s.update_delay(&mut st, &mut arena);
            let y = s.update(&mut st, BridgeSample::default(), HammerLoad::default());
            assert_eq!(y.abs_mask(), 0);
        }
    }

    #[test]
    fn output_decays_after_excitation() {
        let (s, mut st, mut arena) = make(440.0);
        let mut early = 0.0f32;
        let mut late = 0.0f32;
        for i in 0..22050 {
            s.update_delay(&mut st, &mut arena);
            let load: HammerLoad = if i < 5 {
                Numeric::from_f32(1.0)
            } else {
                HammerLoad::default()
            };
            let y = s.update(&mut st, BridgeSample::default(), load).to_f32();
            if i < 2205 {
                early += y * y;
            } else if i >= 19845 {
                late += y * y;
            }
        }
        assert!(early > 0.0);
        assert!(late < early, "string did not decay: {late} vs {early}");
    }
}
