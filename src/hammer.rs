//! Nonlinear felt-hammer model.
//!
//! The felt is a stiffening spring with hysteresis: compression `u` drives
//! a force `F/2Z = u^p * K/2Z` plus a rate term, and the force pushes the
//! hammer mass back off the string. The power law is evaluated in the log
//! domain (`exp2(log2(u) * p + log2(K/2Z))`) so the fixed-point build can
//! use the CLZ-based estimates instead of a real `pow`.

use crate::numeric::{exp2_estimate, log2_estimate, madd, mul, Numeric};
use crate::params::{DeltaTime, DELTA_T};

#[cfg(feature = "fixed-point")]
mod flavor {
    use crate::numeric::Fixed;

    /// Force over twice the string impedance, `F/2Z`.
    pub type Force = Fixed<13>;
    /// Felt compression `u`.
    pub type FeltComp = Fixed<22>;
    /// `u^p * K/2Z`, same range as the force.
    pub type FeltPow = Fixed<13>;
    pub type Velocity = Fixed<13>;

    pub(super) type StiffExp = Fixed<6>; // p in [2, 3]
    pub(super) type LogK = Fixed<22>; // log2(K/2Z) in [22.4, 35.4]
    pub(super) type RateC2 = Fixed<8>; // alpha/dt
    pub(super) type RateC3 = Fixed<13>; // dt*2Z/m
    pub(super) type LogSpace = Fixed<16>;
    pub(super) type Ratio = Fixed<8>;
}

#[cfg(not(feature = "fixed-point"))]
mod flavor {
    pub type Force = f32;
    pub type FeltComp = f32;
    pub type FeltPow = f32;
    pub type Velocity = f32;

    pub(super) type StiffExp = f32;
    pub(super) type LogK = f32;
    pub(super) type RateC2 = f32;
    pub(super) type RateC3 = f32;
    pub(super) type LogSpace = f32;
    pub(super) type Ratio = f32;
}

use flavor::{LogK, LogSpace, Ratio, RateC2, RateC3, StiffExp};
pub use flavor::{FeltComp, FeltPow, Force, Velocity};

/// Per-voice hammer state, reset on key-on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HammerState {
    pub v: Velocity,
    pub u: FeltComp,
    pub prev_upk_2z: FeltPow,
    pub f_2z: Force,
    /// Set by the note once a full block passes with zero force.
    pub idle: bool,
}

impl HammerState {
    pub fn reset(&mut self, velocity: f32) {
        self.v = Numeric::from_f32(velocity);
        self.u = FeltComp::default();
        self.prev_upk_2z = FeltPow::default();
        self.f_2z = Force::default();
        self.idle = false;
    }
}

/// Integration scheme, picked per key range at note init. Treble notes
/// have stiffer felt and need the extra stages to stay stable at 22050 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Euler,
    Midpoint,
    Rk4,
}

impl SolverKind {
    pub fn for_key_rate(key_rate: f32) -> Self {
        if key_rate < 0.4 {
            SolverKind::Euler
        } else if key_rate < 0.85 {
            SolverKind::Midpoint
        } else {
            SolverKind::Rk4
        }
    }
}

#[derive(Clone, Copy)]
struct Step {
    v: Velocity,
    u: FeltComp,
    f_2z: Force,
    upk_2z: FeltPow,
}

/// Immutable per-note hammer constants.
#[derive(Debug, Clone, Copy)]
pub struct Hammer {
    p: StiffExp,
    c1: LogK,
    c2: RateC2,
    c3: RateC3,
    c2h: RateC2,
    c3h: RateC3,
    dt: DeltaTime,
    dt_half: DeltaTime,
}

impl Hammer {
    pub fn new(m: f32, k: f32, p: f32, z: f32, alpha: f32) -> Self {
        Self {
            p: Numeric::from_f32(p),
            c1: Numeric::from_f32((k / (2.0 * z)).log2()),
            c2: Numeric::from_f32(alpha / DELTA_T),
            c3: Numeric::from_f32(DELTA_T * 2.0 * z / m),
            c2h: Numeric::from_f32(2.0 * alpha / DELTA_T),
            c3h: Numeric::from_f32(0.5 * DELTA_T * 2.0 * z / m),
            dt: Numeric::from_f32(DELTA_T),
            dt_half: Numeric::from_f32(0.5 * DELTA_T),
        }
    }

    /// One evaluation of the felt ODE at timestep `dt`:
    ///
    /// ```text
    /// u' = u + (v - vin - F/2Z) dt
    /// upK/2Z = max(0, u')^p * K/2Z
    /// F'/2Z = max(0, upK/2Z + (alpha/dt)(upK/2Z - prev))
    /// v' = v - F'/2Z * (dt 2Z/m)
    /// ```
    #[inline]
    fn step(
        &self,
        v: Velocity,
        u: FeltComp,
        f_2z: Force,
        vin: Velocity,
        dt: DeltaTime,
        prev_upk_2z: FeltPow,
        c2: RateC2,
        c3: RateC3,
    ) -> Step {
        let tv = v - vin - f_2z;
        let du: FeltComp = mul(tv, dt);
        let u1 = u + du;

        let upk_2z: FeltPow = if u1.is_plus() {
            let tl: LogSpace = log2_estimate(u1);
            let tl: LogSpace = madd(self.c1, tl, self.p);
            exp2_estimate(tl)
        } else {
            FeltPow::default()
        };

        let dupk_2z = upk_2z - prev_upk_2z;
        let tf: Force = mul(c2, dupk_2z);
        let f1 = (upk_2z + tf).clamp0();

        let dv: Velocity = mul(f1, c3);
        Step {
            v: v - dv,
            u: u1,
            f_2z: f1,
            upk_2z,
        }
    }

    /// Advances the hammer one sample against the average string velocity.
    pub fn update(&self, s: &mut HammerState, vin: Velocity, kind: SolverKind) {
        match kind {
            SolverKind::Euler => {
                let r = self.step(s.v, s.u, s.f_2z, vin, self.dt, s.prev_upk_2z, self.c2, self.c3);
                s.v = r.v;
                s.u = r.u;
                s.f_2z = r.f_2z;
                s.prev_upk_2z = r.upk_2z;
            }
            SolverKind::Midpoint => {
                let h = self.step(
                    s.v,
                    s.u,
                    s.f_2z,
                    vin,
                    self.dt_half,
                    s.prev_upk_2z,
                    self.c2h,
                    self.c3h,
                );
                let r = self.step(h.v, s.u, h.f_2z, vin, self.dt, s.prev_upk_2z, self.c2, self.c3);
                s.v = r.v;
                s.u = r.u;
                s.f_2z = r.f_2z;
                s.prev_upk_2z = r.upk_2z;
            }
            SolverKind::Rk4 => {
                let k2 = self.step(
                    s.v,
                    s.u,
                    s.f_2z,
                    vin,
                    self.dt_half,
                    s.prev_upk_2z,
                    self.c2h,
                    self.c3h,
                );
                let k3 = self.step(
                    k2.v,
                    k2.u,
                    s.f_2z,
                    vin,
                    self.dt_half,
                    s.prev_upk_2z,
                    self.c2h,
                    self.c3h,
                );
                let k4 = self.step(
                    k3.v,
                    s.u,
                    s.f_2z,
                    vin,
                    self.dt,
                    s.prev_upk_2z,
                    self.c2,
                    self.c3,
                );

                // v = (v1 + 2 v2 + 2 v3 + v4) / 6
                let mut v = (k2.v + k3.v).dbl();
                v = v + s.v + k4.v;
                let sixth: Ratio = Numeric::from_f32(1.0 / 6.0);
                let v: Velocity = mul(v, sixth);

                let r = self.step(
                    v,
                    s.u,
                    k4.f_2z,
                    vin,
                    self.dt,
                    s.prev_upk_2z,
                    self.c2,
                    self.c3,
                );
                s.v = r.v;
                s.u = r.u;
                s.f_2z = r.f_2z;
                s.prev_upk_2z = r.upk_2z;
            }
        }
    }
}
