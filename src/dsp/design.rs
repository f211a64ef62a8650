//! Filter coefficient design, evaluated in `f32` at note-initialization
//! time only. The runtime kernels in [`crate::dsp::iir`] consume these
//! coefficients after quantization to the build's sample flavor.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Allpass,
    Lowpass,
    Highpass,
    Notch,
}

/// Second-order section from the bilinear substitution
/// `a = 1 / (2 tan(pi f0 / fs))`. Returns `(a, b)` with `a[0] = 1`.
pub fn biquad(f0: f32, fs: f32, q: f32, kind: BiquadKind) -> ([f32; 3], [f32; 3]) {
    let a = 1.0 / (2.0 * (PI * f0 / fs).tan());
    let a2 = a * a;
    let aoq = a / q;
    let d = 4.0 * a2 + 2.0 * aoq + 1.0;

    let ca = [1.0, -(8.0 * a2 - 2.0) / d, (4.0 * a2 - 2.0 * aoq + 1.0) / d];
    let cb = match kind {
        BiquadKind::Allpass => [2.0 * aoq / d, 0.0, -2.0 * aoq / d],
        BiquadKind::Lowpass => [1.0 / d, 2.0 / d, 1.0 / d],
        BiquadKind::Highpass => [4.0 * a2 / d, -8.0 * a2 / d, 4.0 * a2 / d],
        BiquadKind::Notch => [(1.0 + 4.0 * a2) / d, (2.0 - 8.0 * a2) / d, (1.0 + 4.0 * a2) / d],
    };
    (ca, cb)
}

/// One-pole loss lowpass for a string of pitch `f0` with loss constants
/// `c1`, `c3`. Returns `(a, b)` with `b[1] = 0`.
pub fn loss(f0: f32, fs: f32, c1: f32, c3: f32) -> ([f32; 2], [f32; 2]) {
    let _ = fs;
    let g = 1.0 - c1 / f0;
    let beta = 4.0 * c3 + f0;
    let a1 = (-beta + (beta * beta - 16.0 * c3 * c3).sqrt()) / (4.0 * c3);
    ([1.0, a1], [g * (1.0 + a1), 0.0])
}

/// Thirian allpass of order `n` realizing fractional delay `d`. Fills
/// `a[0..=n]` and the palindromic `b[i] = a[n-i]`. A target of `d <= 1`
/// degenerates to a pure `n`-sample delay.
pub fn thirian(n: usize, d: f32, a: &mut [f32], b: &mut [f32]) {
    if d <= 1.0 {
        a[0] = 1.0;
        b[n] = 1.0;
        for i in 1..=n {
            a[i] = 0.0;
            b[n - i] = 0.0;
        }
        return;
    }
    for i in 0..=n {
        let k = i.min(n - i) as i64;
        let mut answer: i64 = 1;
        let mut multiplier = n as i64;
        let mut divisor: i64 = 1;
        while divisor <= k {
            answer = answer * multiplier / divisor;
            multiplier -= 1;
            divisor += 1;
        }

        let mut ai = answer as f32;
        if i & 1 == 1 {
            ai = -ai;
        }
        for m in 0..=n as i32 {
            ai *= (d - (n as i32 - m) as f32) / (d - (n as i32 - m - i as i32) as f32);
        }
        a[i] = ai;
        b[n - i] = ai;
    }
}

/// Target dispersion delay for stiffness `b` at frequency `f`, from the
/// published curve fit. Two parameter sets, one per filter count.
pub fn dispersion_delay(b: f32, f: f32, m: usize) -> f32 {
    let (c1, c2, k1, k2, k3) = if m == 4 {
        (0.069618, 2.0427, -0.00050469, -0.0064264, -2.8743)
    } else {
        (0.071089, 2.1074, -0.0026580, -0.014811, -2.9018)
    };

    let log_b = b.ln();
    let kd = (k1 * log_b * log_b + k2 * log_b + k3).exp();
    let cd = (c1 * log_b + c2).exp();
    let halfstep = 2.0f32.powf(1.0 / 12.0);
    let ikey = (f * halfstep / 27.5).ln() / halfstep.ln();
    (cd - ikey * kd).exp()
}

/// Order-2 Thirian section tuned to the dispersion of a string of
/// stiffness `b`; identity when the target delay degenerates.
pub fn thirian_dispersion(b: f32, f: f32, m: usize) -> ([f32; 3], [f32; 3]) {
    let d = dispersion_delay(b, f, m);
    let mut ca = [0.0f32; 3];
    let mut cb = [0.0f32; 3];
    if d <= 1.0 {
        ca[0] = 1.0;
        cb[0] = 1.0;
    } else {
        thirian(2, d, &mut ca, &mut cb);
    }
    (ca, cb)
}

fn complex_div(hn: [f32; 2], hd: [f32; 2]) -> [f32; 2] {
    let magn = (hn[0] * hn[0] + hn[1] * hn[1]).sqrt();
    let argn = hn[1].atan2(hn[0]);
    let magd = (hd[0] * hd[0] + hd[1] * hd[1]).sqrt();
    let argd = hd[1].atan2(hd[0]);
    let mag = magn / magd;
    let arg = argn - argd;
    [mag * arg.cos(), mag * arg.sin()]
}

/// Phase delay in samples of the filter `(a, b)` at frequency `f`.
pub fn phase_delay(a: &[f32], b: &[f32], f: f32, fs: f32) -> f32 {
    let mut hn = [0.0f32; 2];
    let mut hd = [0.0f32; 2];
    let omega = 2.0 * PI * f / fs;
    for (i, &c) in b.iter().enumerate() {
        hn[0] += (i as f32 * omega).cos() * c;
        hn[1] += (i as f32 * omega).sin() * c;
    }
    for (i, &c) in a.iter().enumerate() {
        hd[0] += (i as f32 * omega).cos() * c;
        hd[1] += (i as f32 * omega).sin() * c;
    }
    let h = complex_div(hn, hd);
    let mut arg = h[1].atan2(h[0]);
    if arg < 0.0 {
        arg += 2.0 * PI;
    }
    arg / omega
}

/// Group delay in samples, by finite difference of the phase at +-5 Hz.
pub fn group_delay(a: &[f32], b: &[f32], f: f32, fs: f32) -> f32 {
    let df = 5.0;
    let f2 = f + df;
    let f1 = f - df;
    let omega2 = 2.0 * PI * f2 / fs;
    let omega1 = 2.0 * PI * f1 / fs;
    (omega2 * phase_delay(a, b, f2, fs) - omega1 * phase_delay(a, b, f1, fs)) / (omega2 - omega1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirian_group_delay_roundtrip() {
        for d in [1.2f32, 2.5, 3.8, 5.1] {
            let n = (d as usize).max(1);
            let mut a = [0.0f32; 8];
            let mut b = [0.0f32; 8];
            thirian(n, d, &mut a, &mut b);
            let gd = group_delay(&a[..=n], &b[..=n], 440.0, 22050.0);
            assert!((gd - d).abs() < 0.05, "order {n} delay {d} got {gd}");
        }
    }

    #[test]
    fn thirian_coefficients_are_palindromic() {
        let mut a = [0.0f32; 8];
        let mut b = [0.0f32; 8];
        thirian(5, 5.4, &mut a, &mut b);
        for i in 0..=5 {
            assert!((b[i] - a[5 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn loss_filter_is_stable_lowpass() {
        let (a, b) = loss(440.0, 22050.0, 0.25, 5.85);
        assert!(a[1].abs() < 1.0, "pole outside unit circle: {}", a[1]);
        // DC gain g = 1 - c1/f0
        let dc = b[0] / (1.0 + a[1]);
        assert!((dc - (1.0 - 0.25 / 440.0)).abs() < 1e-4);
    }

    #[test]
    fn biquad_dc_gains() {
        let (a, b) = biquad(1000.0, 22050.0, 0.7, BiquadKind::Lowpass);
        let dc: f32 = b.iter().sum::<f32>() / a.iter().sum::<f32>();
        assert!((dc - 1.0).abs() < 1e-4);

        let (a, b) = biquad(1000.0, 22050.0, 0.7, BiquadKind::Highpass);
        let dc: f32 = b.iter().sum::<f32>() / a.iter().sum::<f32>();
        assert!(dc.abs() < 1e-4);
    }

    #[test]
    fn dispersion_delay_grows_toward_bass() {
        let d_low = dispersion_delay(1e-4, 55.0, 4);
        let d_high = dispersion_delay(1e-4, 1760.0, 1);
        assert!(d_low > d_high);
    }
}
