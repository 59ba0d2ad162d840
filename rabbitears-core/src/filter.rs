//! Fixed-point IIR low-pass filters for the Y/I/Q channels.
//!
//! These are the composite bandwidth limits applied on both sides of the
//! "antenna": the encoder band-limits luminance and chrominance before
//! modulating them onto the subcarrier, and the demodulator runs the same
//! filters over the received signal. The coefficients come from `mkfilter`
//! and are part of the observable behaviour; note the differing feedback
//! shifts (`>> 16` for Y and I, `>> 12` for Q).
//!
//! Feedback products use `i64` so a noise spike can never wrap.

/// 4-pole low-pass Butterworth at 3.5 MHz with an extra zero at 3.5 MHz,
/// from `mkfilter -Bu -Lp -o 4 -a 2.1428571429e-01 0 -Z 2.5e-01 -l`.
#[derive(Debug, Clone, Copy, Default)]
#[must_use]
pub struct LumaLowPass {
    x: [i32; 7],
    y: [i32; 4],
}

impl LumaLowPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feeds one raw sample and returns the filtered sample at the same
    /// internal scale.
    #[inline]
    pub fn filter(&mut self, raw: i32) -> i32 {
        self.x.copy_within(1.., 0);
        self.x[6] = ((i64::from(raw) * 1897) >> 16) as i32;
        let x = &self.x;
        let y = &self.y;
        let feedback = (-151 * i64::from(y[0]) + 8115 * i64::from(y[1])
            - 38312 * i64::from(y[2])
            + 36586 * i64::from(y[3]))
            >> 16;
        let out = (x[0] + x[6]) + 4 * (x[1] + x[5]) + 7 * (x[2] + x[4]) + 8 * x[3]
            + feedback as i32;
        self.y.copy_within(1.., 0);
        self.y[3] = out;
        out
    }
}

/// 3-pole low-pass Butterworth at 1.5 MHz, for the I channel.
#[derive(Debug, Clone, Copy, Default)]
#[must_use]
pub struct ChromaILowPass {
    x: [i32; 4],
    y: [i32; 3],
}

impl ChromaILowPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn filter(&mut self, raw: i32) -> i32 {
        self.x.copy_within(1.., 0);
        self.x[3] = ((i64::from(raw) * 1413) >> 16) as i32;
        let x = &self.x;
        let y = &self.y;
        let feedback =
            (16559 * i64::from(y[0]) - 72008 * i64::from(y[1]) + 109682 * i64::from(y[2])) >> 16;
        let out = (x[0] + x[3]) + 3 * (x[1] + x[2]) + feedback as i32;
        self.y.copy_within(1.., 0);
        self.y[2] = out;
        out
    }
}

/// 3-pole low-pass Butterworth at 0.5 MHz, for the Q channel.
#[derive(Debug, Clone, Copy, Default)]
#[must_use]
pub struct ChromaQLowPass {
    x: [i32; 4],
    y: [i32; 3],
}

impl ChromaQLowPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn filter(&mut self, raw: i32) -> i32 {
        self.x.copy_within(1.., 0);
        self.x[3] = ((i64::from(raw) * 75) >> 16) as i32;
        let x = &self.x;
        let y = &self.y;
        let feedback =
            (2612 * i64::from(y[0]) - 9007 * i64::from(y[1]) + 10453 * i64::from(y[2])) >> 12;
        let out = (x[0] + x[3]) + 3 * (x[1] + x[2]) + feedback as i32;
        self.y.copy_within(1.., 0);
        self.y[2] = out;
        out
    }
}

/// The three filters an encoder or demodulator runs per scan line.
#[derive(Debug, Clone, Copy, Default)]
#[must_use]
pub struct YiqLowPass {
    pub y: LumaLowPass,
    pub i: ChromaILowPass,
    pub q: ChromaQLowPass,
}

impl YiqLowPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.y.reset();
        self.i.reset();
        self.q.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_dc_gain_is_near_unity() {
        let mut f = LumaLowPass::new();
        let mut out = 0;
        for _ in 0..512 {
            out = f.filter(16384);
        }
        let err = (f64::from(out) - 16384.0).abs() / 16384.0;
        assert!(err < 0.04, "luma DC error {err}");
    }

    #[test]
    fn chroma_i_dc_gain_is_near_unity() {
        let mut f = ChromaILowPass::new();
        let mut out = 0;
        for _ in 0..512 {
            out = f.filter(16384);
        }
        let err = (f64::from(out) - 16384.0).abs() / 16384.0;
        assert!(err < 0.04, "I DC error {err}");
    }

    #[test]
    fn chroma_q_dc_gain_is_near_unity() {
        // The Q path quantises its input hard ((x * 75) >> 16), so allow a
        // wider band and a longer settle for the pole near 1.
        let mut f = ChromaQLowPass::new();
        let mut out = 0;
        for _ in 0..8192 {
            out = f.filter(16384);
        }
        let err = (f64::from(out) - 16384.0).abs() / 16384.0;
        assert!(err < 0.08, "Q DC error {err}");
    }

    #[test]
    fn luma_attenuates_the_subcarrier() {
        // The colour subcarrier alternates every two samples at this rate;
        // luminance filtering should knock it down hard relative to DC.
        let mut f = LumaLowPass::new();
        let mut peak = 0i32;
        for n in 0..512 {
            let s = if n & 2 == 0 { 16384 } else { -16384 };
            let out = f.filter(s);
            if n > 64 {
                peak = peak.max(out.abs());
            }
        }
        assert!(peak < 16384 / 4, "subcarrier leak {peak}");
    }

    #[test]
    fn reset_clears_state() {
        let mut f = YiqLowPass::new();
        for _ in 0..32 {
            f.y.filter(12000);
            f.i.filter(-9000);
            f.q.filter(4000);
        }
        f.reset();
        assert_eq!(f.y.filter(0), 0);
        assert_eq!(f.i.filter(0), 0);
        assert_eq!(f.q.filter(0), 0);
    }
}
