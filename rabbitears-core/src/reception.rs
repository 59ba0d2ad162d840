//! Transport of a station's signal to the tuner.

use crate::ntsc::{GHOSTFIR_LEN, SIGNAL_LEN};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum receptions a single channel mixes (a primary and one ghost).
pub const MAX_MULTICHAN: usize = 2;

/// How one station's signal arrives at the antenna: overall level, a phase
/// offset into the signal, a multipath ghost FIR and high-frequency loss.
///
/// The station itself is referenced by index into the runner's station
/// table. Transport state drifts once per frame via [`Reception::update`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Reception {
    /// Index of the [`crate::signal::InputSignal`] this reception carries.
    pub station: usize,
    /// Sample offset into the signal, `[0, SIGNAL_LEN)`.
    pub ofs: usize,
    /// Carrier level, `0.0` to about `2.0`.
    pub level: f32,
    /// Multipath severity, `[0, 1]`; drives the ghost FIR random walk.
    pub multipath: f32,
    /// Carrier frequency error in samples per frame of horizontal drift.
    pub freqerr: f32,
    /// The ghost FIR actually applied while mixing.
    pub ghostfir: [f32; GHOSTFIR_LEN],
    /// The slow-moving target the applied FIR chases.
    pub ghostfir2: [f32; GHOSTFIR_LEN],
    /// High-frequency loss mixed in two samples out of phase.
    pub hfloss: f32,
    /// Reserved second-order HF loss target.
    pub hfloss2: f32,
    #[serde(skip)]
    drift: f32,
}

impl Reception {
    /// The fixed mild ghost applied when there is no multipath to walk.
    pub const MILD_GHOST: [f32; GHOSTFIR_LEN] = [0.0, 0.0, -0.02, 0.01];

    pub fn new(station: usize) -> Self {
        Self {
            station,
            ofs: 0,
            level: 1.0,
            multipath: 0.0,
            freqerr: 0.0,
            ghostfir: Self::MILD_GHOST,
            ghostfir2: [0.0; GHOSTFIR_LEN],
            hfloss: 0.0,
            hfloss2: 0.0,
            drift: 0.0,
        }
    }

    /// Walks the transport for the next frame: the ghost taps random-walk
    /// with multipath severity and the carrier frequency error slides the
    /// signal offset.
    pub fn update(&mut self, rng: &mut impl Rng) {
        if self.multipath > 0.0 {
            for tap in &mut self.ghostfir2 {
                *tap += -*tap / 16.0 + self.multipath * (rng.gen::<f32>() * 0.02 - 0.01);
            }
            if rng.gen_range(0..20) == 0 {
                let tap = rng.gen_range(0..GHOSTFIR_LEN);
                self.ghostfir2[tap] = self.multipath * (rng.gen::<f32>() * 0.08 - 0.04);
            }
            for (tap, target) in self.ghostfir.iter_mut().zip(self.ghostfir2) {
                *tap = 0.8 * *tap + 0.2 * target;
            }
        } else {
            self.ghostfir = Self::MILD_GHOST;
        }
        if self.freqerr != 0.0 {
            self.drift += self.freqerr;
            let whole = self.drift as i64;
            self.drift -= whole as f32;
            self.ofs = (self.ofs as i64 + whole).rem_euclid(SIGNAL_LEN as i64) as usize;
        }
    }
}

/// The tuner set to one channel: up to [`MAX_MULTICHAN`] receptions plus a
/// noise level. The first reception is the primary; a second one, when
/// present, is a ghost station bleeding in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct ChannelSetting {
    pub receptions: Vec<Reception>,
    pub noise_level: f64,
}

impl ChannelSetting {
    /// Baseline snow on every channel.
    pub const DEFAULT_NOISE: f64 = 0.06;

    pub fn new() -> Self {
        Self {
            receptions: Vec::new(),
            noise_level: Self::DEFAULT_NOISE,
        }
    }
}

impl Default for ChannelSetting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn no_multipath_pins_the_mild_ghost() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rec = Reception::new(0);
        for _ in 0..100 {
            rec.update(&mut rng);
        }
        assert_eq!(rec.ghostfir, Reception::MILD_GHOST);
    }

    #[test]
    fn multipath_walk_stays_finite_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rec = Reception::new(0);
        rec.multipath = 1.0;
        for _ in 0..10_000 {
            rec.update(&mut rng);
            for tap in rec.ghostfir {
                assert!(tap.is_finite());
                assert!(tap.abs() < 1.0, "ghost tap ran away: {tap}");
            }
        }
    }

    #[test]
    fn freqerr_slides_the_offset() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rec = Reception::new(0);
        rec.freqerr = 2.5;
        for _ in 0..4 {
            rec.update(&mut rng);
        }
        assert_eq!(rec.ofs, 10);

        rec.freqerr = -3.0;
        for _ in 0..4 {
            rec.update(&mut rng);
        }
        assert_eq!(rec.ofs, SIGNAL_LEN - 2);
    }
}
