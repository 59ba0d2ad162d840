//! Receiver signal assembly.
//!
//! Fills `rx_signal` from the noise floor plus every reception, working in
//! aligned 2048-sample blocks. Each block seeks the noise LCG with the jump
//! function and restarts its ghost-FIR delay line, so the assembled signal is
//! identical no matter how the blocks are distributed over workers.

use super::TvEngine;
use crate::{
    noise::NoiseLcg,
    ntsc::{GHOSTFIR_LEN, H, SIGNAL_LEN},
    reception::Reception,
    signal::InputSignal,
};

/// Samples per work unit; must stay 4-aligned for the FIR stride.
const BLOCK: usize = 2048;

/// Everything a worker needs to fill one block.
struct MixParams<'a> {
    noise_mul: f32,
    random0: u32,
    random1: u32,
    channel_change_cycles: usize,
    receptions: &'a [Reception],
    stations: &'a [InputSignal],
}

impl TvEngine {
    pub(super) fn assemble(
        &mut self,
        noise_level: f64,
        receptions: &[Reception],
        stations: &[InputSignal],
    ) {
        let params = MixParams {
            noise_mul: ((150.0 * noise_level).sqrt() / f64::from(0x7fff_ffffu32)) as f32,
            random0: self.random0,
            random1: self.random1,
            channel_change_cycles: self.channel_change_cycles,
            receptions,
            stations,
        };

        let (body, _) = self.rx_signal.split_at_mut(SIGNAL_LEN);
        let threads = self.threads.clamp(1, SIGNAL_LEN.div_ceil(BLOCK));
        if threads == 1 {
            for (b, block) in body.chunks_mut(BLOCK).enumerate() {
                fill_block(block, b * BLOCK, &params);
            }
        } else {
            let nblocks = SIGNAL_LEN.div_ceil(BLOCK);
            let per_worker = nblocks.div_ceil(threads) * BLOCK;
            std::thread::scope(|scope| {
                let params = &params;
                let mut rest = body;
                let mut start = 0;
                while !rest.is_empty() {
                    let take = per_worker.min(rest.len());
                    let (head, tail) = rest.split_at_mut(take);
                    rest = tail;
                    scope.spawn(move || {
                        for (b, block) in head.chunks_mut(BLOCK).enumerate() {
                            fill_block(block, start + b * BLOCK, params);
                        }
                    });
                    start += take;
                }
            });
        }

        self.channel_change_cycles = 0;

        // Wrap-duplicate the first two lines past the end so sync and
        // demodulation can overrun without modular indexing.
        let (body, tail) = self.rx_signal.split_at_mut(SIGNAL_LEN);
        tail.copy_from_slice(&body[..2 * H]);
    }
}

fn fill_block(out: &mut [f32], start: usize, params: &MixParams<'_>) {
    // Shaped noise floor: the product of consecutive uniform samples, which
    // has mean zero and heavier tails than a Gaussian.
    let mut lcg = NoiseLcg::seek(params.random0, start as u64);
    let mut nm1 = lcg.value() as f32 * params.noise_mul;
    for sample in out.iter_mut() {
        lcg.advance();
        let np1 = lcg.value() as f32 * params.noise_mul;
        *sample = nm1 * np1;
        nm1 = np1;
    }

    let end = start + out.len();
    for (k, rec) in params.receptions.iter().enumerate() {
        let signal = params.stations[rec.station].samples();
        let level = rec.level;

        // Only the primary reception carries the channel-change burst.
        let change = if k == 0 {
            params.channel_change_cycles
        } else {
            0
        };
        let skip = change.clamp(start, end) - start;
        if skip > 0 {
            let mut lcg = NoiseLcg::seek(params.random1, start as u64);
            const DECAY: f32 = 0.99995;
            let mut amp = 1.3 * DECAY.powi(start as i32);
            for (i, sample) in out[..skip].iter_mut().enumerate() {
                let idx = (rec.ofs + start + i) % SIGNAL_LEN;
                let noise = lcg.value() as f32 * (50.0 / 0x7fff_ffff as f32);
                lcg.advance();
                *sample += f32::from(signal[idx]) * level * (1.0 - amp) + noise * amp;
                amp *= DECAY;
            }
        }

        // Steady mixing, four samples at a stride: direct signal plus the
        // ghost FIR over sums of previous sample quads, plus HF loss fed
        // back two samples out of phase.
        let fir = rec.ghostfir;
        let hfloss = rec.hfloss;
        let mut dp = [0f32; GHOSTFIR_LEN + 1];
        let mut i = (skip + 3) & !3;
        while i + 4 <= out.len() {
            let base = (rec.ofs + start + i) % SIGNAL_LEN;
            let s0 = f32::from(signal[base]);
            let s1 = f32::from(signal[base + 1]);
            let s2 = f32::from(signal[base + 2]);
            let s3 = f32::from(signal[base + 3]);
            dp[0] = s0 + s1 + s2 + s3;
            let ghost = dp[1] * fir[0] + dp[2] * fir[1] + dp[3] * fir[2] + dp[4] * fir[3];
            out[i] += (s0 + ghost + s2 * hfloss) * level;
            out[i + 1] += (s1 + ghost + s3 * hfloss) * level;
            out[i + 2] += (s2 + ghost + s0 * hfloss) * level;
            out[i + 3] += (s3 + ghost + s1 * hfloss) * level;
            dp.copy_within(0..GHOSTFIR_LEN, 1);
            i += 4;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::SourceEncoder,
        engine::EngineConfig,
        ntsc::BLANK_LEVEL,
    };

    fn test_station() -> InputSignal {
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, true, false);
        enc.draw_solid_rel_lcp(&mut sig, 0.0, 1.0, 0.0, 1.0, 75.0, 0.0, 0.0);
        sig.seal();
        sig
    }

    fn engine(threads: usize) -> TvEngine {
        TvEngine::new(EngineConfig {
            width: 320,
            height: 240,
            seed: 99,
            threads,
        })
    }

    #[test]
    fn no_signal_and_no_noise_yields_silence() {
        let mut tv = engine(1);
        tv.random0 = 123;
        tv.random1 = 456;
        tv.assemble(0.0, &[], &[]);
        assert!(tv.rx_signal.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn assembly_is_identical_across_thread_counts() {
        let stations = vec![test_station()];
        let mut rec = Reception::new(0);
        rec.level = 0.8;
        rec.ofs = 12_345;
        rec.multipath = 0.0;
        rec.hfloss = 0.2;

        let mut one = engine(1);
        let mut many = engine(7);
        for tv in [&mut one, &mut many] {
            tv.random0 = 0xfeed_f00d;
            tv.random1 = 0x0bad_cafe;
            tv.channel_change_cycles = super::super::CHANNEL_CHANGE_CYCLES;
            tv.assemble(0.3, std::slice::from_ref(&rec), &stations);
        }
        assert_eq!(one.rx_signal, many.rx_signal);
    }

    #[test]
    fn wrap_tail_mirrors_the_head() {
        let stations = vec![test_station()];
        let rec = Reception::new(0);
        let mut tv = engine(2);
        tv.random0 = 1;
        tv.random1 = 2;
        tv.assemble(0.1, std::slice::from_ref(&rec), &stations);
        for k in 0..2 * H {
            assert_eq!(tv.rx_signal[SIGNAL_LEN + k], tv.rx_signal[k]);
        }
    }

    #[test]
    fn blank_signal_mixes_to_its_level() {
        // A reception of a blank (all-zero picture interval) signal adds
        // nothing outside sync; with zero noise, mid-picture samples stay
        // close to the blanking level times the mild ghost energy.
        let mut sig = InputSignal::new();
        sig.seal();
        let stations = vec![sig];
        let mut rec = Reception::new(0);
        rec.ghostfir = [0.0; GHOSTFIR_LEN];
        let mut tv = engine(1);
        tv.random0 = 7;
        tv.random1 = 8;
        tv.assemble(0.0, std::slice::from_ref(&rec), &stations);
        assert!(tv
            .rx_signal
            .iter()
            .all(|&s| (s - f32::from(BLANK_LEVEL)).abs() < 1e-6));
    }
}
