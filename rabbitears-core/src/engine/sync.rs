//! Sync recovery and colourburst phase tracking.
//!
//! Both trackers are loop oscillators: the free-running period is slightly
//! long (the 1.05/1.005 factors) and the received signal pulls the trigger
//! point earlier. A strong sync tip locks; a weak one drifts, which is how
//! the picture tears when the signal is bad.

use super::TvEngine;
use crate::ntsc::{CB_START, H, SCALE, V};

impl TvEngine {
    pub(super) fn sync(&mut self) {
        let s = SCALE as i32;
        let rx = &self.rx_signal;
        let agc = self.agclevel;

        // Vertical: one 16·S-tap comb per candidate line.
        let stride = H / (16 * SCALE);
        let mut step = 32 * s;
        for i in -32 * s..32 * s {
            let lineno = (self.cur_vsync as i32 + i).rem_euclid(V as i32) as usize;
            let mut filt = 0.0f32;
            for j in (0..H).step_by(stride) {
                filt += rx[lineno * H + j];
            }
            filt *= agc;
            let osc = (V as f32 + i as f32) / V as f32;
            if osc >= 1.05 + 0.0002 * filt {
                step = i;
                break;
            }
        }
        self.cur_vsync = (self.cur_vsync as i32 + step).rem_euclid(V as i32) as usize;

        // Horizontal, per line, skipping the vertical retrace interval.
        // Line 0 is read through the wrap rows at the tail so the 4-tap comb
        // can look behind the line start.
        let mut cur_hsync = self.cur_hsync as i32;
        const CBFC: f32 = 1.0 / 128.0;
        for lineno in 0..V {
            let lineno2 = {
                let l = (lineno + self.cur_vsync) % V;
                if l == 0 {
                    V
                } else {
                    l
                }
            };
            if lineno > 5 * SCALE && lineno < V - 3 * SCALE {
                let base = (lineno2 * H) as i64 + i64::from(cur_hsync);
                let mut step = 8 * s;
                for i in -8 * s..8 * s {
                    let p = (base + i64::from(i)) as usize;
                    let filt = (rx[p - 3] + rx[p - 2] + rx[p - 1] + rx[p]) * agc;
                    let osc = (H as f32 + i as f32) / H as f32;
                    if osc >= 1.005 + 0.0001 * filt {
                        step = i;
                        break;
                    }
                }
                cur_hsync = (cur_hsync + step).rem_euclid(H as i32);
            }

            self.line_hsync[lineno] = (cur_hsync as usize + crate::ntsc::PIC_START) % H;

            // The colourburst is 9 cycles on the back porch; average the
            // middle cycles into the running phase accumulator, aligned to
            // the recovered hsync so the four phase classes stay put.
            if lineno > 15 * SCALE {
                let base = lineno2 * H + (cur_hsync as usize & !3);
                for i in CB_START + 8 * SCALE..CB_START + 28 * SCALE {
                    self.cb_phase[i & 3] =
                        self.cb_phase[i & 3] * (1.0 - CBFC) + rx[base + i] * agc * CBFC;
                }
            }

            let total: f32 = 0.1 + self.cb_phase.iter().map(|c| c * c).sum::<f32>();
            let cbgain = 32.0 / total.sqrt();
            for k in 0..4 {
                self.line_cb_phase[lineno][k] = self.cb_phase[k] * cbgain;
            }
        }
        self.cur_hsync = cur_hsync as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::SourceEncoder,
        engine::EngineConfig,
        ntsc::SIGNAL_LEN,
        reception::Reception,
        signal::InputSignal,
    };

    fn station() -> InputSignal {
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, true, false);
        enc.draw_solid_rel_lcp(&mut sig, 0.0, 1.0, 0.0, 1.0, 55.0, 0.0, 0.0);
        sig.seal();
        sig
    }

    fn draw_frames(tv: &mut TvEngine, rec: &Reception, stations: &[InputSignal], n: usize) {
        let mut out = crate::raster::Raster::new(320, 240);
        for _ in 0..n {
            tv.draw(&mut out, 0.0, std::slice::from_ref(rec), stations)
                .expect("draw");
        }
    }

    #[test]
    fn hsync_locks_near_the_pulse() {
        let stations = vec![station()];
        let rec = Reception::new(0);
        let mut tv = TvEngine::new(EngineConfig {
            width: 320,
            height: 240,
            seed: 3,
            threads: 1,
        });
        draw_frames(&mut tv, &rec, &stations, 3);
        assert!(tv.cur_hsync() < 4 * SCALE || tv.cur_hsync() > H - 4 * SCALE,
            "hsync {} did not settle near 0", tv.cur_hsync());
    }

    #[test]
    fn hsync_follows_a_rotated_signal() {
        let stations = vec![station()];
        let shift = 40 * SCALE;
        let mut rec = Reception::new(0);
        rec.ofs = SIGNAL_LEN - shift;
        let mut tv = TvEngine::new(EngineConfig {
            width: 320,
            height: 240,
            seed: 3,
            threads: 1,
        });
        draw_frames(&mut tv, &rec, &stations, 3);
        let h = tv.cur_hsync() as i64;
        let err = (h - shift as i64).rem_euclid(H as i64).min(
            (shift as i64 - h).rem_euclid(H as i64),
        );
        assert!(err <= 4 * SCALE as i64, "hsync {h} vs expected {shift}");
    }

    #[test]
    fn colourburst_phase_is_strong_with_burst_present() {
        let stations = vec![station()];
        let rec = Reception::new(0);
        let mut tv = TvEngine::new(EngineConfig {
            width: 320,
            height: 240,
            seed: 3,
            threads: 1,
        });
        draw_frames(&mut tv, &rec, &stations, 2);
        let lcb = tv.line_cb_phase[V / 2];
        let pc = 0;
        let cb_i = (lcb[(2 + pc) & 3] - lcb[pc & 3]) / 16.0;
        let cb_q = (lcb[(3 + pc) & 3] - lcb[(1 + pc) & 3]) / 16.0;
        assert!(
            cb_i * cb_i + cb_q * cb_q > 2.8,
            "burst too weak: {:?}",
            lcb
        );
    }
}
