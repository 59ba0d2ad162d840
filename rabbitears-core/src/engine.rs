//! The television receiver.
//!
//! [`TvEngine`] owns the receiver signal buffer, AGC state, sync trackers,
//! colourburst phase, scan-line level tables and the CRT image. One call to
//! [`TvEngine::draw`] takes a channel's receptions plus a noise level and
//! produces one output frame:
//!
//! 1. assemble `rx_signal` from noise and the mixed receptions,
//! 2. recover vertical/horizontal sync and colourburst phase,
//! 3. integrate the knob set and power-up ramps,
//! 4. demodulate and render each visible line, and
//! 5. blit the CRT image into the output raster.

mod mix;
mod render;
mod sync;

use crate::{
    error::{Error, Result},
    ntsc::{BOT, H, MAX_LINEHEIGHT, PIC_LEN, SCALE, SIGNAL_LEN, TOP, V, VISLINES},
    raster::Raster,
    reception::Reception,
    signal::InputSignal,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::trace;

/// Samples of decaying noise burst inserted after a channel change.
pub const CHANNEL_CHANGE_CYCLES: usize = 200_000 * SCALE;

/// Seconds after power-on at which the set is considered fully warm.
pub const POWERUP_DURATION: f64 = 6.0;

/// The set's front-panel (and service-panel) controls. The controller writes
/// these before every [`TvEngine::draw`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Knobs {
    /// Chroma demodulation phase rotation, in degrees.
    pub tint_control: f64,
    /// Chroma gain; 0 is monochrome.
    pub color_control: f64,
    /// Added to demodulated luma as `value · 100 − BLACK`.
    pub brightness_control: f64,
    /// Output RGB gain.
    pub contrast_control: f64,
    /// Vertical size.
    pub height_control: f64,
    /// Horizontal size.
    pub width_control: f64,
    /// Right-edge compression aggressiveness.
    pub squish_control: f64,
    /// Row-shift amplitude for the top of the frame.
    pub horiz_desync: f64,
    /// Bottom-of-frame shrink coupled to the CRT load.
    pub squeezebottom: f64,
    /// Seconds since power-on; 900 or more means fully on.
    pub powerup: f64,
    /// Let `horiz_desync` wander on its own.
    pub flutter_horiz_desync: bool,
    /// Whether the periodic disturbance model may fire at all.
    pub hashnoise_enable: bool,
    /// Whether a disturbance is currently active.
    pub hashnoise_on: bool,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            tint_control: 5.0,
            color_control: 0.70,
            brightness_control: 0.02,
            contrast_control: 1.50,
            height_control: 1.0,
            width_control: 1.0,
            squish_control: 0.0,
            horiz_desync: 0.0,
            squeezebottom: 0.0,
            powerup: 1000.0,
            flutter_horiz_desync: false,
            hashnoise_enable: true,
            hashnoise_on: false,
        }
    }
}

/// Static configuration for a [`TvEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct EngineConfig {
    /// Output raster width in pixels.
    pub width: usize,
    /// Output raster height in pixels.
    pub height: usize,
    /// Seed for the engine's frame-level PRNG.
    pub seed: u64,
    /// Worker threads for the data-parallel phases; 0 means one per core.
    pub threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            seed: 0,
            threads: 1,
        }
    }
}

/// One slot of the scan-line replication table: which of the three beam
/// intensity classes a row belongs to, and its brightness multiplier.
#[derive(Debug, Clone, Copy, Default)]
struct Level {
    index: usize,
    value: f32,
}

/// The demodulator and renderer for one simulated set.
#[must_use]
pub struct TvEngine {
    // Geometry, fixed at construction.
    out_width: usize,
    out_height: usize,
    usewidth: usize,
    useheight: usize,
    xrepl: usize,
    subwidth: usize,
    threads: usize,

    /// The control panel; written by the controller each frame.
    pub knobs: Knobs,

    rng: StdRng,
    channel_change_cycles: usize,
    shrinkpulse: Option<usize>,
    random0: u32,
    random1: u32,

    /// Received signal; `SIGNAL_LEN` samples plus a `2·H` wrap-duplicate
    /// tail so inner loops can read past the end without modular indexing.
    rx_signal: Vec<f32>,
    agclevel: f32,

    cur_hsync: usize,
    cur_vsync: usize,
    line_hsync: Vec<usize>,
    cb_phase: [f32; 4],
    line_cb_phase: Vec<[f32; 4]>,

    crtload: Vec<f32>,
    tint_i: f64,
    tint_q: f64,
    puheight: f64,
    leveltable: [[Level; MAX_LINEHEIGHT + 1]; MAX_LINEHEIGHT + 1],
    intensity_values: [u8; 1024],

    /// The CRT face, BGRA, `usewidth × useheight`. Persists across frames so
    /// a shrunken raster leaves the previous glow outside it.
    crt: Vec<u8>,
}

impl TvEngine {
    pub fn new(config: EngineConfig) -> Self {
        let usewidth = (config.width & !1).max(2);
        let useheight = (config.height & !1).max(2);
        let xrepl = (1 + usewidth / 640).min(2);
        let subwidth = usewidth / xrepl;
        let threads = if config.threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            config.threads
        };

        let mut intensity_values = [0u8; 1024];
        for (i, value) in intensity_values.iter_mut().enumerate() {
            let intensity = ((i as f64 / 256.0).powf(0.8) * 65535.0).min(65535.0) as u32;
            *value = (intensity >> 8) as u8;
        }

        Self {
            out_width: config.width,
            out_height: config.height,
            usewidth,
            useheight,
            xrepl,
            subwidth,
            threads,
            knobs: Knobs::default(),
            rng: StdRng::seed_from_u64(config.seed),
            channel_change_cycles: 0,
            shrinkpulse: None,
            random0: 0,
            random1: 0,
            rx_signal: vec![0.0; SIGNAL_LEN + 2 * H],
            agclevel: 1.0,
            cur_hsync: 0,
            cur_vsync: 0,
            line_hsync: vec![0; V],
            cb_phase: [0.0; 4],
            line_cb_phase: vec![[0.0; 4]; V],
            crtload: vec![0.0; V],
            tint_i: 0.0,
            tint_q: 0.0,
            puheight: 0.0,
            leveltable: [[Level::default(); MAX_LINEHEIGHT + 1]; MAX_LINEHEIGHT + 1],
            intensity_values,
            crt: vec![0; usewidth * useheight * 4],
        }
    }

    #[must_use]
    pub const fn usewidth(&self) -> usize {
        self.usewidth
    }

    #[must_use]
    pub const fn useheight(&self) -> usize {
        self.useheight
    }

    #[must_use]
    pub const fn cur_hsync(&self) -> usize {
        self.cur_hsync
    }

    #[must_use]
    pub const fn cur_vsync(&self) -> usize {
        self.cur_vsync
    }

    /// The assembled receiver signal for the current frame.
    #[must_use]
    pub fn rx_signal(&self) -> &[f32] {
        &self.rx_signal[..SIGNAL_LEN]
    }

    /// Arms the decaying noise burst a channel change produces; consumed by
    /// the next [`TvEngine::draw`].
    pub fn set_channel_change(&mut self, cycles: usize) {
        self.channel_change_cycles = cycles;
    }

    #[must_use]
    pub const fn channel_change_cycles(&self) -> usize {
        self.channel_change_cycles
    }

    pub fn set_threads(&mut self, threads: usize) {
        self.threads = if threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            threads
        };
    }

    /// The shaped power-up envelope: `min(1, (1 − e^(−t/tc)) · over)²`, zero
    /// before `start` seconds of warm-up.
    fn puramp(&self, tc: f64, start: f64, over: f64) -> f64 {
        let pt = self.knobs.powerup - start;
        if pt <= 0.0 {
            return 0.0;
        }
        let ret = (1.0 - (-pt / tc).exp()) * over;
        if ret > 1.0 {
            1.0
        } else {
            ret * ret
        }
    }

    /// Renders one frame into `out` from the given receptions and noise
    /// level. `stations` is the table the receptions index into.
    pub fn draw(
        &mut self,
        out: &mut Raster,
        noise_level: f64,
        receptions: &[Reception],
        stations: &[InputSignal],
    ) -> Result<()> {
        for rec in receptions {
            if rec.station >= stations.len() {
                return Err(Error::UnknownStation(rec.station));
            }
            debug_assert!(stations[rec.station].is_sealed());
        }

        self.random0 = self.rng.gen();
        self.random1 = self.rng.gen();
        self.setup_frame();

        // AGC tracks the declared signal energy, not the measured one; a
        // ghost FIR adds (or, out of phase, removes) energy.
        let mut power = (noise_level * noise_level) as f32;
        for rec in receptions {
            let fir_sum: f32 = rec.ghostfir.iter().sum();
            power += (rec.level * rec.level * (1.0 + 4.0 * fir_sum)).max(0.0);
        }
        self.agclevel = 1.0 / power.sqrt().max(1e-6);

        self.assemble(noise_level, receptions, stations);
        self.sync();

        let r2 = self.puramp(2.0, 2.0, 1.1);
        self.puheight = self.puramp(2.0, 1.0, 1.3) * self.knobs.height_control
            * (1.125 - 0.125 * r2);
        let tint_angle = (103.0 + self.knobs.tint_control) * PI / 180.0;
        self.tint_i = -tint_angle.cos();
        self.tint_q = tint_angle.sin();

        let avgheight = self.puheight * self.useheight as f64 / VISLINES as f64;
        self.setup_levels(avgheight);
        self.compute_crtload();
        self.render_frame();
        self.shrinkpulse = None;
        self.blit(out);

        trace!(
            hsync = self.cur_hsync,
            vsync = self.cur_vsync,
            agc = f64::from(self.agclevel),
            "frame drawn"
        );
        Ok(())
    }

    /// Per-frame disturbances: desync flutter and the occasional
    /// shrink pulse.
    fn setup_frame(&mut self) {
        let knobs = &mut self.knobs;
        if knobs.flutter_horiz_desync {
            knobs.horiz_desync += self.rng.gen_range(-0.08..0.08) - knobs.horiz_desync / 20.0;
            knobs.horiz_desync = knobs.horiz_desync.clamp(-7.0, 7.0);
        }
        if knobs.hashnoise_enable {
            if !knobs.hashnoise_on && self.rng.gen_range(0..10_000) == 0 {
                knobs.hashnoise_on = true;
                self.shrinkpulse = Some(TOP + self.rng.gen_range(0..VISLINES));
            }
            if knobs.hashnoise_on && self.rng.gen_range(0..1_000) == 0 {
                knobs.hashnoise_on = false;
            }
        }
    }

    /// Serial leaky integration of per-line beam load; feeds bloom and the
    /// bottom squeeze.
    fn compute_crtload(&mut self) {
        self.crtload[TOP - 1] = 0.5;
        let squeeze_start = BOT - 60 * SCALE;
        for lineno in TOP..BOT {
            let ofs = (lineno * H + self.line_hsync[lineno]) % SIGNAL_LEN;
            let totsignal: f32 =
                self.rx_signal[ofs..ofs + PIC_LEN].iter().sum::<f32>() * self.agclevel;
            let squeeze = if lineno >= squeeze_start {
                self.knobs.squeezebottom * (lineno - squeeze_start) as f64
                    / (60 * SCALE) as f64
            } else {
                0.0
            };
            self.crtload[lineno] = 0.95 * self.crtload[lineno - 1]
                + 0.05 * (0.5 + (totsignal - 30000.0) / 100000.0 + squeeze as f32);
        }
    }

    /// Recomputes the scan-line replication table for the current average
    /// line height. The endpoints of a tall line render dimmer than the
    /// middle, which is where the banding comes from.
    fn setup_levels(&mut self, avgheight: f64) {
        const LEVELFAC: [f64; 3] = [-7.5, 5.5, 24.5];
        let ramp = self.puramp(3.0, POWERUP_DURATION, 1.0);
        let hmax = ((avgheight.max(0.0) as usize) + 2).min(MAX_LINEHEIGHT);
        for height in 0..=hmax {
            for i in 0..height {
                self.leveltable[height][i].index = 2;
            }
            if avgheight >= 3.0 {
                self.leveltable[height][0].index = 0;
            }
            if avgheight >= 5.0 && height >= 1 {
                self.leveltable[height][height - 1].index = 0;
            }
            if avgheight >= 7.0 && height >= 2 {
                self.leveltable[height][1].index = 1;
                self.leveltable[height][height - 2].index = 1;
            }
            for i in 0..height {
                let index = self.leveltable[height][i].index;
                self.leveltable[height][i].value =
                    ((40.0 + LEVELFAC[index] * ramp) / 256.0) as f32;
            }
        }
    }

    /// Copies the CRT face into the output raster, centred, BGRA → RGBA.
    fn blit(&self, out: &mut Raster) {
        let xo = out.width().saturating_sub(self.usewidth) / 2;
        let yo = out.height().saturating_sub(self.useheight) / 2;
        let stride = self.usewidth * 4;
        for y in 0..self.useheight {
            if y + yo >= out.height() {
                break;
            }
            let src = &self.crt[y * stride..(y + 1) * stride];
            let dst = out.row_mut(y + yo);
            for (x, px) in src.chunks_exact(4).enumerate() {
                let o = (xo + x) * 4;
                if o + 4 > dst.len() {
                    break;
                }
                dst[o] = px[2];
                dst[o + 1] = px[1];
                dst[o + 2] = px[0];
                dst[o + 3] = 255;
            }
        }
    }
}

impl std::fmt::Debug for TvEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvEngine")
            .field("out_width", &self.out_width)
            .field("out_height", &self.out_height)
            .field("usewidth", &self.usewidth)
            .field("useheight", &self.useheight)
            .field("threads", &self.threads)
            .field("knobs", &self.knobs)
            .finish_non_exhaustive()
    }
}
