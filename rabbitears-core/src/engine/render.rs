//! Line demodulation and CRT rendering.
//!
//! Each visible signal line is demodulated to Y/I/Q, resampled through the
//! beam geometry (bloom, desync shift, right-edge squish) into a row of RGB,
//! then replicated vertically through the level table into the BGRA CRT
//! image. Lines own disjoint row ranges, so the per-line work fans out over
//! the worker pool.

use super::{Level, TvEngine};
use crate::{
    filter::YiqLowPass,
    ntsc::{BLACK_LEVEL, BOT, H, MAX_LINEHEIGHT, PIC_LEN, SCALE, SIGNAL_LEN, TOP, VISLINES},
};

/// Demodulation scratch extends past the picture so the resampler can
/// interpolate at both edges.
const YIQ_LEN: usize = PIC_LEN + 10;

/// One visible line's render geometry.
#[derive(Debug, Clone, Copy)]
struct LineSeg {
    lineno: usize,
    /// Clipped CRT row range this line writes.
    ytop: usize,
    ybot: usize,
    /// Unclipped replication height; indexes the level table.
    height: usize,
    /// Offset of `ytop` within the unclipped span.
    off0: usize,
    sig_offset: usize,
}

/// Frame-constant state shared by the render workers.
struct RenderCtx<'a> {
    rx: &'a [f32],
    line_cb_phase: &'a [[f32; 4]],
    crtload: &'a [f32],
    leveltable: &'a [[Level; MAX_LINEHEIGHT + 1]; MAX_LINEHEIGHT + 1],
    intensity: &'a [u8; 1024],
    agclevel: f32,
    tint_i: f64,
    tint_q: f64,
    color_control: f64,
    brightness_control: f64,
    horiz_desync: f64,
    subwidth: usize,
    usewidth: usize,
    xrepl: usize,
    scanwidth: f64,
    squish_ramp: f64,
    squish_control: f64,
    pixbright: f64,
}

/// Per-worker buffers; allocated once per worker, not per line.
struct Scratch {
    ys: Vec<f32>,
    is: Vec<f32>,
    qs: Vec<f32>,
    rgb: Vec<f32>,
    filters: YiqLowPass,
}

impl Scratch {
    fn new(subwidth: usize) -> Self {
        Self {
            ys: vec![0.0; YIQ_LEN],
            is: vec![0.0; YIQ_LEN],
            qs: vec![0.0; YIQ_LEN],
            rgb: vec![0.0; subwidth * 3],
            filters: YiqLowPass::new(),
        }
    }
}

impl TvEngine {
    pub(super) fn render_frame(&mut self) {
        let segs = self.line_segments();
        if segs.is_empty() {
            return;
        }

        let ctx = RenderCtx {
            rx: &self.rx_signal,
            line_cb_phase: &self.line_cb_phase,
            crtload: &self.crtload,
            leveltable: &self.leveltable,
            intensity: &self.intensity_values,
            agclevel: self.agclevel,
            tint_i: self.tint_i,
            tint_q: self.tint_q,
            color_control: self.knobs.color_control,
            brightness_control: self.knobs.brightness_control,
            horiz_desync: self.knobs.horiz_desync,
            subwidth: self.subwidth,
            usewidth: self.usewidth,
            xrepl: self.xrepl,
            scanwidth: self.knobs.width_control * self.puramp(0.5, 0.3, 1.0),
            squish_ramp: 0.25 + 0.25 * self.puramp(2.0, 0.0, 1.1),
            squish_control: self.knobs.squish_control,
            pixbright: self.knobs.contrast_control * self.puramp(1.0, 0.0, 1.0)
                / (0.5 + 0.5 * self.puheight)
                * 1024.0
                / 100.0,
        };

        let stride = self.usewidth * 4;
        let threads = self.threads.clamp(1, segs.len());
        if threads == 1 {
            let mut scratch = Scratch::new(ctx.subwidth);
            for seg in &segs {
                render_line(&ctx, seg, &mut self.crt, 0, &mut scratch);
            }
            return;
        }

        // Partition the lines into contiguous spans with roughly equal row
        // counts; each span owns a disjoint range of CRT rows.
        let total_rows: usize = segs.iter().map(|s| s.ybot - s.ytop).sum();
        let per_span = total_rows.div_ceil(threads).max(1);
        let mut spans: Vec<(usize, usize)> = Vec::with_capacity(threads);
        let mut begin = 0;
        let mut rows = 0;
        for (i, seg) in segs.iter().enumerate() {
            rows += seg.ybot - seg.ytop;
            if rows >= per_span || i + 1 == segs.len() {
                spans.push((begin, i + 1));
                begin = i + 1;
                rows = 0;
            }
        }

        std::thread::scope(|scope| {
            let ctx = &ctx;
            let segs = &segs;
            let mut rest: &mut [u8] = &mut self.crt;
            let mut consumed = 0;
            for &(lo, hi) in &spans {
                let span_hi = segs[hi - 1].ybot;
                let (head, tail) = rest.split_at_mut((span_hi - consumed) * stride);
                rest = tail;
                let base = consumed;
                scope.spawn(move || {
                    let mut scratch = Scratch::new(ctx.subwidth);
                    for seg in &segs[lo..hi] {
                        render_line(ctx, seg, head, base, &mut scratch);
                    }
                });
                consumed = span_hi;
            }
        });
    }

    /// Computes each visible line's CRT row range from the current power-up
    /// height, clipped to the tube face and forced monotone so render
    /// workers never share a row.
    fn line_segments(&self) -> Vec<LineSeg> {
        let u = self.useheight as i64;
        let uf = self.useheight as f64;
        let mut segs = Vec::with_capacity(VISLINES);
        let mut prev_bot = 0i64;
        for lineno in TOP..BOT {
            let slineno = (lineno - TOP) as f64;
            let mut puheight = self.puheight;
            if self.shrinkpulse == Some(lineno) {
                puheight *= 0.8;
            }
            let ytop_u =
                ((slineno * uf / VISLINES as f64 - uf / 2.0) * puheight + uf / 2.0) as i64;
            let mut ybot_u =
                (((slineno + 1.0) * uf / VISLINES as f64 - uf / 2.0) * puheight + uf / 2.0) as i64;
            if ybot_u == ytop_u {
                continue;
            }
            if ybot_u > ytop_u + MAX_LINEHEIGHT as i64 {
                ybot_u = ytop_u + MAX_LINEHEIGHT as i64;
            }
            if ytop_u >= u || ybot_u <= 0 {
                continue;
            }
            let ytop = ytop_u.max(prev_bot).max(0);
            let ybot = ybot_u.min(u);
            if ybot <= ytop {
                continue;
            }
            prev_bot = ybot;
            segs.push(LineSeg {
                lineno,
                ytop: ytop as usize,
                ybot: ybot as usize,
                height: (ybot_u - ytop_u) as usize,
                off0: (ytop - ytop_u) as usize,
                sig_offset: (lineno * H + self.line_hsync[lineno]) % SIGNAL_LEN,
            });
        }
        segs
    }
}

/// Demodulates one line's picture interval into Y/I/Q at IRE scale.
///
/// Chroma is recovered by multiplying the composite with the quadrature
/// reference rebuilt from the tracked colourburst phase, rotated by the tint
/// knob; without a credible burst the line demodulates monochrome.
fn ntsc_to_yiq(ctx: &RenderCtx<'_>, seg: &LineSeg, start: usize, end: usize, scr: &mut Scratch) {
    let phasecorr = seg.sig_offset & 3;
    let lcb = &ctx.line_cb_phase[seg.lineno];
    let cb_i = f64::from(lcb[(2 + phasecorr) & 3] - lcb[phasecorr & 3]) / 16.0;
    let cb_q = f64::from(lcb[(3 + phasecorr) & 3] - lcb[(1 + phasecorr) & 3]) / 16.0;
    let colormode = cb_i * cb_i + cb_q * cb_q > 2.8;

    let mut multiq2 = [0f32; 4];
    if colormode {
        multiq2[0] = ((cb_i * ctx.tint_i - cb_q * ctx.tint_q) * ctx.color_control) as f32;
        multiq2[1] = ((cb_q * ctx.tint_i + cb_i * ctx.tint_q) * ctx.color_control) as f32;
        multiq2[2] = -multiq2[0];
        multiq2[3] = -multiq2[1];
    }

    let brightadd = (ctx.brightness_control * 100.0 - f64::from(BLACK_LEVEL)) as f32;
    scr.filters.reset();
    for i in start..end {
        let sig = ctx.rx[seg.sig_offset + i] * ctx.agclevel;
        // The shared fixed-point filters run at 128x the IRE scale.
        let fixed = sig * 128.0;
        let y = scr.filters.y.filter(fixed as i32);
        scr.ys[i] = y as f32 / 128.0 + brightadd;
        if colormode {
            let fi = scr.filters.i.filter((fixed * multiq2[i & 3]) as i32);
            let fq = scr.filters.q.filter((fixed * multiq2[(i + 3) & 3]) as i32);
            scr.is[i] = fi as f32 / 128.0;
            scr.qs[i] = fq as f32 / 128.0;
        } else {
            scr.is[i] = 0.0;
            scr.qs[i] = 0.0;
        }
    }
}

fn render_line(
    ctx: &RenderCtx<'_>,
    seg: &LineSeg,
    rows: &mut [u8],
    base_row: usize,
    scr: &mut Scratch,
) {
    let slineno = seg.lineno - TOP;
    let stride = ctx.usewidth * 4;

    let bloom = (-10.0 * f64::from(ctx.crtload[seg.lineno])).clamp(-10.0, 2.0);
    let shift = if slineno < 16 * SCALE {
        let sl = slineno as f64;
        ctx.horiz_desync * (-0.17 * sl).exp() * (0.7 + (sl * 0.6).cos())
    } else {
        0.0
    };
    let viswidth = PIC_LEN as f64 * 0.79 - 5.0 * bloom;
    let middle = PIC_LEN as f64 / 2.0 - shift;

    if ctx.scanwidth < 1e-6 {
        // Deflection hasn't warmed up; the beam never leaves the centre.
        for y in seg.ytop..seg.ybot {
            rows[(y - base_row) * stride..(y - base_row + 1) * stride].fill(0);
        }
        return;
    }

    // The scan is clamped to the scratch row, not to usewidth: with xrepl 2
    // a usewidth clamp would push scw past subwidth and underflow scl.
    let scw = ((ctx.subwidth as f64 * ctx.scanwidth) as usize).min(ctx.subwidth);
    let scl = ctx.subwidth / 2 - scw / 2;
    let scr_edge = scl + scw;

    let pixrate = ((viswidth * 65536.0 / ctx.subwidth as f64) / ctx.scanwidth) as i64;
    let scanstart_i = ((middle - viswidth * 0.5) * 65536.0) as i64;
    let scanend_i = ((PIC_LEN - 1) * 65536) as i64;
    let squishright_i =
        ((middle + viswidth * (ctx.squish_ramp - ctx.squish_control)) * 65536.0) as i64;
    let squishdiv = (ctx.subwidth / 15).max(1) as i64;

    let start = ((scanstart_i >> 16) - 10).max(0) as usize;
    let end = (((scanend_i >> 16) + 10) as usize).min(YIQ_LEN - 1);
    ntsc_to_yiq(ctx, seg, start, end, scr);

    // Resample the demodulated line through the beam position, 16.16 fixed
    // point, squishing the right edge as the flyback runs out of current.
    scr.rgb[..scl * 3].iter_mut().for_each(|v| *v = 0.0);
    let mut bright = ctx.pixbright as f32;
    let mut pixmultinc = pixrate;
    let mut i = scanstart_i;
    let mut x = scl;
    while i < 0 && x < scr_edge {
        scr.rgb[x * 3..x * 3 + 3].fill(0.0);
        i += pixrate;
        x += 1;
    }
    while i < scanend_i && x < scr_edge {
        let pati = (i >> 16) as usize;
        let frac = (i & 0xffff) as f32 / 65536.0;
        let inv = 1.0 - frac;
        let y = scr.ys[pati] * inv + scr.ys[pati + 1] * frac;
        let iv = scr.is[pati] * inv + scr.is[pati + 1] * frac;
        let qv = scr.qs[pati] * inv + scr.qs[pati + 1] * frac;
        let r = (y + 0.948 * iv + 0.624 * qv) * bright;
        let g = (y - 0.276 * iv - 0.639 * qv) * bright;
        let b = (y - 1.105 * iv + 1.729 * qv) * bright;
        scr.rgb[x * 3] = r.max(0.0);
        scr.rgb[x * 3 + 1] = g.max(0.0);
        scr.rgb[x * 3 + 2] = b.max(0.0);
        if i >= squishright_i {
            pixmultinc += pixmultinc / squishdiv;
            bright += bright / squishdiv as f32 / 2.0;
        }
        i += pixmultinc;
        x += 1;
    }
    scr.rgb[x * 3..].iter_mut().for_each(|v| *v = 0.0);

    // Vertical replication: rows sharing a beam intensity class are
    // identical, so render each class once and memcpy the rest.
    let mut copyfrom: [Option<usize>; 3] = [None; 3];
    for y in seg.ytop..seg.ybot {
        let level = ctx.leveltable[seg.height][seg.off0 + (y - seg.ytop)];
        let dst = (y - base_row) * stride;
        if let Some(src) = copyfrom[level.index] {
            rows.copy_within(src..src + stride, dst);
            continue;
        }
        copyfrom[level.index] = Some(dst);
        let mut o = dst;
        for px in scr.rgb.chunks_exact(3) {
            let ri = ((px[0] * level.value).round() as usize).min(1023);
            let gi = ((px[1] * level.value).round() as usize).min(1023);
            let bi = ((px[2] * level.value).round() as usize).min(1023);
            let (rv, gv, bv) = (ctx.intensity[ri], ctx.intensity[gi], ctx.intensity[bi]);
            for _ in 0..ctx.xrepl {
                rows[o] = bv;
                rows[o + 1] = gv;
                rows[o + 2] = rv;
                rows[o + 3] = 0;
                o += 4;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::SourceEncoder,
        engine::{EngineConfig, TvEngine},
        raster::Raster,
        reception::Reception,
        signal::InputSignal,
    };

    fn engine() -> TvEngine {
        TvEngine::new(EngineConfig {
            width: 320,
            height: 240,
            seed: 11,
            threads: 1,
        })
    }

    fn solid_station(luma: f64) -> InputSignal {
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, true, false);
        enc.draw_solid_rel_lcp(&mut sig, 0.0, 1.0, 0.0, 1.0, luma, 0.0, 0.0);
        sig.seal();
        sig
    }

    /// Drives a full draw, then demodulates a mid-screen line directly and
    /// checks the recovered luma against what was encoded.
    #[test]
    fn solid_luma_survives_demodulation() {
        for luma in [15.0, 36.0, 75.0, 100.0] {
            let stations = vec![solid_station(luma)];
            let rec = Reception::new(0);
            let mut tv = engine();
            // Neutral brightness: value*100 == BLACK cancels the setup level.
            tv.knobs.brightness_control = 0.10;
            let mut out = Raster::new(320, 240);
            for _ in 0..3 {
                tv.draw(&mut out, 0.0, std::slice::from_ref(&rec), &stations)
                    .expect("draw");
            }

            let segs = tv.line_segments();
            let seg = segs[segs.len() / 2];
            let ctx = RenderCtx {
                rx: &tv.rx_signal,
                line_cb_phase: &tv.line_cb_phase,
                crtload: &tv.crtload,
                leveltable: &tv.leveltable,
                intensity: &tv.intensity_values,
                agclevel: tv.agclevel,
                tint_i: tv.tint_i,
                tint_q: tv.tint_q,
                color_control: tv.knobs.color_control,
                brightness_control: tv.knobs.brightness_control,
                horiz_desync: 0.0,
                subwidth: tv.subwidth,
                usewidth: tv.usewidth,
                xrepl: tv.xrepl,
                scanwidth: 1.0,
                squish_ramp: 0.5,
                squish_control: 0.0,
                pixbright: 1.0,
            };
            let mut scr = Scratch::new(tv.subwidth);
            ntsc_to_yiq(&ctx, &seg, 0, YIQ_LEN - 1, &mut scr);
            let mid = PIC_LEN / 2;
            let mean: f64 = scr.ys[mid - 100..mid + 100]
                .iter()
                .map(|&v| f64::from(v))
                .sum::<f64>()
                / 200.0;
            let err = (mean - luma).abs() / luma;
            assert!(err < 0.05, "luma {luma} demodulated to {mean} ({err:.3})");
        }
    }

    #[test]
    fn rendering_matches_across_thread_counts() {
        let stations = vec![solid_station(75.0)];
        let rec = Reception::new(0);
        let mut out1 = Raster::new(320, 240);
        let mut out8 = Raster::new(320, 240);

        let mut tv = engine();
        for _ in 0..4 {
            tv.draw(&mut out1, 0.06, std::slice::from_ref(&rec), &stations)
                .expect("draw");
        }
        let mut tv = engine();
        tv.set_threads(8);
        for _ in 0..4 {
            tv.draw(&mut out8, 0.06, std::slice::from_ref(&rec), &stations)
                .expect("draw");
        }
        assert_eq!(out1.data(), out8.data());
    }

    #[test]
    fn no_signal_renders_black() {
        let mut tv = engine();
        let mut out = Raster::filled(320, 240, [7, 7, 7, 255]);
        for _ in 0..2 {
            tv.draw(&mut out, 0.0, &[], &[]).expect("draw");
        }
        assert!(tv.rx_signal().iter().all(|&s| s == 0.0));
        for px in out.data().chunks_exact(4) {
            assert_eq!(&px[..3], &[0, 0, 0], "lit pixel in dead-air frame");
        }
    }

    #[test]
    fn line_segments_are_disjoint_and_bounded() {
        let mut tv = engine();
        tv.knobs.powerup = 3.0;
        tv.puheight = tv.puramp(2.0, 1.0, 1.3) * (1.125 - 0.125 * tv.puramp(2.0, 2.0, 1.1));
        let segs = tv.line_segments();
        let mut prev_bot = 0;
        for seg in &segs {
            assert!(seg.ytop >= prev_bot);
            assert!(seg.ybot <= tv.useheight);
            assert!(seg.height <= MAX_LINEHEIGHT);
            assert!(seg.off0 + (seg.ybot - seg.ytop) <= seg.height.max(1));
            prev_bot = seg.ybot;
        }
    }
}
