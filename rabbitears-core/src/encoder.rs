//! Raster to baseband composite encoding.
//!
//! A [`SourceEncoder`] turns pictures into [`InputSignal`]s: it lays down the
//! sync/colourburst scaffold, modulates an RGBA raster onto the picture
//! interval, and can draw solid rectangles and SMPTE bars directly in
//! luma/chroma/phase form.

use crate::{
    filter::YiqLowPass,
    ntsc::{
        BLACK_LEVEL, BLANK_LEVEL, CB_LEVEL, CB_START, BP_START, FP_START, H, PIC_END, PIC_LEN,
        PIC_START, SCALE, SYNC_LEVEL, SYNC_START, TOP, V, VISLINES, VIS_LEN, VIS_START,
        WHITE_LEVEL,
    },
    raster::Raster,
    signal::InputSignal,
};
use std::f64::consts::PI;

/// Rows of signal drawn above and below the visible window so vertical
/// overscan has something to show.
pub const Y_OVERSCAN: usize = 5 * SCALE;

/// Encodes rasters into composite signals sized for one output geometry.
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct SourceEncoder {
    out_w: usize,
    out_h: usize,
}

impl SourceEncoder {
    /// An encoder targeting an `out_w × out_h` output raster.
    pub fn new(out_w: usize, out_h: usize) -> Self {
        Self { out_w, out_h }
    }

    #[must_use]
    pub const fn out_width(&self) -> usize {
        self.out_w
    }

    #[must_use]
    pub const fn out_height(&self) -> usize {
        self.out_h
    }

    /// Writes the sync scaffold over the whole signal: horizontal sync
    /// pulses, vertical sync on lines `3S..7S`, black picture interval and,
    /// when `with_burst`, nine subcarrier cycles of colourburst on the back
    /// porch. `ssavi` inverts the sync level to white, which is what a
    /// scrambled premium channel looked like.
    pub fn setup_sync(&self, sig: &mut InputSignal, with_burst: bool, ssavi: bool) {
        let sync_level = if ssavi { WHITE_LEVEL } else { SYNC_LEVEL };
        for y in 0..V {
            let vsync = (3 * SCALE..7 * SCALE).contains(&y);
            let line = sig.line_mut(y);
            line[SYNC_START..BP_START].fill(if vsync { BLANK_LEVEL } else { sync_level });
            line[BP_START..PIC_START].fill(if vsync { sync_level } else { BLANK_LEVEL });
            line[PIC_START..FP_START].fill(BLACK_LEVEL);
            line[FP_START..H].fill(BLANK_LEVEL);
            if with_burst {
                for i in (CB_START..CB_START + 36 * SCALE).step_by(4) {
                    line[i + 1] += CB_LEVEL;
                    line[i + 3] -= CB_LEVEL;
                }
            }
        }
        sig.seal();
    }

    /// Modulates `pic` onto the signal's picture interval.
    ///
    /// `xoff`/`yoff` position the picture and `target_w`/`target_h` size it,
    /// all in output-pixel space; both are rescaled into signal samples and
    /// scan lines. When `mask` is given, mask pixels whose RGB is exactly
    /// black are treated as transparent and leave the signal untouched (the
    /// historical quirk: black IS transparent).
    pub fn load_image(
        &self,
        sig: &mut InputSignal,
        pic: &Raster,
        mask: Option<&Raster>,
        xoff: i32,
        yoff: i32,
        target_w: usize,
        target_h: usize,
    ) {
        if pic.width() == 0 || pic.height() == 0 || target_w == 0 || target_h == 0 {
            return;
        }
        let x_length = (PIC_LEN * target_w / self.out_w).min(PIC_LEN);
        let y_scanlength = (VISLINES + 2 * Y_OVERSCAN) * target_h / self.out_h;
        if x_length == 0 || y_scanlength == 0 {
            return;
        }
        let xoff = i64::from(xoff) * PIC_LEN as i64 / self.out_w as i64;
        let yoff = i64::from(yoff) * (VISLINES + 2 * Y_OVERSCAN) as i64 / self.out_h as i64;

        // Quadrature subcarrier reference; period four, phased to the burst.
        let mut multiq = vec![0i32; x_length + 4];
        for (i, q) in multiq.iter_mut().enumerate() {
            let phase = 90.0 * (1.0 - i as f64) - 303.0;
            *q = (-(PI / 180.0 * phase).cos() * 4096.0).round() as i32;
        }

        let mut filters = YiqLowPass::new();
        for y in 0..y_scanlength {
            let dy = y as i64 - Y_OVERSCAN as i64 + TOP as i64 + yoff;
            if dy < 0 || dy >= V as i64 {
                continue;
            }
            let picy1 = y * pic.height() / y_scanlength;
            let picy2 = (y * pic.height() + y_scanlength / 2) / y_scanlength;
            filters.reset();
            let line = sig.line_mut(dy as usize);
            for x in 0..x_length {
                let dx = PIC_START as i64 + xoff + x as i64;
                if dx < 0 {
                    continue;
                }
                if dx >= PIC_END as i64 {
                    break;
                }
                let picx = x * pic.width() / x_length;
                if let Some(mask) = mask {
                    let m = mask.pixel(
                        picx.min(mask.width() - 1),
                        picy1.min(mask.height() - 1),
                    );
                    if m[0] == 0 && m[1] == 0 && m[2] == 0 {
                        continue;
                    }
                }
                let p1 = pic.pixel(picx, picy1);
                let p2 = pic.pixel(picx, picy2.min(pic.height() - 1));
                // Two-row vertical average in 16-bit channel space.
                let (r1, g1, b1) = (
                    i32::from(p1[0]) << 8,
                    i32::from(p1[1]) << 8,
                    i32::from(p1[2]) << 8,
                );
                let (r2, g2, b2) = (
                    i32::from(p2[0]) << 8,
                    i32::from(p2[1]) << 8,
                    i32::from(p2[2]) << 8,
                );
                let rawy = (5 * r1 + 11 * g1 + 2 * b1 + 5 * r2 + 11 * g2 + 2 * b2) >> 7;
                let rawi = (10 * r1 - 4 * g1 - 5 * b1 + 10 * r2 - 4 * g2 - 5 * b2) >> 7;
                let rawq = (3 * r1 - 8 * g1 + 5 * b1 + 3 * r2 - 8 * g2 + 5 * b2) >> 7;

                let fy = filters.y.filter(rawy);
                let fi = filters.i.filter(rawi);
                let fq = filters.q.filter(rawq);

                let mut composite = fy + ((multiq[x] * fi + multiq[x + 3] * fq) >> 12);
                composite = ((composite * 100) >> 14) + i32::from(BLACK_LEVEL);
                line[dx as usize] = composite.clamp(0, 125) as i8;
            }
        }
    }

    /// Fills a rectangle given in coordinates relative to the visible window
    /// (`0.0..1.0` on both axes) with a luma/chroma/phase colour.
    pub fn draw_solid_rel_lcp(
        &self,
        sig: &mut InputSignal,
        left: f64,
        right: f64,
        top: f64,
        bot: f64,
        luma: f64,
        chroma: f64,
        phase: f64,
    ) {
        let ntsc = lcp_to_ntsc(luma, chroma, phase);
        let x1 = VIS_START + ((left * VIS_LEN as f64) as usize).min(VIS_LEN);
        let x2 = VIS_START + ((right * VIS_LEN as f64) as usize).min(VIS_LEN);
        let y1 = TOP + ((top * VISLINES as f64) as usize).min(VISLINES);
        let y2 = TOP + ((bot * VISLINES as f64) as usize).min(VISLINES);
        for y in y1..y2 {
            let line = sig.line_mut(y);
            for x in x1..x2 {
                line[x] = ntsc[x & 3];
            }
        }
    }

    /// Draws the SMPTE colour bar test pattern, optionally compositing a
    /// centred station logo (with its mask) over it.
    pub fn draw_smpte_bars(&self, sig: &mut InputSignal, logo: Option<(&Raster, &Raster)>) {
        const TOP_BARS: [(f64, f64, f64); 7] = [
            (75.0, 0.0, 0.0),    // gray
            (69.0, 31.0, 167.0), // yellow
            (56.0, 44.0, 283.5), // cyan
            (48.0, 41.0, 240.5), // green
            (36.0, 41.0, 60.5),  // magenta
            (28.0, 44.0, 103.5), // red
            (15.0, 31.0, 347.0), // blue
        ];
        const MID_BARS: [(f64, f64, f64); 7] = [
            (15.0, 31.0, 347.0),
            (7.0, 0.0, 0.0),
            (36.0, 41.0, 60.5),
            (7.0, 0.0, 0.0),
            (56.0, 44.0, 283.5),
            (7.0, 0.0, 0.0),
            (75.0, 0.0, 0.0),
        ];
        // -I, white, +Q, then the PLUGE black staircase.
        const FOOTER: [(f64, f64, f64, f64, f64); 8] = [
            (0.0, 1.0 / 6.0, 7.0, 40.0, 303.0),
            (1.0 / 6.0, 2.0 / 6.0, 100.0, 0.0, 0.0),
            (2.0 / 6.0, 3.0 / 6.0, 7.0, 40.0, 33.0),
            (3.0 / 6.0, 4.0 / 6.0, 7.0, 0.0, 0.0),
            (12.0 / 18.0, 13.0 / 18.0, 3.0, 0.0, 0.0),
            (13.0 / 18.0, 14.0 / 18.0, 7.0, 0.0, 0.0),
            (14.0 / 18.0, 15.0 / 18.0, 11.0, 0.0, 0.0),
            (5.0 / 6.0, 1.0, 7.0, 0.0, 0.0),
        ];

        for (i, &(l, c, p)) in TOP_BARS.iter().enumerate() {
            let x1 = i as f64 / 7.0;
            let x2 = (i + 1) as f64 / 7.0;
            self.draw_solid_rel_lcp(sig, x1, x2, 0.0, 0.68, l, c, p);
        }
        for (i, &(l, c, p)) in MID_BARS.iter().enumerate() {
            let x1 = i as f64 / 7.0;
            let x2 = (i + 1) as f64 / 7.0;
            self.draw_solid_rel_lcp(sig, x1, x2, 0.68, 0.75, l, c, p);
        }
        for &(x1, x2, l, c, p) in &FOOTER {
            self.draw_solid_rel_lcp(sig, x1, x2, 0.75, 1.0, l, c, p);
        }

        if let Some((pic, mask)) = logo {
            let xoff = (self.out_w as i32 - pic.width() as i32) / 2;
            let yoff = (self.out_h as i32 - pic.height() as i32) / 2;
            self.load_image(sig, pic, Some(mask), xoff, yoff, pic.width(), pic.height());
        }
    }
}

/// Converts luma/chroma/phase into the four samples of one subcarrier cycle.
fn lcp_to_ntsc(luma: f64, chroma: f64, phase: f64) -> [i8; 4] {
    let mut ntsc = [0i8; 4];
    for (k, sample) in ntsc.iter_mut().enumerate() {
        let w = 90.0 * k as f64 + phase;
        let value = luma + chroma * (PI / 180.0 * w).cos();
        *sample = value.clamp(0.0, 127.0) as i8;
    }
    ntsc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntsc::SIGNAL_LEN;

    fn bars_encoder() -> (SourceEncoder, InputSignal) {
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, true, false);
        (enc, sig)
    }

    #[test]
    fn sync_scaffold_has_one_sync_segment_per_line() {
        // Burst-free scaffold: the colourburst rides on top of the vsync
        // serration interval and would split the run.
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, false, false);
        for y in 0..V {
            let line = sig.line(y);
            let vsync = (3 * SCALE..7 * SCALE).contains(&y);
            let (lo, hi) = if vsync {
                (BP_START, PIC_START)
            } else {
                (SYNC_START, BP_START)
            };
            // Exactly one contiguous run at sync level.
            let mut runs = 0;
            let mut inside = false;
            for (x, &s) in line.iter().enumerate() {
                let is_sync = s == SYNC_LEVEL;
                if is_sync && !inside {
                    runs += 1;
                    assert_eq!(x, lo, "line {y}");
                    inside = true;
                } else if !is_sync && inside {
                    assert_eq!(x, hi, "line {y}");
                    inside = false;
                }
            }
            assert_eq!(runs, 1, "line {y}");
        }
    }

    #[test]
    fn colourburst_sums_to_zero_per_cycle() {
        let (_, sig) = bars_encoder();
        let line = sig.line(40);
        for i in (CB_START..CB_START + 36 * SCALE).step_by(4) {
            let sum: i32 = line[i..i + 4].iter().map(|&s| i32::from(s)).sum();
            assert_eq!(sum, 0, "burst cycle at {i}");
        }
    }

    #[test]
    fn load_image_stays_in_composite_range() {
        let (enc, mut sig) = bars_encoder();
        let mut pic = Raster::new(64, 48);
        for y in 0..48 {
            for x in 0..64 {
                pic.put_pixel(x, y, [(x * 4) as u8, (y * 5) as u8, 255 - (x * 3) as u8, 255]);
            }
        }
        enc.load_image(&mut sig, &pic, None, 0, 0, 320, 240);
        for y in 0..V {
            for &s in &sig.line(y)[PIC_START..PIC_END] {
                assert!((0..=125).contains(&s), "sample {s} on line {y}");
            }
        }
    }

    #[test]
    fn masked_pixels_leave_the_signal_untouched() {
        let (enc, mut sig) = bars_encoder();
        let before = sig.samples()[..SIGNAL_LEN].to_vec();
        let pic = Raster::filled(16, 16, [255, 255, 255, 255]);
        let mask = Raster::filled(16, 16, [0, 0, 0, 255]);
        enc.load_image(&mut sig, &pic, Some(&mask), 0, 0, 320, 240);
        assert_eq!(&sig.samples()[..SIGNAL_LEN], &before[..]);
    }

    #[test]
    fn white_field_reaches_white_level() {
        let (enc, mut sig) = bars_encoder();
        let pic = Raster::filled(32, 32, [255, 255, 255, 255]);
        enc.load_image(&mut sig, &pic, None, 0, 0, 320, 240);
        let line = sig.line(TOP + VISLINES / 2);
        let mid = PIC_START + PIC_LEN / 2;
        let mean: f64 = line[mid..mid + 64]
            .iter()
            .map(|&s| f64::from(s))
            .sum::<f64>()
            / 64.0;
        let white = f64::from(WHITE_LEVEL) + f64::from(BLACK_LEVEL);
        assert!(
            (mean - white).abs() < 18.0,
            "white field landed at {mean} IRE"
        );
    }

    #[test]
    fn solid_rect_repeats_the_subcarrier_cycle() {
        let (enc, mut sig) = bars_encoder();
        enc.draw_solid_rel_lcp(&mut sig, 0.0, 1.0, 0.0, 1.0, 56.0, 44.0, 283.5);
        let line = sig.line(TOP + 10);
        let x = (VIS_START + 40) & !3;
        for k in 0..4 {
            assert_eq!(line[x + k], line[x + k + 4]);
        }
    }

    #[test]
    fn smpte_bars_luma_descends_left_to_right() {
        let (enc, mut sig) = bars_encoder();
        enc.draw_smpte_bars(&mut sig, None);
        let line = sig.line(TOP + VISLINES / 4);
        let mut last = f64::MAX;
        for bar in 0..7 {
            let x1 = VIS_START + VIS_LEN * bar / 7 + VIS_LEN / 28;
            let x2 = VIS_START + VIS_LEN * (bar + 1) / 7 - VIS_LEN / 28;
            let mean: f64 =
                line[x1..x2].iter().map(|&s| f64::from(s)).sum::<f64>() / (x2 - x1) as f64;
            assert!(mean < last, "bar {bar} mean {mean} not below {last}");
            last = mean;
        }
    }
}
