//! NTSC raster geometry and composite signal levels.
//!
//! Everything is derived from the 63.5 µs scan line sampled at four times the
//! colourburst frequency (~14.318 MHz), giving 912 samples per line and 262
//! non-interlaced lines per frame. All counts scale by [`SCALE`] so the whole
//! pipeline can run at integer multiples of the base rate.

/// Integer oversampling factor applied to every sample and line count.
pub const SCALE: usize = 1;

/// Total lines per (non-interlaced) frame.
pub const V: usize = 262 * SCALE;
/// Samples per scan line.
pub const H: usize = 912 * SCALE;
/// First visible line.
pub const TOP: usize = 30 * SCALE;
/// Number of visible lines.
pub const VISLINES: usize = 200 * SCALE;
/// One past the last visible line.
pub const BOT: usize = TOP + VISLINES;

/// Converts a position within the 63,500 ns line into a sample index.
const fn line_pos(ns: usize) -> usize {
    ns * H / 63_500
}

/// Start of the horizontal sync pulse.
pub const SYNC_START: usize = line_pos(0);
/// Start of the back porch.
pub const BP_START: usize = line_pos(4_700);
/// Start of the colourburst.
pub const CB_START: usize = line_pos(5_800);
/// Start of the picture interval.
pub const PIC_START: usize = line_pos(9_400);
/// Length of the picture interval.
pub const PIC_LEN: usize = line_pos(52_600);
/// Start of the front porch.
pub const FP_START: usize = line_pos(62_000);
/// End of the picture interval.
pub const PIC_END: usize = FP_START;

/// Left edge of the window a real tube actually shows (1/8 overscan).
pub const VIS_START: usize = PIC_START + PIC_LEN / 8;
/// Right edge of the visible window.
pub const VIS_END: usize = PIC_START + 7 * PIC_LEN / 8;
/// Width of the visible window.
pub const VIS_LEN: usize = VIS_END - VIS_START;

/// Samples in one full frame of signal.
pub const SIGNAL_LEN: usize = V * H;

/// Taps in the multipath ghost FIR.
pub const GHOSTFIR_LEN: usize = 4;
/// Tallest replicated scan line the renderer will emit.
pub const MAX_LINEHEIGHT: usize = 12;

/// Nominal white, in IRE.
pub const WHITE_LEVEL: i8 = 100;
/// 50% gray.
pub const GRAY50_LEVEL: i8 = 55;
/// 30% gray.
pub const GRAY30_LEVEL: i8 = 35;
/// Black (setup) level.
pub const BLACK_LEVEL: i8 = 10;
/// Blanking level.
pub const BLANK_LEVEL: i8 = 0;
/// Sync tip.
pub const SYNC_LEVEL: i8 = -40;
/// Colourburst amplitude.
pub const CB_LEVEL: i8 = 20;
