//! Frame sources: where the stations get their pictures.
//!
//! Each source owns one station slot. Once per output frame the runner asks
//! it to refresh that station's composite signal; still images and test bars
//! encode once, video sources decode and re-encode every frame.

use crate::opts::SourceSpec;
use rabbitears_core::{encoder::SourceEncoder, raster::Raster, signal::InputSignal};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// The colour of dead video: the famous "no frame :(" blue screen.
pub const BLUE_SCREEN: [u8; 4] = [0, 0, 192, 255];

#[derive(Error, Debug)]
#[must_use]
pub enum SourceError {
    #[error("cannot open source {spec:?}: {reason}")]
    OpenFailed { spec: String, reason: String },
    #[error("source {spec:?} needs the {feature:?} cargo feature")]
    FeatureMissing { spec: String, feature: &'static str },
}

/// Decodes an image file into an RGBA raster.
pub fn decode_image(path: &Path) -> Result<Raster, SourceError> {
    let img = image::open(path)
        .map_err(|err| SourceError::OpenFailed {
            spec: path.display().to_string(),
            reason: err.to_string(),
        })?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Raster::from_vec(w as usize, h as usize, img.into_raw()).ok_or_else(|| {
        SourceError::OpenFailed {
            spec: path.display().to_string(),
            reason: "image buffer size mismatch".into(),
        }
    })
}

/// One station's picture feed.
pub trait FrameSource {
    /// The source's nominal pixel size; used to derive the default output
    /// size when `--size` is omitted.
    fn nominal_size(&self) -> (usize, usize);

    /// Refreshes this source's composite signal for the next output frame.
    fn encode_frame(
        &mut self,
        encoder: &SourceEncoder,
        signal: &mut InputSignal,
    ) -> crate::error::Result<()>;

    fn name(&self) -> &str;
}

/// Opens one classified `--in` source.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
    match spec {
        SourceSpec::Still(path) => {
            let pic = decode_image(path)?;
            info!(
                "loaded {} ({}x{})",
                path.display(),
                pic.width(),
                pic.height()
            );
            Ok(Box::new(StillSource {
                name: path.display().to_string(),
                pic,
                encoded: false,
            }))
        }
        SourceSpec::Bars { logo } => {
            let logo = match logo {
                Some(path) => {
                    let pic = decode_image(path)?;
                    let mask = alpha_mask(&pic);
                    Some((pic, mask))
                }
                None => None,
            };
            Ok(Box::new(BarsSource {
                logo,
                encoded: false,
            }))
        }
        SourceSpec::Video(path) => video::open(path),
        SourceSpec::Camera(index) => video::open_camera(*index),
    }
}

/// Builds the overlay mask from a logo's alpha channel: opaque pixels become
/// white, transparent ones black. The encoder treats black mask pixels as
/// "don't write".
fn alpha_mask(pic: &Raster) -> Raster {
    let mut mask = Raster::new(pic.width(), pic.height());
    for y in 0..pic.height() {
        for x in 0..pic.width() {
            if pic.pixel(x, y)[3] >= 128 {
                mask.put_pixel(x, y, [255, 255, 255, 255]);
            }
        }
    }
    mask
}

/// A still image, encoded into the signal once and left to loop.
struct StillSource {
    name: String,
    pic: Raster,
    encoded: bool,
}

impl FrameSource for StillSource {
    fn nominal_size(&self) -> (usize, usize) {
        (self.pic.width(), self.pic.height())
    }

    fn encode_frame(
        &mut self,
        encoder: &SourceEncoder,
        signal: &mut InputSignal,
    ) -> crate::error::Result<()> {
        if self.encoded {
            return Ok(());
        }
        encoder.setup_sync(signal, true, false);
        encoder.load_image(
            signal,
            &self.pic,
            None,
            0,
            0,
            encoder.out_width(),
            encoder.out_height(),
        );
        self.encoded = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The SMPTE colour-bar station, optionally with a logo bug.
struct BarsSource {
    logo: Option<(Raster, Raster)>,
    encoded: bool,
}

impl BarsSource {
    /// The pattern's nominal size when it has to pick the output geometry.
    const NOMINAL: (usize, usize) = (320, 240);
}

impl FrameSource for BarsSource {
    fn nominal_size(&self) -> (usize, usize) {
        Self::NOMINAL
    }

    fn encode_frame(
        &mut self,
        encoder: &SourceEncoder,
        signal: &mut InputSignal,
    ) -> crate::error::Result<()> {
        if self.encoded {
            return Ok(());
        }
        encoder.setup_sync(signal, true, false);
        let logo = self.logo.as_ref().map(|(pic, mask)| (pic, mask));
        encoder.draw_smpte_bars(signal, logo);
        self.encoded = true;
        Ok(())
    }

    fn name(&self) -> &str {
        ":bars"
    }
}

#[cfg(feature = "ffmpeg")]
mod video {
    //! FFmpeg-backed video and camera decoding.

    use super::{FrameSource, SourceError, BLUE_SCREEN};
    use rabbitears_core::{encoder::SourceEncoder, raster::Raster, signal::InputSignal};
    use std::path::Path;
    use tracing::warn;

    pub(super) fn open(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        VideoSource::from_input(path.display().to_string(), path).map(|s| Box::new(s) as _)
    }

    pub(super) fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
        let device = format!("/dev/video{index}");
        VideoSource::from_input(format!(":cam:{index}"), Path::new(&device))
            .map(|s| Box::new(s) as _)
    }

    pub(super) struct VideoSource {
        name: String,
        ictx: ffmpeg_next::format::context::Input,
        decoder: ffmpeg_next::decoder::Video,
        scaler: Option<ffmpeg_next::software::scaling::Context>,
        stream_index: usize,
        size: (usize, usize),
        dead: bool,
        warned: bool,
        scaffold_done: bool,
    }

    impl VideoSource {
        fn from_input(name: String, path: &Path) -> Result<Self, SourceError> {
            let open_failed = |reason: String| SourceError::OpenFailed {
                spec: name.clone(),
                reason,
            };
            ffmpeg_next::init().map_err(|err| open_failed(err.to_string()))?;
            let ictx =
                ffmpeg_next::format::input(&path).map_err(|err| open_failed(err.to_string()))?;
            let stream = ictx
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| open_failed("no video stream".into()))?;
            let stream_index = stream.index();
            let context =
                ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                    .map_err(|err| open_failed(err.to_string()))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|err| open_failed(err.to_string()))?;
            let size = (decoder.width() as usize, decoder.height() as usize);
            if size.0 == 0 || size.1 == 0 {
                return Err(open_failed("zero-sized video".into()));
            }
            Ok(Self {
                name,
                ictx,
                decoder,
                scaler: None,
                stream_index,
                size,
                dead: false,
                warned: false,
                scaffold_done: false,
            })
        }

        /// Pulls the next decodable frame as an RGBA raster.
        fn next_raster(&mut self) -> Option<Raster> {
            let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
            loop {
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    return self.to_rgba(&decoded);
                }
                let mut sent = false;
                for (stream, packet) in self.ictx.packets() {
                    if stream.index() == self.stream_index {
                        if self.decoder.send_packet(&packet).is_err() {
                            return None;
                        }
                        sent = true;
                        break;
                    }
                }
                if !sent {
                    // End of stream; drain whatever the decoder still holds.
                    let _ = self.decoder.send_eof();
                    if self.decoder.receive_frame(&mut decoded).is_ok() {
                        return self.to_rgba(&decoded);
                    }
                    return None;
                }
            }
        }

        fn to_rgba(&mut self, frame: &ffmpeg_next::util::frame::video::Video) -> Option<Raster> {
            let (w, h) = (self.size.0 as u32, self.size.1 as u32);
            if self.scaler.is_none() {
                self.scaler = ffmpeg_next::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    ffmpeg_next::format::Pixel::RGBA,
                    w,
                    h,
                    ffmpeg_next::software::scaling::Flags::BILINEAR,
                )
                .ok();
            }
            let scaler = self.scaler.as_mut()?;
            let mut rgba = ffmpeg_next::util::frame::video::Video::empty();
            scaler.run(frame, &mut rgba).ok()?;

            let mut raster = Raster::new(w as usize, h as usize);
            let stride = rgba.stride(0);
            let src = rgba.data(0);
            let row_bytes = w as usize * 4;
            for y in 0..h as usize {
                let dst = raster.row_mut(y);
                dst.copy_from_slice(&src[y * stride..y * stride + row_bytes]);
            }
            Some(raster)
        }
    }

    impl FrameSource for VideoSource {
        fn nominal_size(&self) -> (usize, usize) {
            self.size
        }

        fn encode_frame(
            &mut self,
            encoder: &SourceEncoder,
            signal: &mut InputSignal,
        ) -> crate::error::Result<()> {
            if !self.scaffold_done {
                encoder.setup_sync(signal, true, false);
                self.scaffold_done = true;
            }
            let pic = if self.dead {
                None
            } else {
                let raster = self.next_raster();
                if raster.is_none() {
                    self.dead = true;
                }
                raster
            };
            let pic = pic.unwrap_or_else(|| {
                if !self.warned {
                    warn!("{}: no frame :( -- substituting blue screen", self.name);
                    self.warned = true;
                }
                Raster::filled(16, 16, BLUE_SCREEN)
            });
            encoder.load_image(
                signal,
                &pic,
                None,
                0,
                0,
                encoder.out_width(),
                encoder.out_height(),
            );
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

#[cfg(not(feature = "ffmpeg"))]
mod video {
    //! Stubs reported when the `ffmpeg` feature is compiled out.

    use super::{FrameSource, SourceError};
    use std::path::Path;

    pub(super) fn open(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::FeatureMissing {
            spec: path.display().to_string(),
            feature: "ffmpeg",
        })
    }

    pub(super) fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, SourceError> {
        Err(SourceError::FeatureMissing {
            spec: format!(":cam:{index}"),
            feature: "ffmpeg",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbitears_core::ntsc::{PIC_END, PIC_START, TOP, V};

    #[test]
    fn bars_source_encodes_once() {
        let mut src = BarsSource {
            logo: None,
            encoded: false,
        };
        assert_eq!(src.nominal_size(), (320, 240));
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        src.encode_frame(&enc, &mut sig).expect("encode");
        let first = sig.samples().to_vec();
        src.encode_frame(&enc, &mut sig).expect("encode");
        assert_eq!(sig.samples(), &first[..]);
        // Something non-black landed in the visible window.
        assert!(sig
            .line(TOP + 10)
            .iter()
            .skip(PIC_START)
            .take(PIC_END - PIC_START)
            .any(|&s| s > 20));
    }

    #[test]
    fn alpha_mask_follows_the_alpha_channel() {
        let mut pic = Raster::filled(2, 1, [10, 10, 10, 255]);
        pic.put_pixel(1, 0, [10, 10, 10, 0]);
        let mask = alpha_mask(&pic);
        assert_eq!(mask.pixel(0, 0)[..3], [255, 255, 255]);
        assert_eq!(mask.pixel(1, 0)[..3], [0, 0, 0]);
    }

    #[test]
    fn blue_screen_placeholder_carries_chroma() {
        // The dead-video fallback paints BLUE_SCREEN through the encoder;
        // the picture interval must end up visibly non-black.
        let enc = SourceEncoder::new(320, 240);
        let mut sig = InputSignal::new();
        enc.setup_sync(&mut sig, true, false);
        let pic = Raster::filled(16, 16, BLUE_SCREEN);
        enc.load_image(&mut sig, &pic, None, 0, 0, 320, 240);
        let line = sig.line(V / 2);
        let flat = line[PIC_START..PIC_END].iter().all(|&s| s == 10);
        assert!(!flat, "blue screen left the picture black");
    }

    #[test]
    fn missing_file_is_a_clean_open_failure() {
        let err = open_source(&SourceSpec::Still("/nonexistent/x.png".into()))
            .err()
            .expect("must fail");
        let msg = err.to_string();
        assert!(msg.contains("/nonexistent/x.png"), "{msg}");
    }
}
