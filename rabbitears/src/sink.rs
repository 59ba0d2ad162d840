//! Frame sinks: where the rendered frames go.
//!
//! Video files carry JPEG-coded frames in either a RIFF AVI (`MJPG`) or an
//! MP4 container; both muxers are written here rather than pulled from a
//! codec process, so file output works everywhere the crate builds.

mod avi;
mod mp4;
#[cfg(feature = "window")]
mod window;

use crate::opts::SinkSpec;
use rabbitears_core::raster::Raster;
use std::path::Path;
use thiserror::Error;

pub use avi::AviMjpegSink;
pub use mp4::Mp4JpegSink;

#[derive(Error, Debug)]
#[must_use]
pub enum SinkError {
    #[error("cannot open sink {spec:?}: {reason}")]
    OpenFailed { spec: String, reason: String },
    #[error("sink {spec:?} needs the {feature:?} cargo feature")]
    FeatureMissing { spec: String, feature: &'static str },
}

/// Consumes rendered frames.
pub trait FrameSink {
    fn write(&mut self, frame: &Raster) -> crate::error::Result<()>;

    /// Finalises the sink (container indices, window teardown). Must be
    /// called exactly once, after the last `write`.
    fn finish(&mut self) -> crate::error::Result<()>;

    fn name(&self) -> &str;
}

/// Opens one classified `--out` sink for `width x height` frames at `fps`.
pub fn open_sink(
    spec: &SinkSpec,
    width: usize,
    height: usize,
    fps: u32,
) -> Result<Box<dyn FrameSink>, SinkError> {
    match spec {
        SinkSpec::Window => open_window(width, height),
        SinkSpec::File(path) => {
            let is_avi = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"));
            if is_avi {
                AviMjpegSink::create(path, width, height, fps)
                    .map(|sink| Box::new(sink) as Box<dyn FrameSink>)
            } else {
                Mp4JpegSink::create(path, width, height, fps)
                    .map(|sink| Box::new(sink) as Box<dyn FrameSink>)
            }
        }
    }
}

#[cfg(feature = "window")]
fn open_window(width: usize, height: usize) -> Result<Box<dyn FrameSink>, SinkError> {
    window::WindowSink::open(width, height).map(|sink| Box::new(sink) as Box<dyn FrameSink>)
}

#[cfg(not(feature = "window"))]
fn open_window(_width: usize, _height: usize) -> Result<Box<dyn FrameSink>, SinkError> {
    Err(SinkError::FeatureMissing {
        spec: ":highgui".into(),
        feature: "window",
    })
}

/// Encodes one raster as a baseline JPEG (quality 90).
fn encode_jpeg(frame: &Raster) -> crate::error::Result<Vec<u8>> {
    use image::{codecs::jpeg::JpegEncoder, ColorType, ImageEncoder};

    // The JPEG encoder wants RGB; drop alpha.
    let mut rgb = Vec::with_capacity(frame.width() * frame.height() * 3);
    for px in frame.data().chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 90).write_image(
        &rgb,
        frame.width() as u32,
        frame.height() as u32,
        ColorType::Rgb8,
    )?;
    Ok(jpeg)
}

fn open_failed(path: &Path, err: &std::io::Error) -> SinkError {
    SinkError::OpenFailed {
        spec: path.display().to_string(),
        reason: err.to_string(),
    }
}
