//! Motion-JPEG in a RIFF AVI container.
//!
//! Header sizes and the frame counts are patched in `finish` once the frame
//! count is known; only the index entries are held in memory meanwhile.

use super::{encode_jpeg, open_failed, FrameSink, SinkError};
use rabbitears_core::raster::Raster;
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
};
use tracing::info;

const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

/// An `.avi` file of `MJPG`-compressed frames.
pub struct AviMjpegSink {
    name: String,
    out: BufWriter<File>,
    width: usize,
    height: usize,
    /// `(offset within movi, size)` per frame, for the idx1 chunk.
    index: Vec<(u32, u32)>,
    movi_bytes: u32,
    riff_size_pos: u64,
    total_frames_pos: u64,
    length_pos: u64,
    movi_size_pos: u64,
    finished: bool,
}

impl AviMjpegSink {
    pub fn create(
        path: &Path,
        width: usize,
        height: usize,
        fps: u32,
    ) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|err| open_failed(path, &err))?;
        let mut sink = Self {
            name: path.display().to_string(),
            out: BufWriter::new(file),
            width,
            height,
            index: Vec::new(),
            movi_bytes: 4,
            riff_size_pos: 0,
            total_frames_pos: 0,
            length_pos: 0,
            movi_size_pos: 0,
            finished: false,
        };
        sink.write_headers(fps)
            .map_err(|err| open_failed(path, &err))?;
        Ok(sink)
    }

    fn write_headers(&mut self, fps: u32) -> std::io::Result<()> {
        let (w, h) = (self.width as u32, self.height as u32);
        let out = &mut self.out;

        out.write_all(b"RIFF")?;
        self.riff_size_pos = out.stream_position()?;
        out.write_all(&0u32.to_le_bytes())?; // patched in finish
        out.write_all(b"AVI ")?;

        // hdrl: avih + one video stream (strh + strf).
        let hdrl_size = 4 + (8 + 56) + (8 + 4 + (8 + 56) + (8 + 40));
        out.write_all(b"LIST")?;
        out.write_all(&(hdrl_size as u32).to_le_bytes())?;
        out.write_all(b"hdrl")?;

        out.write_all(b"avih")?;
        out.write_all(&56u32.to_le_bytes())?;
        out.write_all(&(1_000_000 / fps.max(1)).to_le_bytes())?; // usec per frame
        out.write_all(&0u32.to_le_bytes())?; // max bytes per sec
        out.write_all(&0u32.to_le_bytes())?; // padding granularity
        out.write_all(&AVIF_HASINDEX.to_le_bytes())?;
        self.total_frames_pos = out.stream_position()?;
        out.write_all(&0u32.to_le_bytes())?; // total frames, patched
        out.write_all(&0u32.to_le_bytes())?; // initial frames
        out.write_all(&1u32.to_le_bytes())?; // streams
        out.write_all(&0u32.to_le_bytes())?; // suggested buffer size
        out.write_all(&w.to_le_bytes())?;
        out.write_all(&h.to_le_bytes())?;
        out.write_all(&[0u8; 16])?; // reserved

        let strl_size = 4 + (8 + 56) + (8 + 40);
        out.write_all(b"LIST")?;
        out.write_all(&(strl_size as u32).to_le_bytes())?;
        out.write_all(b"strl")?;

        out.write_all(b"strh")?;
        out.write_all(&56u32.to_le_bytes())?;
        out.write_all(b"vids")?;
        out.write_all(b"MJPG")?;
        out.write_all(&0u32.to_le_bytes())?; // flags
        out.write_all(&0u16.to_le_bytes())?; // priority
        out.write_all(&0u16.to_le_bytes())?; // language
        out.write_all(&0u32.to_le_bytes())?; // initial frames
        out.write_all(&1u32.to_le_bytes())?; // scale
        out.write_all(&fps.max(1).to_le_bytes())?; // rate
        out.write_all(&0u32.to_le_bytes())?; // start
        self.length_pos = out.stream_position()?;
        out.write_all(&0u32.to_le_bytes())?; // length, patched
        out.write_all(&0u32.to_le_bytes())?; // suggested buffer size
        out.write_all(&u32::MAX.to_le_bytes())?; // quality
        out.write_all(&0u32.to_le_bytes())?; // sample size
        out.write_all(&0u16.to_le_bytes())?; // rcFrame left
        out.write_all(&0u16.to_le_bytes())?; // top
        out.write_all(&(w as u16).to_le_bytes())?; // right
        out.write_all(&(h as u16).to_le_bytes())?; // bottom

        out.write_all(b"strf")?;
        out.write_all(&40u32.to_le_bytes())?;
        out.write_all(&40u32.to_le_bytes())?; // biSize
        out.write_all(&w.to_le_bytes())?;
        out.write_all(&h.to_le_bytes())?;
        out.write_all(&1u16.to_le_bytes())?; // planes
        out.write_all(&24u16.to_le_bytes())?; // bit count
        out.write_all(b"MJPG")?; // compression
        out.write_all(&(w * h * 3).to_le_bytes())?; // size image
        out.write_all(&[0u8; 16])?; // ppm + clr

        out.write_all(b"LIST")?;
        self.movi_size_pos = out.stream_position()?;
        out.write_all(&0u32.to_le_bytes())?; // patched
        out.write_all(b"movi")?;
        Ok(())
    }

    fn push(&mut self, jpeg: &[u8]) -> std::io::Result<()> {
        let padded = (jpeg.len() + 1) & !1; // RIFF chunks are word-aligned
        self.index.push((self.movi_bytes, jpeg.len() as u32));
        self.out.write_all(b"00dc")?;
        self.out.write_all(&(jpeg.len() as u32).to_le_bytes())?;
        self.out.write_all(jpeg)?;
        if padded != jpeg.len() {
            self.out.write_all(&[0u8])?;
        }
        self.movi_bytes += 8 + padded as u32;
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        // idx1: one entry per frame.
        self.out.write_all(b"idx1")?;
        self.out
            .write_all(&(16 * self.index.len() as u32).to_le_bytes())?;
        for &(offset, size) in &self.index {
            self.out.write_all(b"00dc")?;
            self.out.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.out.write_all(&offset.to_le_bytes())?;
            self.out.write_all(&size.to_le_bytes())?;
        }

        let end = self.out.stream_position()?;
        let frames = self.index.len() as u32;
        self.out.seek(SeekFrom::Start(self.riff_size_pos))?;
        self.out
            .write_all(&((end - self.riff_size_pos - 4) as u32).to_le_bytes())?;
        self.out.seek(SeekFrom::Start(self.total_frames_pos))?;
        self.out.write_all(&frames.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(self.length_pos))?;
        self.out.write_all(&frames.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(self.movi_size_pos))?;
        self.out.write_all(&self.movi_bytes.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;
        info!("{}: wrote {frames} frames", self.name);
        Ok(())
    }
}

impl FrameSink for AviMjpegSink {
    fn write(&mut self, frame: &Raster) -> crate::error::Result<()> {
        let jpeg = encode_jpeg(frame)?;
        self.push(&jpeg)?;
        Ok(())
    }

    fn finish(&mut self) -> crate::error::Result<()> {
        if !self.finished {
            self.close()?;
            self.finished = true;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
