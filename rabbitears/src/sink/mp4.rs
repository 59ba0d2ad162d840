//! JPEG-coded video in an MP4 (ISOBMFF) container.
//!
//! Layout is `ftyp`, `mdat`, `moov`: samples stream straight into the mdat
//! while only the per-sample sizes stay in memory; `finish` patches the mdat
//! length and appends the moov with its sample tables. The visual sample
//! entry is `mp4v` with a JPEG (0x6C) decoder config, which players treat as
//! Motion-JPEG.

use super::{encode_jpeg, open_failed, FrameSink, SinkError};
use rabbitears_core::raster::Raster;
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
};
use tracing::info;

const FTYP_SIZE: u32 = 24;

/// An `.mp4` file of JPEG-coded frames.
pub struct Mp4JpegSink {
    name: String,
    out: BufWriter<File>,
    width: usize,
    height: usize,
    fps: u32,
    sample_sizes: Vec<u32>,
    mdat_bytes: u64,
    finished: bool,
}

impl Mp4JpegSink {
    pub fn create(
        path: &Path,
        width: usize,
        height: usize,
        fps: u32,
    ) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|err| open_failed(path, &err))?;
        let mut out = BufWriter::new(file);
        write_ftyp(&mut out).map_err(|err| open_failed(path, &err))?;
        // mdat header; the size is patched in finish.
        out.write_all(&0u32.to_be_bytes())
            .and_then(|()| out.write_all(b"mdat"))
            .map_err(|err| open_failed(path, &err))?;
        Ok(Self {
            name: path.display().to_string(),
            out,
            width,
            height,
            fps: fps.max(1),
            sample_sizes: Vec::new(),
            mdat_bytes: 8,
            finished: false,
        })
    }

    fn close(&mut self) -> std::io::Result<()> {
        let moov = build_moov(
            self.width as u32,
            self.height as u32,
            self.fps,
            &self.sample_sizes,
        );
        self.out.write_all(&moov)?;
        let end = self.out.stream_position()?;
        self.out.seek(SeekFrom::Start(u64::from(FTYP_SIZE)))?;
        self.out
            .write_all(&u32::try_from(self.mdat_bytes).unwrap_or(0).to_be_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;
        info!("{}: wrote {} frames", self.name, self.sample_sizes.len());
        Ok(())
    }
}

impl FrameSink for Mp4JpegSink {
    fn write(&mut self, frame: &Raster) -> crate::error::Result<()> {
        let jpeg = encode_jpeg(frame)?;
        self.out.write_all(&jpeg)?;
        self.sample_sizes.push(jpeg.len() as u32);
        self.mdat_bytes += jpeg.len() as u64;
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

fn write_ftyp(out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(&FTYP_SIZE.to_be_bytes())?;
    out.write_all(b"ftyp")?;
    out.write_all(b"isom")?;
    out.write_all(&512u32.to_be_bytes())?;
    out.write_all(b"isom")?;
    out.write_all(b"mp41")?;
    Ok(())
}

// ── ISOBMFF box helpers ──

fn write_box(out: &mut Vec<u8>, box_type: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(body);
}

fn write_fullbox(out: &mut Vec<u8>, box_type: &[u8; 4], version: u8, flags: u32, body: &[u8]) {
    let mut full = Vec::with_capacity(4 + body.len());
    full.extend_from_slice(&((u32::from(version) << 24) | (flags & 0x00ff_ffff)).to_be_bytes());
    full.extend_from_slice(body);
    write_box(out, box_type, &full);
}

const MATRIX: [u32; 9] = [
    0x0001_0000,
    0,
    0,
    0,
    0x0001_0000,
    0,
    0,
    0,
    0x4000_0000,
];

fn build_moov(width: u32, height: u32, fps: u32, sample_sizes: &[u32]) -> Vec<u8> {
    let n = sample_sizes.len() as u32;
    let duration_ms = u64::from(n) * 1000 / u64::from(fps);

    // mvhd
    let mut mvhd = Vec::new();
    mvhd.extend_from_slice(&0u32.to_be_bytes()); // creation
    mvhd.extend_from_slice(&0u32.to_be_bytes()); // modification
    mvhd.extend_from_slice(&1000u32.to_be_bytes()); // timescale
    mvhd.extend_from_slice(&(duration_ms as u32).to_be_bytes());
    mvhd.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
    mvhd.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
    mvhd.extend_from_slice(&[0u8; 10]); // reserved
    for m in MATRIX {
        mvhd.extend_from_slice(&m.to_be_bytes());
    }
    mvhd.extend_from_slice(&[0u8; 24]); // pre_defined
    mvhd.extend_from_slice(&2u32.to_be_bytes()); // next track id

    // tkhd
    let mut tkhd = Vec::new();
    tkhd.extend_from_slice(&0u32.to_be_bytes()); // creation
    tkhd.extend_from_slice(&0u32.to_be_bytes()); // modification
    tkhd.extend_from_slice(&1u32.to_be_bytes()); // track id
    tkhd.extend_from_slice(&0u32.to_be_bytes()); // reserved
    tkhd.extend_from_slice(&(duration_ms as u32).to_be_bytes());
    tkhd.extend_from_slice(&[0u8; 8]); // reserved
    tkhd.extend_from_slice(&0u16.to_be_bytes()); // layer
    tkhd.extend_from_slice(&0u16.to_be_bytes()); // alternate group
    tkhd.extend_from_slice(&0u16.to_be_bytes()); // volume
    tkhd.extend_from_slice(&0u16.to_be_bytes()); // reserved
    for m in MATRIX {
        tkhd.extend_from_slice(&m.to_be_bytes());
    }
    tkhd.extend_from_slice(&(width << 16).to_be_bytes());
    tkhd.extend_from_slice(&(height << 16).to_be_bytes());

    // mdhd: media timescale is the frame rate, one tick per frame.
    let mut mdhd = Vec::new();
    mdhd.extend_from_slice(&0u32.to_be_bytes());
    mdhd.extend_from_slice(&0u32.to_be_bytes());
    mdhd.extend_from_slice(&fps.to_be_bytes());
    mdhd.extend_from_slice(&n.to_be_bytes());
    mdhd.extend_from_slice(&0x55c4u16.to_be_bytes()); // language "und"
    mdhd.extend_from_slice(&0u16.to_be_bytes());

    // hdlr
    let mut hdlr = Vec::new();
    hdlr.extend_from_slice(&0u32.to_be_bytes());
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0u8; 12]);
    hdlr.extend_from_slice(b"VideoHandler\0");

    // stsd: one mp4v entry with a JPEG esds.
    let mut stsd = Vec::new();
    stsd.extend_from_slice(&1u32.to_be_bytes()); // entry count
    {
        let mut entry = Vec::new();
        entry.extend_from_slice(&[0u8; 6]); // reserved
        entry.extend_from_slice(&1u16.to_be_bytes()); // data reference index
        entry.extend_from_slice(&[0u8; 16]); // pre_defined + reserved
        entry.extend_from_slice(&(width as u16).to_be_bytes());
        entry.extend_from_slice(&(height as u16).to_be_bytes());
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // horiz dpi
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // vert dpi
        entry.extend_from_slice(&0u32.to_be_bytes()); // reserved
        entry.extend_from_slice(&1u16.to_be_bytes()); // frame count
        entry.extend_from_slice(&[0u8; 32]); // compressor name
        entry.extend_from_slice(&24u16.to_be_bytes()); // depth
        entry.extend_from_slice(&(-1i16).to_be_bytes()); // pre_defined
        write_fullbox(&mut entry, b"esds", 0, 0, &jpeg_esds());
        write_box(&mut stsd, b"mp4v", &entry);
    }

    // stts: every sample lasts one media tick.
    let mut stts = Vec::new();
    stts.extend_from_slice(&1u32.to_be_bytes());
    stts.extend_from_slice(&n.to_be_bytes());
    stts.extend_from_slice(&1u32.to_be_bytes());

    // stsc: a single chunk holding every sample.
    let mut stsc = Vec::new();
    stsc.extend_from_slice(&1u32.to_be_bytes());
    stsc.extend_from_slice(&1u32.to_be_bytes()); // first chunk
    stsc.extend_from_slice(&n.max(1).to_be_bytes()); // samples per chunk
    stsc.extend_from_slice(&1u32.to_be_bytes()); // sample description

    // stsz
    let mut stsz = Vec::new();
    stsz.extend_from_slice(&0u32.to_be_bytes()); // per-sample sizes follow
    stsz.extend_from_slice(&n.to_be_bytes());
    for &size in sample_sizes {
        stsz.extend_from_slice(&size.to_be_bytes());
    }

    // stco: the chunk starts right after the mdat header.
    let mut stco = Vec::new();
    stco.extend_from_slice(&1u32.to_be_bytes());
    stco.extend_from_slice(&(FTYP_SIZE + 8).to_be_bytes());

    let mut stbl = Vec::new();
    write_fullbox(&mut stbl, b"stsd", 0, 0, &stsd);
    write_fullbox(&mut stbl, b"stts", 0, 0, &stts);
    write_fullbox(&mut stbl, b"stsc", 0, 0, &stsc);
    write_fullbox(&mut stbl, b"stsz", 0, 0, &stsz);
    write_fullbox(&mut stbl, b"stco", 0, 0, &stco);

    let mut vmhd = Vec::new();
    vmhd.extend_from_slice(&[0u8; 8]); // graphics mode + opcolor
    let mut dref = Vec::new();
    dref.extend_from_slice(&1u32.to_be_bytes());
    write_fullbox(&mut dref, b"url ", 0, 1, &[]); // data is in this file
    let mut dinf = Vec::new();
    write_fullbox(&mut dinf, b"dref", 0, 0, &dref);

    let mut minf = Vec::new();
    write_fullbox(&mut minf, b"vmhd", 0, 1, &vmhd);
    write_box(&mut minf, b"dinf", &dinf);
    write_box(&mut minf, b"stbl", &stbl);

    let mut mdia = Vec::new();
    write_fullbox(&mut mdia, b"mdhd", 0, 0, &mdhd);
    write_fullbox(&mut mdia, b"hdlr", 0, 0, &hdlr);
    write_box(&mut mdia, b"minf", &minf);

    let mut trak = Vec::new();
    write_fullbox(&mut trak, b"tkhd", 0, 3, &tkhd);
    write_box(&mut trak, b"mdia", &mdia);

    let mut moov_body = Vec::new();
    write_fullbox(&mut moov_body, b"mvhd", 0, 0, &mvhd);
    write_box(&mut moov_body, b"trak", &trak);

    let mut moov = Vec::new();
    write_box(&mut moov, b"moov", &moov_body);
    moov
}

/// A minimal ES descriptor declaring ISO/IEC 10918-1 (JPEG) video.
fn jpeg_esds() -> Vec<u8> {
    let mut dec_config = Vec::new();
    dec_config.push(0x6c); // objectTypeIndication: visual ISO/IEC 10918-1
    dec_config.push(0x11); // streamType 4 (visual) << 2 | reserved 1
    dec_config.extend_from_slice(&[0, 0, 0]); // buffer size
    dec_config.extend_from_slice(&0u32.to_be_bytes()); // max bitrate
    dec_config.extend_from_slice(&0u32.to_be_bytes()); // avg bitrate

    let mut es = Vec::new();
    es.extend_from_slice(&1u16.to_be_bytes()); // ES id
    es.push(0); // flags
    es.push(0x04); // DecoderConfigDescriptor tag
    es.push(dec_config.len() as u8);
    es.extend_from_slice(&dec_config);
    es.push(0x06); // SLConfigDescriptor tag
    es.push(1);
    es.push(0x02);

    let mut esds = Vec::new();
    esds.push(0x03); // ES_Descriptor tag
    esds.push(es.len() as u8);
    esds.extend_from_slice(&es);
    esds
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_boxes(bytes: &[u8]) -> Vec<([u8; 4], usize)> {
        let mut boxes = Vec::new();
        let mut at = 0;
        while at + 8 <= bytes.len() {
            let size = u32::from_be_bytes(bytes[at..at + 4].try_into().expect("u32")) as usize;
            let kind: [u8; 4] = bytes[at + 4..at + 8].try_into().expect("fourcc");
            assert!(size >= 8 && at + size <= bytes.len(), "bad box {kind:?}");
            boxes.push((kind, size));
            at += size;
        }
        assert_eq!(at, bytes.len(), "trailing bytes");
        boxes
    }

    #[test]
    fn mp4_structure_is_consistent() {
        let dir = std::env::temp_dir().join("rabbitears-mp4-test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("out.mp4");

        let mut sink = Mp4JpegSink::create(&path, 96, 64, 30).expect("create");
        let frame = Raster::filled(96, 64, [12, 200, 80, 255]);
        for _ in 0..4 {
            sink.write(&frame).expect("write");
        }
        sink.finish().expect("finish");

        let bytes = std::fs::read(&path).expect("read back");
        let boxes = walk_boxes(&bytes);
        let kinds: Vec<&[u8; 4]> = boxes.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, [b"ftyp", b"mdat", b"moov"]);

        // The mdat payload must equal the sum of the declared sample sizes.
        let mdat_payload = boxes[1].1 - 8;
        let stsz_at = bytes
            .windows(4)
            .position(|w| w.starts_with(b"stsz"))
            .expect("stsz present");
        let count =
            u32::from_be_bytes(bytes[stsz_at + 12..stsz_at + 16].try_into().expect("u32"));
        assert_eq!(count, 4);
        let mut total = 0usize;
        for i in 0..count as usize {
            let at = stsz_at + 16 + i * 4;
            total += u32::from_be_bytes(bytes[at..at + 4].try_into().expect("u32")) as usize;
        }
        assert_eq!(total, mdat_payload);
        std::fs::remove_file(&path).ok();
    }
}
