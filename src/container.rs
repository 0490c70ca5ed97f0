//! The container byte layout and the muxer that writes it.
//!
//! Field order and the patch offsets are load-bearing: players read the
//! header as a fixed 38-byte record followed by the palette block(s), and
//! the encoder patches the frame count (offset 4) and frame rate (offset
//! 18) after the last chunk, once it knows how many frames the skip
//! heuristic actually let through.

use crate::compress;
use crate::error::{CatResult, Error};
use crate::profile::{version_info, Compression, PaletteLayout};
use crate::quant::Palettes;
use rgb::RGB8;
use std::io::{Read, Seek, SeekFrom, Write};

pub(crate) const MAGIC: [u8; 4] = *b"AGMV";
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"AGFC";
pub(crate) const AUDIO_MAGIC: [u8; 4] = *b"AGAC";
/// Resynchronization trailer after every frame chunk's payload.
pub(crate) const SENTINEL: [u8; 8] = [0xFF; 8];

const FRAME_COUNT_OFFSET: u64 = 4;
const FPS_OFFSET: u64 = 18;

/// The fixed header record (palettes follow it immediately).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub frames: u32,
    pub width: u32,
    pub height: u32,
    pub version: u8,
    pub fps: u32,
    pub audio_duration: u32,
    pub sample_rate: u32,
    pub audio_size: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Header {
    fn write(&self, w: &mut impl Write) -> CatResult<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&self.frames.to_le_bytes())?;
        w.write_all(&self.width.to_le_bytes())?;
        w.write_all(&self.height.to_le_bytes())?;
        w.write_all(&[1, self.version])?;
        w.write_all(&self.fps.to_le_bytes())?;
        w.write_all(&self.audio_duration.to_le_bytes())?;
        w.write_all(&self.sample_rate.to_le_bytes())?;
        w.write_all(&self.audio_size.to_le_bytes())?;
        w.write_all(&self.channels.to_le_bytes())?;
        w.write_all(&self.bits_per_sample.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn read(r: &mut impl Read) -> CatResult<Self> {
        let magic = read_array::<4>(r)?;
        if magic != MAGIC {
            return Err(Error::Parse("missing AGMV magic".into()));
        }
        let frames = read_u32(r)?;
        let width = read_u32(r)?;
        let height = read_u32(r)?;
        let marker = read_array::<2>(r)?;
        if marker[0] != 1 {
            return Err(Error::Parse(format!("unexpected format marker {}", marker[0])));
        }
        let version = marker[1];
        if version_info(version).is_none() {
            return Err(Error::Parse(format!("unknown version byte {version}")));
        }
        Ok(Self {
            frames,
            width,
            height,
            version,
            fps: read_u32(r)?,
            audio_duration: read_u32(r)?,
            sample_rate: read_u32(r)?,
            audio_size: read_u32(r)?,
            channels: read_u16(r)?,
            bits_per_sample: read_u16(r)?,
        })
    }

    pub(crate) fn layout(&self) -> PaletteLayout {
        version_info(self.version).expect("validated on read").0
    }

    pub(crate) fn compression(&self) -> Compression {
        version_info(self.version).expect("validated on read").1
    }
}

fn write_palette(w: &mut impl Write, colors: &[RGB8; 256]) -> CatResult<()> {
    let mut bytes = [0u8; 256 * 3];
    for (chunk, c) in bytes.chunks_exact_mut(3).zip(colors) {
        chunk.copy_from_slice(&[c.r, c.g, c.b]);
    }
    w.write_all(&bytes)?;
    Ok(())
}

pub(crate) fn read_palette(r: &mut impl Read) -> CatResult<[RGB8; 256]> {
    let mut bytes = [0u8; 256 * 3];
    r.read_exact(&mut bytes)
        .map_err(|_| Error::Parse("palette block truncated".into()))?;
    let mut colors = [RGB8::new(0, 0, 0); 256];
    for (chunk, c) in bytes.chunks_exact(3).zip(colors.iter_mut()) {
        *c = RGB8::new(chunk[0], chunk[1], chunk[2]);
    }
    Ok(colors)
}

pub(crate) fn read_u32(r: &mut impl Read) -> CatResult<u32> {
    Ok(u32::from_le_bytes(read_array::<4>(r)?))
}

pub(crate) fn read_u16(r: &mut impl Read) -> CatResult<u16> {
    Ok(u16::from_le_bytes(read_array::<2>(r)?))
}

pub(crate) fn read_array<const N: usize>(r: &mut impl Read) -> CatResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)
        .map_err(|_| Error::Parse("container truncated".into()))?;
    Ok(buf)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MuxState {
    HeaderPending,
    PaletteWritten,
    FramesStreaming,
    Finalized,
}

/// Writes the container in encode order, patching length fields after the
/// fact. Any seek or write failure is fatal for the whole encode; callers
/// writing to a real file go through a temporary path and rename.
pub(crate) struct Muxer<W: Write + Seek> {
    writer: W,
    state: MuxState,
    compression: Compression,
    bytes_written: u64,
}

impl<W: Write + Seek> Muxer<W> {
    pub fn new(writer: W, compression: Compression) -> Self {
        Self { writer, state: MuxState::HeaderPending, compression, bytes_written: 0 }
    }

    fn expect_state(&self, want: MuxState) -> CatResult<()> {
        if self.state != want {
            return Err(Error::ThreadSend);
        }
        Ok(())
    }

    pub fn write_header(&mut self, header: &Header, palettes: &Palettes) -> CatResult<()> {
        self.expect_state(MuxState::HeaderPending)?;
        header.write(&mut self.writer)?;
        write_palette(&mut self.writer, &palettes.pal[0])?;
        if palettes.layout == PaletteLayout::Dual {
            write_palette(&mut self.writer, &palettes.pal[1])?;
        }
        self.bytes_written = self.writer.stream_position()?;
        self.state = MuxState::PaletteWritten;
        Ok(())
    }

    /// Compress and write one frame chunk. `index` is 1-based on the wire.
    /// Returns the compressed payload size.
    pub fn write_frame(&mut self, index: u32, bitstream: &[u8]) -> CatResult<u32> {
        if self.state != MuxState::PaletteWritten {
            self.expect_state(MuxState::FramesStreaming)?;
        }
        self.writer.write_all(&FRAME_MAGIC)?;
        self.writer.write_all(&index.to_le_bytes())?;
        self.writer.write_all(&(bitstream.len() as u32).to_le_bytes())?;
        let patch_at = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?;

        let payload = compress::pack(bitstream, self.compression);
        let compressed_len = payload.len() as u32;
        self.writer.write_all(&payload)?;

        self.writer.seek(SeekFrom::Start(patch_at))?;
        self.writer.write_all(&compressed_len.to_le_bytes())?;
        self.writer.seek(SeekFrom::Current(i64::from(compressed_len)))?;

        self.writer.write_all(&SENTINEL)?;
        self.bytes_written = self.writer.stream_position()?;
        self.state = MuxState::FramesStreaming;
        Ok(compressed_len)
    }

    pub fn write_audio(&mut self, chunk: &[u8]) -> CatResult<()> {
        self.expect_state(MuxState::FramesStreaming)?;
        self.writer.write_all(&AUDIO_MAGIC)?;
        self.writer.write_all(&(chunk.len() as u32).to_le_bytes())?;
        self.writer.write_all(chunk)?;
        self.bytes_written = self.writer.stream_position()?;
        Ok(())
    }

    /// Patch the header's frame count and effective frame rate once the
    /// encoded frame count is known, then flush.
    pub fn finalize(&mut self, encoded_frames: u32, nominal_frames: u32, fps: u32) -> CatResult<()> {
        self.expect_state(MuxState::FramesStreaming)?;
        let end = self.writer.stream_position()?;

        self.writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
        self.writer.write_all(&encoded_frames.to_le_bytes())?;

        let rate = f64::from(encoded_frames) / f64::from(nominal_frames.max(1));
        let adjusted_fps = (f64::from(fps) * rate).round() as u32;
        self.writer.seek(SeekFrom::Start(FPS_OFFSET))?;
        self.writer.write_all(&adjusted_fps.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        self.bytes_written = end;
        self.state = MuxState::Finalized;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
