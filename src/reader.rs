//! Verifying reader for the container: parses the header, inverts the
//! session's coder, and replays block symbols onto a persistent canvas.
//!
//! This is the other half of the wire-format contract the muxer writes.
//! It decodes everything eagerly; platform players with display loops and
//! audio devices are out of scope.

use crate::audio;
use crate::blocks;
use crate::compress;
use crate::container::{self, Header, AUDIO_MAGIC, FRAME_MAGIC, SENTINEL};
use crate::error::{CatResult, Error};
use crate::profile::PaletteLayout;
use crate::quant::Palettes;
use imgref::ImgVec;
use rgb::RGB8;
use std::io::Read;

/// A fully decoded container.
pub struct Video {
    pub header: Header,
    pub frames: Vec<ImgVec<RGB8>>,
    pub audio: DecodedAudio,
}

/// Companded audio expanded back per the header's bits-per-sample.
pub enum DecodedAudio {
    None,
    /// 16-bit input: even stored bytes square back, odd bytes shift back.
    Pcm16(Vec<i16>),
    /// 8-bit input was stored verbatim.
    Pcm8(Vec<u8>),
}

/// Decode a whole container from any byte source.
pub fn decode(mut r: impl Read) -> CatResult<Video> {
    let header = Header::read(&mut r)?;
    if header.width == 0 || header.height == 0 || header.width % 4 != 0 || header.height % 4 != 0 {
        return Err(Error::Parse(format!(
            "frame size {}×{} is not valid for 4×4 blocks",
            header.width, header.height
        )));
    }

    let mut pal = [[RGB8::new(0, 0, 0); 256]; 2];
    pal[0] = container::read_palette(&mut r)?;
    if header.layout() == PaletteLayout::Dual {
        pal[1] = container::read_palette(&mut r)?;
    }
    let palettes = Palettes { layout: header.layout(), pal, colors: 0 };

    let (width, height) = (header.width as usize, header.height as usize);
    let mut canvas = ImgVec::new(vec![RGB8::new(0, 0, 0); width * height], width, height);
    let mut frames = Vec::new();
    let mut audio_bytes = Vec::new();

    while let Some(magic) = read_chunk_magic(&mut r)? {
        match magic {
            FRAME_MAGIC => {
                let _index = container::read_u32(&mut r)?;
                let raw_len = container::read_u32(&mut r)? as usize;
                let compressed_len = container::read_u32(&mut r)? as usize;
                let mut payload = vec![0; compressed_len];
                r.read_exact(&mut payload)
                    .map_err(|_| Error::Parse("frame payload truncated".into()))?;
                let trailer = container::read_array::<8>(&mut r)?;
                if trailer != SENTINEL {
                    return Err(Error::Parse("frame chunk sentinel missing".into()));
                }

                let bitstream = compress::unpack(&payload, raw_len, header.compression())?;
                blocks::apply_bitstream(&bitstream, &mut canvas, &palettes)?;
                frames.push(canvas.clone());
            }
            AUDIO_MAGIC => {
                let len = container::read_u32(&mut r)? as usize;
                let mut chunk = vec![0; len];
                r.read_exact(&mut chunk)
                    .map_err(|_| Error::Parse("audio chunk truncated".into()))?;
                audio_bytes.extend_from_slice(&chunk);
            }
            other => {
                return Err(Error::Parse(format!("unknown chunk magic {other:02x?}")));
            }
        }
    }

    let audio = if audio_bytes.is_empty() {
        DecodedAudio::None
    } else if header.bits_per_sample == 16 {
        DecodedAudio::Pcm16(audio::expand(&audio_bytes))
    } else {
        DecodedAudio::Pcm8(audio_bytes)
    };

    Ok(Video { header, frames, audio })
}

/// Next chunk magic, or `None` on a clean end of stream.
fn read_chunk_magic(r: &mut impl Read) -> CatResult<Option<[u8; 4]>> {
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = r.read(&mut magic[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Parse("trailing garbage at end of container".into()));
        }
        filled += n;
    }
    Ok(Some(magic))
}
