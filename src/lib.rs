//! Encoder for the AGMV video container: a global palette built from one
//! histogram pass over the whole clip, per-frame 4×4 block classification
//! against a fixed 4-frame GOP, one of two dictionary coders over the
//! packed symbols, and companded 8-bit audio — all tuned so the decode
//! side stays cheap enough for 32-bit handhelds.
//!
//! ```no_run
//! # fn main() -> Result<(), agmv::Error> {
//! let (collector, writer) = agmv::new(agmv::Settings::default())?;
//! std::thread::spawn(move || {
//!     for i in 0..8 {
//!         let px = vec![rgb::RGB8::new(i as u8 * 30, 0, 0); 64 * 64];
//!         collector.add_frame_rgb(i, imgref::ImgVec::new(px, 64, 64)).unwrap();
//!     }
//! });
//! writer.write("out.agmv", &mut agmv::progress::NoProgress {})?;
//! # Ok(()) }
//! ```

pub use imgref::ImgVec;
pub use rgb::RGB8;

mod audio;
mod blocks;
mod compress;
mod container;
mod error;
mod ordqueue;
mod profile;
mod quant;
mod skip;

pub mod collector;
pub mod progress;
pub mod reader;

pub use crate::audio::AudioTrack;
pub use crate::collector::Collector;
pub use crate::container::Header;
pub use crate::error::{CatResult, Error};
pub use crate::profile::{Compression, PaletteLayout, Profile, Quality, SkipMode};

use crate::blocks::EntryGrid;
use crate::container::Muxer;
use crate::ordqueue::OrdQueueIter;
use crate::profile::version_byte;
use crate::progress::ProgressReporter;
use crate::quant::{PaletteBuilder, Palettes};
use imgref::ImgRef;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

/// Keyframe cadence: every 4th encoded frame is an intra frame.
const GOP_LEN: usize = 4;

/// Summary of a finished encode.
#[derive(Debug, Clone, Copy)]
pub struct EncodeInfo {
    /// Frame chunks actually written, after skip/interpolation.
    pub encoded_frames: u32,
    /// Distinct colors the quantizer achieved (up to 512); remaining
    /// palette slots were zero-filled.
    pub palette_colors: usize,
    /// Total container size in bytes.
    pub bytes_written: u64,
}

/// Encoding parameters, fixed for the whole session.
#[derive(Copy, Clone)]
pub struct Settings {
    pub profile: Profile,
    pub quality: Quality,
    pub compression: Compression,
    /// Declared frames per second; finalization scales it down by the
    /// fraction of frames the skip heuristic dropped.
    pub fps: u32,
    /// Pixels (of 16) that must match a block's top-left color for FILL.
    pub fill_count: u8,
    /// Pixels (of 16) that must match the previous frame for COPY.
    pub copy_count: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: Profile::I,
            quality: Quality::default(),
            compression: Compression::default(),
            fps: 24,
            fill_count: 16,
            copy_count: 15,
        }
    }
}

/// Start new encoding
///
/// The `Collector` and `Writer` are meant to be used on separate threads.
pub fn new(settings: Settings) -> CatResult<(Collector, Writer)> {
    let (queue, queue_iter) = ordqueue::new(4);
    Ok((
        Collector { queue },
        Writer { queue_iter: Some(queue_iter), settings, audio: None },
    ))
}

/// Performs the encode and writes the container
pub struct Writer {
    queue_iter: Option<OrdQueueIter<ImgVec<RGB8>>>,
    settings: Settings,
    audio: Option<AudioTrack>,
}

impl Writer {
    /// Attach a PCM track to be companded and interleaved with the frames.
    /// Call before [`write`][Self::write].
    pub fn set_audio(&mut self, track: AudioTrack) {
        self.audio = Some(track);
    }

    /// Encode to `path`. This function will not return until the
    /// `Collector` is dropped.
    ///
    /// Writes through a temporary sibling file and renames on success, so
    /// a failed or aborted encode leaves no partially-written container.
    pub fn write<P: AsRef<Path>>(self, path: P, reporter: &mut dyn ProgressReporter) -> CatResult<EncodeInfo> {
        let path = path.as_ref();
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        let file = BufWriter::new(File::create(&tmp)?);
        match self.encode(file, reporter) {
            Ok(info) => {
                fs::rename(&tmp, path)?;
                Ok(info)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    /// Encode into any seekable writer (the length patches need `Seek`).
    /// `io::Cursor<Vec<u8>>` works for in-memory output.
    pub fn write_to<W: Write + Seek>(self, writer: W, reporter: &mut dyn ProgressReporter) -> CatResult<EncodeInfo> {
        self.encode(writer, reporter)
    }

    fn encode<W: Write + Seek>(mut self, writer: W, reporter: &mut dyn ProgressReporter) -> CatResult<EncodeInfo> {
        let settings = self.settings;
        let profile = settings.profile;
        let queue_iter = self.queue_iter.take().ok_or(Error::ThreadSend)?;

        // Buffer the clip: the quantizer needs the whole histogram before
        // the first chunk can be written.
        let mut builder = PaletteBuilder::new(settings.quality, profile.layout);
        let mut frames: Vec<ImgVec<RGB8>> = Vec::new();
        for image in queue_iter {
            let image = contiguous(image);
            if let Some(first) = frames.first() {
                if image.width() != first.width() || image.height() != first.height() {
                    return Err(Error::WrongSize(format!(
                        "Frame {} has wrong size ({}×{}, expected {}×{})",
                        frames.len(),
                        image.width(), image.height(),
                        first.width(), first.height(),
                    )));
                }
            } else {
                validate_dimensions(image.as_ref(), &profile)?;
            }
            builder.feed(image.pixels());
            frames.push(image);
        }
        if frames.is_empty() {
            return Err(Error::NoFrames);
        }
        if frames.len() < GOP_LEN {
            return Err(Error::TooFewFrames(frames.len(), GOP_LEN));
        }

        let palettes = builder.build();
        let nominal = frames.len() as u32;
        let (width, height) = (frames[0].width() as u32, frames[0].height() as u32);

        let mut header = Header {
            frames: nominal,
            width,
            height,
            version: version_byte(profile.layout, settings.compression),
            fps: settings.fps,
            audio_duration: 0,
            sample_rate: 0,
            audio_size: 0,
            channels: 0,
            bits_per_sample: 0,
        };
        let audio_cursor = match self.audio.as_ref().filter(|t| !t.is_empty()) {
            Some(track) => {
                header.audio_duration = track.duration_secs();
                header.sample_rate = track.sample_rate;
                header.audio_size = track.len() as u32;
                header.channels = track.channels;
                header.bits_per_sample = track.bits_per_sample();

                let data = track.compand();
                let expected = expected_encoded_frames(&profile, frames.len());
                let chunk = (data.len() / expected.max(1)).max(1);
                Some(AudioCursor { data, chunk, pos: 0 })
            }
            None => None,
        };

        let mut mux = Muxer::new(writer, settings.compression);
        mux.write_header(&header, &palettes)?;

        let mut session = Session {
            mux,
            settings,
            key: None,
            prev: None,
            bitstream: Vec::new(),
            encoded: 0,
            audio: audio_cursor,
        };

        let n = frames.len();
        let mut i = 0;
        while i < n {
            match profile.skip {
                SkipMode::Lookahead if i + 3 < n => {
                    if skip::similarity(frames[i + 1].as_ref(), frames[i + 2].as_ref()) >= profile.leniency {
                        let blend = skip::interpolate(frames[i + 1].as_ref(), frames[i + 2].as_ref());
                        session.encode_frame(frames[i].as_ref(), &palettes, reporter)?;
                        session.encode_frame(blend.as_ref(), &palettes, reporter)?;
                        session.encode_frame(frames[i + 3].as_ref(), &palettes, reporter)?;
                        i += 4;
                    } else {
                        session.encode_frame(frames[i].as_ref(), &palettes, reporter)?;
                        i += 1;
                    }
                }
                SkipMode::Pairwise if i + 1 < n => {
                    if skip::similarity(frames[i].as_ref(), frames[i + 1].as_ref()) >= profile.leniency {
                        let blend = skip::interpolate(frames[i].as_ref(), frames[i + 1].as_ref());
                        session.encode_frame(blend.as_ref(), &palettes, reporter)?;
                        i += 2;
                    } else {
                        session.encode_frame(frames[i].as_ref(), &palettes, reporter)?;
                        i += 1;
                    }
                }
                _ => {
                    session.encode_frame(frames[i].as_ref(), &palettes, reporter)?;
                    i += 1;
                }
            }
        }

        let encoded = session.encoded;
        session.mux.finalize(encoded, nominal, settings.fps)?;
        reporter.done(&format!("{encoded} frames encoded"));
        Ok(EncodeInfo {
            encoded_frames: encoded,
            palette_colors: palettes.colors,
            bytes_written: session.mux.bytes_written(),
        })
    }
}

/// Per-session encode state: reference grids, scratch bitstream, cursors.
struct Session<W: Write + Seek> {
    mux: Muxer<W>,
    settings: Settings,
    /// Grid of the last keyframe, the FILL baseline for inter frames.
    key: Option<EntryGrid>,
    /// Grid of the previously encoded frame, the COPY baseline.
    prev: Option<EntryGrid>,
    bitstream: Vec<u8>,
    encoded: u32,
    audio: Option<AudioCursor>,
}

impl<W: Write + Seek> Session<W> {
    fn encode_frame(
        &mut self,
        image: ImgRef<'_, RGB8>,
        palettes: &Palettes,
        reporter: &mut dyn ProgressReporter,
    ) -> CatResult<()> {
        let grid = EntryGrid::from_image(image, palettes);
        let is_keyframe = self.encoded as usize % GOP_LEN == 0;

        self.bitstream.clear();
        if is_keyframe {
            blocks::classify_frame(
                &grid, &grid, None,
                palettes, self.settings.fill_count, self.settings.copy_count,
                &mut self.bitstream,
            );
        } else {
            let (key, prev) = match (&self.key, &self.prev) {
                (Some(key), Some(prev)) => (key, prev),
                _ => return Err(Error::ThreadSend),
            };
            blocks::classify_frame(
                &grid, key, Some(prev),
                palettes, self.settings.fill_count, self.settings.copy_count,
                &mut self.bitstream,
            );
        }

        self.mux.write_frame(self.encoded + 1, &self.bitstream)?;
        if let Some(audio) = &mut self.audio {
            let chunk = audio.next_chunk();
            self.mux.write_audio(chunk)?;
        }

        if is_keyframe {
            self.key = Some(grid.clone());
        }
        self.prev = Some(grid);
        self.encoded += 1;

        reporter.written_bytes(self.mux.bytes_written());
        if !reporter.increase() {
            return Err(Error::Aborted);
        }
        Ok(())
    }
}

/// Companded track with the next-unconsumed-sample cursor.
struct AudioCursor {
    data: Vec<u8>,
    chunk: usize,
    pos: usize,
}

impl AudioCursor {
    fn next_chunk(&mut self) -> &[u8] {
        let n = self.chunk.min(self.data.len() - self.pos);
        let chunk = &self.data[self.pos..self.pos + n];
        self.pos += n;
        chunk
    }
}

fn validate_dimensions(image: ImgRef<'_, RGB8>, profile: &Profile) -> CatResult<()> {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 || w % 4 != 0 || h % 4 != 0 {
        return Err(Error::WrongSize(format!(
            "Frame size {w}×{h} must be divisible by 4 in both dimensions"
        )));
    }
    if let Some((pw, ph)) = profile.dimensions {
        if (w as u32, h as u32) != (pw, ph) {
            return Err(Error::WrongSize(format!(
                "Profile requires {pw}×{ph} frames, got {w}×{h}"
            )));
        }
    }
    Ok(())
}

/// How many chunks the skip heuristic is expected to let through; sizes
/// the per-frame audio chunks. Exact for leniency-0 profiles.
fn expected_encoded_frames(profile: &Profile, n: usize) -> usize {
    if profile.leniency > 0. {
        return n;
    }
    match profile.skip {
        SkipMode::Pairwise => n / 2 + n % 2,
        SkipMode::Lookahead => n / 4 * 3 + n % 4,
    }
}

fn contiguous(image: ImgVec<RGB8>) -> ImgVec<RGB8> {
    if image.width() == image.stride() {
        return image;
    }
    let mut buf = Vec::with_capacity(image.width() * image.height());
    for row in image.rows() {
        buf.extend_from_slice(row);
    }
    ImgVec::new(buf, image.width(), image.height())
}
