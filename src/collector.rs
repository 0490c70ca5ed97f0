//! For adding frames to the encoder
//!
//! [`agmv::new()`][crate::new] returns the [`Collector`] that collects
//! source frames, and a [`Writer`][crate::Writer] that quantizes,
//! classifies, compresses and writes the container.

pub use imgref::ImgVec;
pub use rgb::RGB8;

use crate::error::CatResult;
use crate::ordqueue::OrdQueue;

/// Collect frames that will be encoded
///
/// Note that writing will finish only when the collector is dropped.
/// Collect frames on another thread, or call `drop(collector)` before
/// calling `writer.write()`!
pub struct Collector {
    pub(crate) queue: OrdQueue<ImgVec<RGB8>>,
}

impl Collector {
    /// Frame index starts at 0.
    ///
    /// Set each frame (index) only once, but you can set them in any order.
    /// However, out-of-order frames will be buffered in RAM, and big gaps in
    /// frame indices will cause high memory usage.
    ///
    /// The frame is a flat 24-bit RGB image; image decoding and any rescale
    /// to a profile's fixed resolution are the caller's job.
    ///
    /// If this function appears to be stuck after a few frames, it's because
    /// [`crate::Writer::write()`] is not running.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn add_frame_rgb(&self, frame_index: usize, frame: ImgVec<RGB8>) -> CatResult<()> {
        self.queue.push(frame_index, frame)
    }
}
