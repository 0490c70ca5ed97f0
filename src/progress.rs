//! For tracking encode progress and aborting early

/// A trait that is used to report progress to some consumer.
pub trait ProgressReporter: Send {
    /// Called after each frame chunk has been written.
    ///
    /// This method may return `false` to abort processing; the encoder
    /// stops at the next frame boundary and no output file is left behind.
    fn increase(&mut self) -> bool;

    /// File size so far
    fn written_bytes(&mut self, _current_file_size_in_bytes: u64) {}

    /// Writing is done when `Writer::write()` returns
    fn done(&mut self, _msg: &str) {}
}

/// No-op progress reporter
pub struct NoProgress {}

impl ProgressReporter for NoProgress {
    fn increase(&mut self) -> bool {
        true
    }
    fn done(&mut self, _msg: &str) {}
}
