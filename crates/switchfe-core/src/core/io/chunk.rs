use super::traits::{Frame, FrameStore, StoreError};
use std::path::Path;
use tracing::debug;

/// In-memory frame buffer pending a flush.
///
/// The buffer is cleared only after a successful append, so a failed flush
/// leaves the frames in place for a retry. Flushed frames are appended to the
/// target file, never overwritten.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    frames: Vec<Frame>,
    estimated_bytes: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.estimated_bytes += frame.estimated_bytes();
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Estimated in-memory size of the buffered frames in bytes.
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Appends all buffered frames to `path` and clears the buffer. Returns
    /// the number of frames written.
    pub fn flush_to(&mut self, store: &dyn FrameStore, path: &Path) -> Result<usize, StoreError> {
        if self.frames.is_empty() {
            return Ok(0);
        }
        store.append(path, &self.frames)?;
        let written = self.frames.len();
        debug!(
            frames = written,
            bytes = self.estimated_bytes,
            path = %path.display(),
            "flushed trajectory chunk"
        );
        self.frames.clear();
        self.estimated_bytes = 0;
        Ok(written)
    }

    /// Discards the buffered frames without writing them.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.estimated_bytes = 0;
    }
}
