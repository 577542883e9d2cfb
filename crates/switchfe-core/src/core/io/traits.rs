use crate::core::models::{BoxGeometry, SamplerState};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("frame {index} not found in '{path}' ({available} frames available)")]
    FrameOutOfRange {
        path: PathBuf,
        index: usize,
        available: usize,
    },

    #[error("malformed trajectory record in '{path}': {message}")]
    MalformedRecord { path: PathBuf, message: String },
}

/// One stored configuration: positions plus box geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub positions: Vec<Point3<f64>>,
    pub box_geometry: BoxGeometry,
}

impl Frame {
    pub fn from_sampler_state(state: &SamplerState) -> Self {
        Self {
            positions: state.positions.clone(),
            box_geometry: state.box_geometry,
        }
    }

    pub fn into_sampler_state(self) -> SamplerState {
        SamplerState::new(self.positions, self.box_geometry)
    }

    /// Estimated in-memory footprint, used by the chunking threshold.
    pub fn estimated_bytes(&self) -> usize {
        self.positions.len() * 3 * std::mem::size_of::<f64>()
            + 6 * std::mem::size_of::<f64>()
    }
}

/// Defines the interface for persisting trajectory frames.
///
/// Stores are keyed by path with append-or-create semantics: appending to a
/// path that does not exist creates it, and appending to an existing path
/// preserves all prior frames. Frame indices within one file are local and
/// contiguous from zero.
pub trait FrameStore: Send + Sync {
    /// Appends `frames` to the file at `path`, creating it if necessary.
    fn append(&self, path: &Path, frames: &[Frame]) -> Result<(), StoreError>;

    /// Loads the frame at local index `index` from the file at `path`.
    fn load_frame(&self, path: &Path, index: usize) -> Result<Frame, StoreError>;

    /// Number of frames currently stored at `path` (zero if absent).
    fn frame_count(&self, path: &Path) -> Result<usize, StoreError>;
}
