use super::traits::{Frame, FrameStore, StoreError};
use crate::core::models::BoxGeometry;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

/// CSV-backed reference frame store.
///
/// One record per atom per frame; the box geometry is repeated on every
/// record so each file is self-contained and appendable without a header
/// rewrite. Not a high-performance format; it exists so the engine can be
/// exercised end-to-end without an external trajectory library.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFrameStore;

impl CsvFrameStore {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameRow {
    frame: u64,
    atom: u64,
    x: f64,
    y: f64,
    z: f64,
    box_lx: f64,
    box_ly: f64,
    box_lz: f64,
    box_alpha: f64,
    box_beta: f64,
    box_gamma: f64,
}

impl FrameStore for CsvFrameStore {
    fn append(&self, path: &Path, frames: &[Frame]) -> Result<(), StoreError> {
        if frames.is_empty() {
            return Ok(());
        }
        let base = self.frame_count(path)? as u64;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        for (offset, frame) in frames.iter().enumerate() {
            let geometry = frame.box_geometry;
            for (atom, position) in frame.positions.iter().enumerate() {
                writer.serialize(FrameRow {
                    frame: base + offset as u64,
                    atom: atom as u64,
                    x: position.x,
                    y: position.y,
                    z: position.z,
                    box_lx: geometry.lengths[0],
                    box_ly: geometry.lengths[1],
                    box_lz: geometry.lengths[2],
                    box_alpha: geometry.angles[0],
                    box_beta: geometry.angles[1],
                    box_gamma: geometry.angles[2],
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn load_frame(&self, path: &Path, index: usize) -> Result<Frame, StoreError> {
        let mut reader = match csv::ReaderBuilder::new().has_headers(false).from_path(path) {
            Ok(reader) => reader,
            Err(error) => {
                return Err(match error.kind() {
                    csv::ErrorKind::Io(_) => StoreError::FrameOutOfRange {
                        path: path.to_path_buf(),
                        index,
                        available: 0,
                    },
                    _ => StoreError::Csv(error),
                });
            }
        };

        let mut positions = Vec::new();
        let mut box_geometry = None;
        let mut max_frame_seen = None;

        for record in reader.deserialize::<FrameRow>() {
            let row = record?;
            max_frame_seen = Some(max_frame_seen.map_or(row.frame, |m: u64| m.max(row.frame)));
            if row.frame == index as u64 {
                if positions.len() != row.atom as usize {
                    return Err(StoreError::MalformedRecord {
                        path: path.to_path_buf(),
                        message: format!(
                            "atom index {} out of order in frame {}",
                            row.atom, row.frame
                        ),
                    });
                }
                positions.push(Point3::new(row.x, row.y, row.z));
                box_geometry = Some(BoxGeometry::new(
                    [row.box_lx, row.box_ly, row.box_lz],
                    [row.box_alpha, row.box_beta, row.box_gamma],
                ));
            }
        }

        match box_geometry {
            Some(box_geometry) => Ok(Frame {
                positions,
                box_geometry,
            }),
            None => Err(StoreError::FrameOutOfRange {
                path: path.to_path_buf(),
                index,
                available: max_frame_seen.map_or(0, |m| m as usize + 1),
            }),
        }
    }

    fn frame_count(&self, path: &Path) -> Result<usize, StoreError> {
        if !path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
        let mut max_frame = None;
        for record in reader.deserialize::<FrameRow>() {
            let row = record?;
            max_frame = Some(max_frame.map_or(row.frame, |m: u64| m.max(row.frame)));
        }
        Ok(max_frame.map_or(0, |m| m as usize + 1))
    }
}
