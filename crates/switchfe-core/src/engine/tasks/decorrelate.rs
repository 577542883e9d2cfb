use super::EquilibriumResult;
use crate::core::io::FrameStore;
use crate::core::models::SamplerState;
use crate::core::stats::{EquilibrationAnalysis, detect_equilibration, subsample_independent};
use crate::engine::error::{ConsistencyError, EngineError};
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use tracing::{debug, info};

/// Decorrelation outcome for one end-state: which global snapshot indices
/// survived, and where each of them lives on disk.
#[derive(Debug, Clone)]
pub struct Decorrelation {
    pub analysis: EquilibrationAnalysis,
    /// Retained global snapshot indices, ascending.
    pub retained: Vec<usize>,
    /// One `(file, local_index)` location per retained index, parallel to
    /// `retained`.
    resolved: Vec<(PathBuf, usize)>,
}

impl Decorrelation {
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn location_of(&self, global_index: usize) -> Option<&(PathBuf, usize)> {
        self.retained
            .iter()
            .position(|&i| i == global_index)
            .and_then(|p| self.resolved.get(p))
    }
}

/// Accumulated equilibrium sampling history for one end-state: trajectory
/// chunk records, the reduced-potential series, and (once computed) the
/// decorrelated snapshot table.
///
/// Results from successive equilibration calls are appended, never replaced;
/// decorrelation always runs over the full history.
#[derive(Debug, Default)]
pub struct EquilibriumPool {
    endstate: usize,
    files: Vec<(PathBuf, usize)>,
    reduced_potentials: Vec<f64>,
    decorrelation: Option<Decorrelation>,
}

impl EquilibriumPool {
    pub fn new(endstate: usize) -> Self {
        Self {
            endstate,
            ..Self::default()
        }
    }

    pub fn endstate(&self) -> usize {
        self.endstate
    }

    pub fn files(&self) -> &[(PathBuf, usize)] {
        &self.files
    }

    pub fn reduced_potentials(&self) -> &[f64] {
        &self.reduced_potentials
    }

    pub fn total_snapshots(&self) -> usize {
        self.files.iter().map(|(_, count)| count).sum()
    }

    pub fn decorrelation(&self) -> Option<&Decorrelation> {
        self.decorrelation.as_ref()
    }

    /// Merges one equilibration result into the history. Any previously
    /// computed decorrelation table is invalidated by new data.
    pub fn absorb(&mut self, result: &EquilibriumResult) {
        self.files.extend(result.files.iter().cloned());
        self.reduced_potentials
            .extend(result.reduced_potentials.iter().copied());
        self.decorrelation = None;
    }

    /// Runs equilibration detection and independent subsampling over the full
    /// reduced-potential history, then maps every retained global index to
    /// exactly one `(file, local_index)` pair.
    ///
    /// An index that cannot be resolved to exactly one file is a fatal
    /// consistency error, as is a mismatch between the snapshot count on disk
    /// and the recorded series length.
    pub fn decorrelate(&mut self) -> Result<&Decorrelation, EngineError> {
        let samples = self.reduced_potentials.len();
        let snapshots = self.total_snapshots();
        if !self.files.is_empty() && snapshots != samples {
            return Err(ConsistencyError::SnapshotCountMismatch {
                endstate: self.endstate,
                snapshots,
                samples,
            }
            .into());
        }

        let analysis = detect_equilibration(&self.reduced_potentials);
        let local = subsample_independent(
            &self.reduced_potentials[analysis.t0..],
            analysis.statistical_inefficiency,
        );
        let retained: Vec<usize> = local.iter().map(|i| i + analysis.t0).collect();
        info!(
            endstate = self.endstate,
            t0 = analysis.t0,
            statistical_inefficiency = analysis.statistical_inefficiency,
            retained = retained.len(),
            "decorrelated equilibrium samples"
        );

        // Without trajectory files the decorrelation is still statistically
        // meaningful, but there is nothing to resolve snapshots against.
        let mut resolved = Vec::new();
        if !self.files.is_empty() {
            resolved.reserve(retained.len());
            for &index in &retained {
                resolved.push(self.resolve(index)?);
            }
        }

        self.decorrelation = Some(Decorrelation {
            analysis,
            retained,
            resolved,
        });
        Ok(self.decorrelation.as_ref().unwrap())
    }

    /// Maps a global snapshot index onto the file that holds it.
    fn resolve(&self, index: usize) -> Result<(PathBuf, usize), EngineError> {
        let mut offset = 0;
        let mut matches = Vec::new();
        for (path, count) in &self.files {
            if index >= offset && index < offset + count {
                matches.push((path.clone(), index - offset));
            }
            offset += count;
        }
        if matches.len() != 1 {
            return Err(ConsistencyError::AmbiguousSnapshot {
                index,
                matches: matches.len(),
            }
            .into());
        }
        Ok(matches.into_iter().next().unwrap())
    }

    /// Draws one decorrelated snapshot uniformly at random and loads it from
    /// disk.
    pub fn draw_snapshot(
        &self,
        store: &dyn FrameStore,
        rng: &mut impl Rng,
    ) -> Result<SamplerState, EngineError> {
        let decorrelation =
            self.decorrelation
                .as_ref()
                .ok_or(ConsistencyError::NoDecorrelatedSamples {
                    endstate: self.endstate,
                })?;
        let position = decorrelation
            .resolved
            .choose(rng)
            .ok_or(ConsistencyError::NoDecorrelatedSamples {
                endstate: self.endstate,
            })?;
        let (path, local_index) = position;
        debug!(
            endstate = self.endstate,
            file = %path.display(),
            local_index,
            "drew annealing start snapshot"
        );
        let frame = store.load_frame(path, *local_index)?;
        Ok(frame.into_sampler_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{CsvFrameStore, Frame};
    use crate::core::models::{BoxGeometry, SamplerState};
    use nalgebra::Point3;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::path::Path;
    use tempfile::tempdir;

    fn result_with(files: Vec<(PathBuf, usize)>, reduced_potentials: Vec<f64>) -> EquilibriumResult {
        EquilibriumResult {
            endstate: 0,
            sampler_state: SamplerState::new(vec![Point3::origin()], BoxGeometry::cubic(1.0)),
            files,
            reduced_potentials,
            next_file_counter: 0,
            timing: None,
        }
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn absorb_appends_history_and_invalidates_decorrelation() {
        let mut pool = EquilibriumPool::new(0);
        pool.absorb(&result_with(
            vec![(PathBuf::from("a.csv"), 50)],
            noise(50, 1),
        ));
        pool.decorrelate().unwrap();
        assert!(pool.decorrelation().is_some());

        pool.absorb(&result_with(
            vec![(PathBuf::from("b.csv"), 50)],
            noise(50, 2),
        ));
        assert!(pool.decorrelation().is_none());
        assert_eq!(pool.total_snapshots(), 100);
        assert_eq!(pool.reduced_potentials().len(), 100);
    }

    #[test]
    fn every_retained_index_resolves_to_exactly_one_file() {
        let mut pool = EquilibriumPool::new(0);
        pool.absorb(&result_with(
            vec![(PathBuf::from("a.csv"), 30), (PathBuf::from("b.csv"), 70)],
            noise(100, 3),
        ));
        let decorrelation = pool.decorrelate().unwrap();
        for (position, &index) in decorrelation.retained.iter().enumerate() {
            let (path, local) = &decorrelation.resolved[position];
            if index < 30 {
                assert_eq!(path, Path::new("a.csv"));
                assert_eq!(*local, index);
            } else {
                assert_eq!(path, Path::new("b.csv"));
                assert_eq!(*local, index - 30);
            }
        }
    }

    #[test]
    fn snapshot_count_mismatch_is_a_consistency_error() {
        let mut pool = EquilibriumPool::new(1);
        pool.absorb(&result_with(vec![(PathBuf::from("a.csv"), 10)], noise(12, 4)));
        let error = pool.decorrelate().unwrap_err();
        assert!(matches!(
            error,
            EngineError::Consistency(ConsistencyError::SnapshotCountMismatch {
                endstate: 1,
                snapshots: 10,
                samples: 12,
            })
        ));
    }

    #[test]
    fn independent_series_survives_decorrelation_nearly_intact() {
        let mut pool = EquilibriumPool::new(0);
        let n = 400;
        pool.absorb(&result_with(vec![(PathBuf::from("a.csv"), n)], noise(n, 9)));
        let decorrelation = pool.decorrelate().unwrap();
        assert!(
            decorrelation.len() as f64 >= 0.8 * (n - decorrelation.analysis.t0) as f64,
            "retained {} of {}",
            decorrelation.len(),
            n
        );
    }

    #[test]
    fn drawing_without_decorrelation_is_an_error() {
        let pool = EquilibriumPool::new(0);
        let store = CsvFrameStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let error = pool.draw_snapshot(&store, &mut rng).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Consistency(ConsistencyError::NoDecorrelatedSamples { endstate: 0 })
        ));
    }

    #[test]
    fn drawn_snapshots_come_from_the_stored_trajectory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eq.csv");
        let store = CsvFrameStore::new();
        let frames: Vec<Frame> = (0..20)
            .map(|i| Frame {
                positions: vec![Point3::new(i as f64, 0.0, 0.0)],
                box_geometry: BoxGeometry::cubic(2.0),
            })
            .collect();
        store.append(&path, &frames).unwrap();

        let mut pool = EquilibriumPool::new(0);
        pool.absorb(&result_with(vec![(path.clone(), 20)], noise(20, 6)));
        pool.decorrelate().unwrap();

        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..5 {
            let snapshot = pool.draw_snapshot(&store, &mut rng).unwrap();
            let x = snapshot.positions[0].x;
            assert!(x >= 0.0 && x < 20.0 && x.fract() == 0.0);
        }
    }
}
