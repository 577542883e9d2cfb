use crate::core::io::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Direction of a nonequilibrium switching protocol.
///
/// The direction names the end-state the switching starts *from*: forward
/// particles start from decorrelated end-state 0 samples and anneal 0 -> 1,
/// reverse particles start from end-state 1 and anneal 1 -> 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// The end-state whose equilibrium pool supplies starting snapshots.
    pub fn start_endstate(&self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    /// Master-lambda endpoints of the schedule, start to finish.
    pub fn endpoints(&self) -> (f64, f64) {
        match self {
            Direction::Forward => (0.0, 1.0),
            Direction::Reverse => (1.0, 0.0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Per-direction collection of incremental-work sequences, one per annealed
/// particle, in submission order.
///
/// Only incremental work is stored; cumulative sums are derived on demand so
/// the two can never disagree.
#[derive(Debug, Clone, Default)]
pub struct WorkLedger {
    forward: Vec<Vec<f64>>,
    reverse: Vec<Vec<f64>>,
}

#[derive(Debug, Serialize)]
struct WorkRow<'a> {
    direction: &'a str,
    particle: usize,
    step: usize,
    incremental_work: f64,
    cumulative_work: f64,
}

impl WorkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, direction: Direction, incremental: Vec<f64>) {
        self.entries_mut(direction).push(incremental);
    }

    pub fn incremental(&self, direction: Direction) -> &[Vec<f64>] {
        self.entries(direction)
    }

    pub fn num_particles(&self, direction: Direction) -> usize {
        self.entries(direction).len()
    }

    pub fn is_empty(&self, direction: Direction) -> bool {
        self.entries(direction).is_empty()
    }

    /// Cumulative-work matrix: one row per particle, one column per schedule
    /// step, `matrix[p][i] == sum(incremental[p][0..=i])`.
    pub fn cumulative_matrix(&self, direction: Direction) -> Vec<Vec<f64>> {
        self.entries(direction)
            .iter()
            .map(|incremental| {
                incremental
                    .iter()
                    .scan(0.0, |acc, w| {
                        *acc += w;
                        Some(*acc)
                    })
                    .collect()
            })
            .collect()
    }

    /// Total work per particle (the final column of the cumulative matrix).
    pub fn final_works(&self, direction: Direction) -> Vec<f64> {
        self.entries(direction)
            .iter()
            .map(|incremental| incremental.iter().sum())
            .collect()
    }

    /// Writes every recorded work value to a CSV file for downstream
    /// analysis.
    pub fn export_csv(&self, path: &Path) -> Result<(), StoreError> {
        let mut writer = csv::Writer::from_path(path)?;
        for direction in [Direction::Forward, Direction::Reverse] {
            let label = direction.to_string();
            for (particle, incremental) in self.entries(direction).iter().enumerate() {
                let mut cumulative = 0.0;
                for (step, work) in incremental.iter().enumerate() {
                    cumulative += work;
                    writer.serialize(WorkRow {
                        direction: &label,
                        particle,
                        step,
                        incremental_work: *work,
                        cumulative_work: cumulative,
                    })?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn entries(&self, direction: Direction) -> &Vec<Vec<f64>> {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Reverse => &self.reverse,
        }
    }

    fn entries_mut(&mut self, direction: Direction) -> &mut Vec<Vec<f64>> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Reverse => &mut self.reverse,
        }
    }
}
