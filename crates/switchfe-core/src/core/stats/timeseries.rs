/// Result of scanning a reduced-potential series for its equilibrated region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquilibrationAnalysis {
    /// Index of the first sample considered equilibrated.
    pub t0: usize,
    /// Statistical inefficiency `g` of the production region (`>= 1`).
    pub statistical_inefficiency: f64,
    /// Effective number of uncorrelated samples in the production region.
    pub effective_samples: f64,
}

/// Integrated-autocorrelation estimate of the statistical inefficiency
/// `g = 1 + 2 * sum_t (1 - t/T) C(t)`, truncating the sum at the first
/// non-positive autocorrelation value. Returns 1.0 for series too short or
/// too flat to carry correlation information.
pub fn statistical_inefficiency(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return 1.0;
    }
    let mean = series.iter().sum::<f64>() / n as f64;
    let variance = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if variance <= f64::EPSILON {
        return 1.0;
    }

    let mut g = 1.0;
    for lag in 1..n {
        let mut autocorrelation = 0.0;
        for i in 0..n - lag {
            autocorrelation += (series[i] - mean) * (series[i + lag] - mean);
        }
        autocorrelation /= (n - lag) as f64 * variance;
        if autocorrelation <= 0.0 {
            break;
        }
        g += 2.0 * autocorrelation * (1.0 - lag as f64 / n as f64);
    }
    g.max(1.0)
}

/// Scans candidate burn-in origins and picks the one maximizing the effective
/// sample size of the remaining production region.
pub fn detect_equilibration(series: &[f64]) -> EquilibrationAnalysis {
    let n = series.len();
    if n < 3 {
        return EquilibrationAnalysis {
            t0: 0,
            statistical_inefficiency: 1.0,
            effective_samples: n as f64,
        };
    }

    let mut best = EquilibrationAnalysis {
        t0: 0,
        statistical_inefficiency: 1.0,
        effective_samples: 0.0,
    };
    // The last two samples can never form a production region worth keeping.
    for t0 in 0..n - 2 {
        let g = statistical_inefficiency(&series[t0..]);
        let effective = (n - t0) as f64 / g;
        if effective > best.effective_samples {
            best = EquilibrationAnalysis {
                t0,
                statistical_inefficiency: g,
                effective_samples: effective,
            };
        }
    }
    best
}

/// Thins the production region to an approximately independent subset by
/// striding at the statistical inefficiency. Returned indices are local to
/// `series` (prepend the burn-in offset for global indexing).
pub fn subsample_independent(series: &[f64], statistical_inefficiency: f64) -> Vec<usize> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let stride = statistical_inefficiency.max(1.0);
    let mut indices = Vec::new();
    let mut position: f64 = 0.0;
    while (position.round() as usize) < n {
        let index = position.round() as usize;
        if indices.last() != Some(&index) {
            indices.push(index);
        }
        position += stride;
    }
    indices
}
