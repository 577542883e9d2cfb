use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("work value set is empty; nothing to estimate")]
    EmptyWorkSet,

    #[error("bidirectional estimator failed to converge after {0} iterations")]
    NoConvergence(usize),
}

/// A free-energy estimate in reduced (dimensionless) units, with its
/// first-order uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub value: f64,
    pub uncertainty: f64,
}

/// One-sided exponential-averaging estimator:
/// `dF = -ln < exp(-w) >` over the supplied reduced work values.
///
/// Evaluated through a log-sum-exp shift so that large work values do not
/// underflow; an all-zero work array yields exactly zero.
pub fn exp_estimate(work: &[f64]) -> Result<Estimate, StatsError> {
    if work.is_empty() {
        return Err(StatsError::EmptyWorkSet);
    }
    let n = work.len() as f64;

    let shift = work.iter().cloned().fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = work.iter().map(|w| (-(w - shift)).exp()).collect();
    let mean = shifted.iter().sum::<f64>() / n;
    let value = shift - mean.ln();

    // First-order propagation of the sample variance of exp(-w) through the
    // logarithm.
    let variance = shifted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let uncertainty = if n > 1.0 {
        (variance / (n - 1.0)).sqrt() / mean
    } else {
        0.0
    };

    Ok(Estimate { value, uncertainty })
}

const BAR_MAX_ITERATIONS: usize = 500;
const BAR_TOLERANCE: f64 = 1.0e-10;

/// Two-sided Bennett acceptance ratio estimator over forward and reverse
/// reduced work values.
///
/// Solves the self-consistency condition by bisection on the free-energy
/// difference; the uncertainty is the asymptotic variance of the Fermi
/// averages.
pub fn bar_estimate(forward: &[f64], reverse: &[f64]) -> Result<Estimate, StatsError> {
    if forward.is_empty() || reverse.is_empty() {
        return Err(StatsError::EmptyWorkSet);
    }
    let nf = forward.len() as f64;
    let nr = reverse.len() as f64;
    let log_ratio = (nf / nr).ln();

    let objective = |df: f64| -> f64 {
        let forward_sum: f64 = forward.iter().map(|w| fermi(log_ratio + w - df)).sum();
        let reverse_sum: f64 = reverse.iter().map(|w| fermi(-log_ratio + w + df)).sum();
        forward_sum - reverse_sum
    };

    // Bracket the root around the one-sided estimates from each direction.
    let exp_forward = exp_estimate(forward)?.value;
    let exp_reverse = -exp_estimate(reverse)?.value;
    let mut lower = exp_forward.min(exp_reverse) - 50.0;
    let mut upper = exp_forward.max(exp_reverse) + 50.0;

    // `objective` is monotonically increasing in df; widen once if the
    // initial bracket misses the sign change.
    if objective(lower) > 0.0 {
        lower -= 1000.0;
    }
    if objective(upper) < 0.0 {
        upper += 1000.0;
    }

    let mut value = 0.5 * (lower + upper);
    let mut converged = false;
    for _ in 0..BAR_MAX_ITERATIONS {
        value = 0.5 * (lower + upper);
        let f = objective(value);
        if f.abs() < BAR_TOLERANCE || (upper - lower) < BAR_TOLERANCE {
            converged = true;
            break;
        }
        if f < 0.0 {
            lower = value;
        } else {
            upper = value;
        }
    }
    if !converged {
        return Err(StatsError::NoConvergence(BAR_MAX_ITERATIONS));
    }

    let uncertainty = bar_uncertainty(forward, reverse, value, log_ratio);
    Ok(Estimate { value, uncertainty })
}

fn fermi(x: f64) -> f64 {
    1.0 / (1.0 + x.exp())
}

fn bar_uncertainty(forward: &[f64], reverse: &[f64], df: f64, log_ratio: f64) -> f64 {
    let nf = forward.len() as f64;
    let nr = reverse.len() as f64;

    let ff: Vec<f64> = forward.iter().map(|w| fermi(log_ratio + w - df)).collect();
    let fr: Vec<f64> = reverse.iter().map(|w| fermi(-log_ratio + w + df)).collect();

    let mean_ff = ff.iter().sum::<f64>() / nf;
    let mean_fr = fr.iter().sum::<f64>() / nr;
    let mean_ff2 = ff.iter().map(|x| x * x).sum::<f64>() / nf;
    let mean_fr2 = fr.iter().map(|x| x * x).sum::<f64>() / nr;

    if mean_ff <= f64::EPSILON || mean_fr <= f64::EPSILON {
        return f64::INFINITY;
    }
    let variance =
        (mean_ff2 / (mean_ff * mean_ff) - 1.0) / nf + (mean_fr2 / (mean_fr * mean_fr) - 1.0) / nr;
    variance.max(0.0).sqrt()
}
