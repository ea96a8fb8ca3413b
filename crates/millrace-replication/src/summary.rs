//! Output analysis across replications.
//!
//! Each metric arrives as one value per replication. The analyzer
//! produces a dispersion summary (the between-replication standard
//! deviation uses n-1), a Student-t confidence interval, and the
//! sequential-sampling convergence figures: achieved relative half-width
//! and the projected replication count to reach a target.

use serde::{Deserialize, Serialize};

// ============================================================================
// Confidence Levels
// ============================================================================

/// Supported two-sided confidence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Ninety,
    #[default]
    NinetyFive,
    NinetyNine,
}

impl ConfidenceLevel {
    /// The level as a probability.
    pub fn as_f64(self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 0.90,
            ConfidenceLevel::NinetyFive => 0.95,
            ConfidenceLevel::NinetyNine => 0.99,
        }
    }

    /// Two-sided Student-t quantile for `df` degrees of freedom.
    ///
    /// Exact table rows for df 1..=30; beyond 30 the normal quantile is
    /// close enough for output analysis and is used as the fallback.
    pub fn t_quantile(self, df: u64) -> f64 {
        if df == 0 {
            return f64::INFINITY;
        }
        let table = match self {
            ConfidenceLevel::Ninety => &T_TABLE_90,
            ConfidenceLevel::NinetyFive => &T_TABLE_95,
            ConfidenceLevel::NinetyNine => &T_TABLE_99,
        };
        if df <= 30 {
            table[(df - 1) as usize]
        } else {
            self.z_quantile()
        }
    }

    /// Two-sided standard-normal quantile.
    pub fn z_quantile(self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 1.6449,
            ConfidenceLevel::NinetyFive => 1.9600,
            ConfidenceLevel::NinetyNine => 2.5758,
        }
    }
}

/// t_{df, 0.95}: two-sided 90%.
const T_TABLE_90: [f64; 30] = [
    6.314, 2.920, 2.353, 2.132, 2.015, 1.943, 1.895, 1.860, 1.833, 1.812, 1.796, 1.782, 1.771,
    1.761, 1.753, 1.746, 1.740, 1.734, 1.729, 1.725, 1.721, 1.717, 1.714, 1.711, 1.708, 1.706,
    1.703, 1.701, 1.699, 1.697,
];

/// t_{df, 0.975}: two-sided 95%.
const T_TABLE_95: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

/// t_{df, 0.995}: two-sided 99%.
const T_TABLE_99: [f64; 30] = [
    63.657, 9.925, 5.841, 4.604, 4.032, 3.707, 3.499, 3.355, 3.250, 3.169, 3.106, 3.055, 3.012,
    2.977, 2.947, 2.921, 2.898, 2.878, 2.861, 2.845, 2.831, 2.819, 2.807, 2.797, 2.787, 2.779,
    2.771, 2.763, 2.756, 2.750,
];

// ============================================================================
// Metric Summary
// ============================================================================

/// Dispersion summary of one metric across replications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub n: u64,
    pub mean: f64,
    /// Sample standard deviation (n-1).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Lower and upper quartiles.
    pub q1: f64,
    pub q3: f64,
    /// Deciles p10 through p90.
    pub deciles: [f64; 9],
    pub p95: f64,
    pub p99: f64,
}

impl MetricSummary {
    /// Summarizes one value per replication. Empty input yields an
    /// all-zero summary with `n = 0`.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                n: 0,
                mean: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                median: 0.0,
                q1: 0.0,
                q3: 0.0,
                deciles: [0.0; 9],
                p95: 0.0,
                p99: 0.0,
            };
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut deciles = [0.0; 9];
        for (i, slot) in deciles.iter_mut().enumerate() {
            *slot = percentile(&sorted, (i + 1) as f64 / 10.0);
        }

        Self {
            n: n as u64,
            mean,
            std_dev,
            min: sorted[0],
            max: sorted[n - 1],
            median: percentile(&sorted, 0.5),
            q1: percentile(&sorted, 0.25),
            q3: percentile(&sorted, 0.75),
            deciles,
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Linear-interpolation percentile of a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let frac = position - lower as f64;
    sorted[lower] + frac * (sorted[upper] - sorted[lower])
}

// ============================================================================
// Confidence Interval and Convergence
// ============================================================================

/// Student-t confidence interval on the replication mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub level: ConfidenceLevel,
    pub mean: f64,
    /// `t_{n-1} * s / sqrt(n)`.
    pub half_width: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn from_values(values: &[f64], level: ConfidenceLevel) -> Self {
        let summary = MetricSummary::from_values(values);
        Self::from_summary(&summary, level)
    }

    pub fn from_summary(summary: &MetricSummary, level: ConfidenceLevel) -> Self {
        let half_width = if summary.n > 1 {
            let t = level.t_quantile(summary.n - 1);
            t * summary.std_dev / (summary.n as f64).sqrt()
        } else {
            f64::INFINITY
        };
        Self {
            level,
            mean: summary.mean,
            half_width,
            lower: summary.mean - half_width,
            upper: summary.mean + half_width,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Sequential-sampling convergence check against a target relative
/// half-width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    /// Target relative half-width (epsilon).
    pub target: f64,
    /// Achieved relative half-width `h / |mean|`.
    pub achieved: f64,
    /// Projected replications to reach the target:
    /// `ceil((t * s / (epsilon * |mean|))^2)`.
    pub required_replications: u64,
    pub converged: bool,
}

impl Convergence {
    pub fn assess(summary: &MetricSummary, interval: &ConfidenceInterval, target: f64) -> Self {
        let scale = summary.mean.abs();
        if scale < 1e-12 || summary.n < 2 {
            // A zero-mean metric has no relative precision to speak of.
            return Self {
                target,
                achieved: f64::INFINITY,
                required_replications: summary.n.max(2),
                converged: false,
            };
        }
        let achieved = interval.half_width / scale;
        let t = interval.level.t_quantile(summary.n - 1);
        let required = (t * summary.std_dev / (target * scale)).powi(2).ceil();
        Self {
            target,
            achieved,
            required_replications: required.max(2.0) as u64,
            converged: achieved <= target,
        }
    }
}

// ============================================================================
// Independence Diagnostics
// ============================================================================

/// Lag-1 autocorrelation of the replication sequence.
///
/// Replications are independent by construction, so this should hover
/// near zero; a large value flags seed-stream coupling.
pub fn lag1_autocorrelation(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let denom: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    if denom <= 0.0 {
        return 0.0;
    }
    let numer: f64 = values
        .windows(2)
        .map(|w| (w[0] - mean) * (w[1] - mean))
        .sum();
    numer / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn summary_uses_sample_std_dev() {
        let summary = MetricSummary::from_values(&[2.0, 4.0, 6.0]);
        assert_eq!(summary.n, 3);
        assert_eq!(summary.mean, 4.0);
        // Sample (n-1) form: sqrt(8/2) = 2.
        assert!((summary.std_dev - 2.0).abs() < 1e-12);
        assert_eq!(summary.median, 4.0);
        assert_eq!((summary.min, summary.max), (2.0, 6.0));
    }

    #[test]
    fn percentiles_interpolate() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let summary = MetricSummary::from_values(&values);
        assert!((summary.median - 50.5).abs() < 1e-12);
        assert!((summary.p95 - 95.05).abs() < 1e-9);
        assert!((summary.deciles[0] - 10.9).abs() < 1e-9);
        assert!((summary.deciles[8] - 90.1).abs() < 1e-9);
    }

    #[test_case(ConfidenceLevel::Ninety, 10, 1.812; "90 percent df 10")]
    #[test_case(ConfidenceLevel::NinetyFive, 10, 2.228; "95 percent df 10")]
    #[test_case(ConfidenceLevel::NinetyFive, 29, 2.045; "95 percent df 29")]
    #[test_case(ConfidenceLevel::NinetyNine, 20, 2.845; "99 percent df 20")]
    #[test_case(ConfidenceLevel::NinetyFive, 200, 1.9600; "large df falls back to normal")]
    fn t_table_rows(level: ConfidenceLevel, df: u64, expected: f64) {
        assert!((level.t_quantile(df) - expected).abs() < 1e-9);
    }

    #[test]
    fn interval_half_width_matches_hand_computation() {
        // n = 4: h = t_3 * s / sqrt(4).
        let interval =
            ConfidenceInterval::from_values(&[8.0, 10.0, 12.0, 10.0], ConfidenceLevel::NinetyFive);
        let summary = MetricSummary::from_values(&[8.0, 10.0, 12.0, 10.0]);
        let expected = 3.182 * summary.std_dev / 2.0;
        assert!((interval.half_width - expected).abs() < 1e-9);
        assert!(interval.contains(10.0));
        assert!(!interval.contains(100.0));
    }

    #[test]
    fn convergence_projects_required_replications() {
        let values = vec![10.0, 11.0, 9.0, 10.5, 9.5];
        let summary = MetricSummary::from_values(&values);
        let interval = ConfidenceInterval::from_summary(&summary, ConfidenceLevel::NinetyFive);
        let convergence = Convergence::assess(&summary, &interval, 0.01);

        assert!(!convergence.converged);
        assert!(convergence.required_replications > values.len() as u64);

        let loose = Convergence::assess(&summary, &interval, 0.5);
        assert!(loose.converged);
    }

    #[test]
    fn autocorrelation_of_alternating_sequence_is_negative() {
        let values = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let r1 = lag1_autocorrelation(&values);
        assert!(r1 < -0.8, "alternation is strongly anticorrelated, got {r1}");
    }

    #[test]
    fn autocorrelation_of_constant_sequence_is_zero() {
        assert_eq!(lag1_autocorrelation(&[3.0, 3.0, 3.0]), 0.0);
    }
}
