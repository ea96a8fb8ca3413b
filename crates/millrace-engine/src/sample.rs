//! Variate generation.
//!
//! Turns a validated [`Distribution`] descriptor into samples, drawing
//! exclusively from the replication's [`SimRng`] stream so that every
//! stochastic choice stays on the deterministic path. Families use the
//! standard transforms: inverse CDF where it is closed-form, Box-Muller
//! for the normal, Marsaglia-Tsang for the gamma, counting constructions
//! for the discrete families.
//!
//! Callers that need a *duration* go through [`Sample::sample_duration`],
//! which upholds the kernel contract that simulated spans are never
//! negative (normal draws below zero clamp to [`MIN_DURATION`]).

use millrace_types::{Distribution, MIN_DURATION};

use crate::rng::SimRng;

/// Sampling interface for distribution descriptors.
pub trait Sample {
    /// Draws one sample on the family's natural support.
    fn sample(&self, rng: &mut SimRng) -> f64;

    /// Draws one nonnegative duration sample.
    fn sample_duration(&self, rng: &mut SimRng) -> f64 {
        let value = self.sample(rng);
        if value < 0.0 { MIN_DURATION } else { value }
    }
}

impl Sample for Distribution {
    fn sample(&self, rng: &mut SimRng) -> f64 {
        match self {
            Distribution::Constant { value } => *value,

            Distribution::Uniform { min, max } => min + rng.next_f64() * (max - min),

            Distribution::Triangular { min, mode, max } => {
                sample_triangular(rng, *min, *mode, *max)
            }

            Distribution::Exponential { rate } => sample_exponential(rng, *rate),

            Distribution::Normal { mean, std_dev } => mean + std_dev * standard_normal(rng),

            Distribution::Lognormal { log_mean, log_std } => {
                (log_mean + log_std * standard_normal(rng)).exp()
            }

            Distribution::Gamma { shape, scale } => scale * standard_gamma(rng, *shape),

            Distribution::Erlang { k, rate } => {
                // Sum of k independent exponentials.
                (0..*k).map(|_| sample_exponential(rng, *rate)).sum()
            }

            Distribution::Weibull { scale, shape } => {
                scale * (-(1.0 - rng.uniform()).ln()).powf(1.0 / shape)
            }

            Distribution::Beta { alpha, beta } => {
                let x = standard_gamma(rng, *alpha);
                let y = standard_gamma(rng, *beta);
                x / (x + y)
            }

            Distribution::PearsonV { shape, scale } => {
                // Inverse gamma.
                scale / standard_gamma(rng, *shape)
            }

            Distribution::PearsonVI {
                shape1,
                shape2,
                scale,
            } => {
                let x = standard_gamma(rng, *shape1);
                let y = standard_gamma(rng, *shape2);
                scale * x / y
            }

            Distribution::JohnsonSb {
                gamma,
                delta,
                lambda,
                xi,
            } => {
                let z = standard_normal(rng);
                xi + lambda / (1.0 + (-(z - gamma) / delta).exp())
            }

            Distribution::JohnsonSu {
                gamma,
                delta,
                lambda,
                xi,
            } => {
                let z = standard_normal(rng);
                xi + lambda * ((z - gamma) / delta).sinh()
            }

            Distribution::LogLogistic { scale, shape } => {
                let u = rng.uniform();
                scale * (u / (1.0 - u)).powf(1.0 / shape)
            }

            Distribution::Discrete {
                values,
                probabilities,
            } => {
                let u = rng.uniform();
                let mut cumulative = 0.0;
                for (value, p) in values.iter().zip(probabilities) {
                    cumulative += p;
                    if u <= cumulative {
                        return *value;
                    }
                }
                // Rounding shortfall within the validated tolerance.
                values[values.len() - 1]
            }

            Distribution::Empirical { points } => {
                let u = rng.uniform();
                let first = &points[0];
                if u <= first.cum_prob {
                    return first.value;
                }
                for pair in points.windows(2) {
                    let (lo, hi) = (&pair[0], &pair[1]);
                    if u <= hi.cum_prob {
                        let span = hi.cum_prob - lo.cum_prob;
                        if span <= 0.0 {
                            return hi.value;
                        }
                        let frac = (u - lo.cum_prob) / span;
                        return lo.value + frac * (hi.value - lo.value);
                    }
                }
                points[points.len() - 1].value
            }

            Distribution::Poisson { mean } => sample_poisson(rng, *mean),

            Distribution::Binomial { trials, p } => {
                let successes = (0..*trials).filter(|_| rng.next_f64() < *p).count();
                successes as f64
            }

            Distribution::Geometric { p } => sample_geometric(rng, *p),

            Distribution::NegativeBinomial { successes, p } => {
                (0..*successes).map(|_| sample_geometric(rng, *p)).sum()
            }

            Distribution::TruncatedNormal {
                mean,
                std_dev,
                min,
                max,
            } => {
                // Rejection on the parent normal. The loop is bounded to
                // keep pathological truncation windows from stalling the
                // dispatch loop; the clamp is then the documented
                // behavior, not a silent default.
                for _ in 0..1_000 {
                    let x = mean + std_dev * standard_normal(rng);
                    if x >= *min && x <= *max {
                        return x;
                    }
                }
                min.max(mean.min(*max))
            }

            Distribution::TruncatedExponential { rate, min, max } => {
                // Inverse CDF restricted to [F(min), F(max)].
                let f_min = 1.0 - (-rate * min).exp();
                let f_max = 1.0 - (-rate * max).exp();
                let u = f_min + rng.uniform() * (f_max - f_min);
                -(1.0 - u).ln() / rate
            }

            Distribution::Unknown { tag } => {
                tracing::warn!(tag = %tag, "sampling unknown distribution family, returning 1");
                1.0
            }
        }
    }
}

/// Inverse-CDF exponential: `-ln(1 - U) / rate`.
fn sample_exponential(rng: &mut SimRng, rate: f64) -> f64 {
    -(1.0 - rng.uniform()).ln() / rate
}

/// Inverse-CDF triangular, split at `f = (mode - min) / (max - min)`.
fn sample_triangular(rng: &mut SimRng, min: f64, mode: f64, max: f64) -> f64 {
    let width = max - min;
    if width <= 0.0 {
        return min;
    }
    let f = (mode - min) / width;
    let u = rng.uniform();
    if u < f {
        min + (u * width * (mode - min)).sqrt()
    } else {
        max - ((1.0 - u) * width * (max - mode)).sqrt()
    }
}

/// Standard normal via Box-Muller.
fn standard_normal(rng: &mut SimRng) -> f64 {
    let u1 = rng.uniform();
    let u2 = rng.uniform();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Standard gamma (scale 1) via Marsaglia-Tsang.
///
/// For `shape < 1` the usual boost applies: draw at `shape + 1` and
/// multiply by `U^(1/shape)`.
fn standard_gamma(rng: &mut SimRng, shape: f64) -> f64 {
    if shape < 1.0 {
        let boost = rng.uniform().powf(1.0 / shape);
        return boost * standard_gamma(rng, shape + 1.0);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u = rng.uniform();
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v;
        }
    }
}

/// Poisson by Knuth's product-of-uniforms method.
fn sample_poisson(rng: &mut SimRng, mean: f64) -> f64 {
    let threshold = (-mean).exp();
    let mut count = 0u64;
    let mut product = rng.uniform();
    while product > threshold {
        count += 1;
        product *= rng.uniform();
    }
    count as f64
}

/// Geometric (failures before the first success) by inverse CDF.
fn sample_geometric(rng: &mut SimRng, p: f64) -> f64 {
    if p >= 1.0 {
        return 0.0;
    }
    let u = rng.uniform();
    ((1.0 - u).ln() / (1.0 - p).ln()).floor()
}
