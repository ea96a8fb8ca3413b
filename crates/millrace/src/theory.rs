//! Closed-form queueing baselines.
//!
//! Steady-state formulas for the Markovian queues the engine is most
//! often validated against. The stability check's error messages and the
//! acceptance tests both compare simulated output against these.

/// Offered load `a = lambda / mu` in Erlangs.
pub fn offered_load(lambda: f64, mu: f64) -> f64 {
    lambda / mu
}

/// M/M/1 server utilization `rho = lambda / mu`.
pub fn mm1_utilization(lambda: f64, mu: f64) -> f64 {
    lambda / mu
}

/// M/M/1 mean wait in queue: `Wq = lambda / (mu * (mu - lambda))`.
///
/// Requires `lambda < mu`; at or beyond the boundary the queue has no
/// steady state and the result is meaningless.
pub fn mm1_wq(lambda: f64, mu: f64) -> f64 {
    lambda / (mu * (mu - lambda))
}

/// M/M/1 mean number waiting: `Lq = lambda * Wq`.
pub fn mm1_lq(lambda: f64, mu: f64) -> f64 {
    lambda * mm1_wq(lambda, mu)
}

/// M/M/1 mean time in system: `W = Wq + 1/mu`.
pub fn mm1_w(lambda: f64, mu: f64) -> f64 {
    mm1_wq(lambda, mu) + 1.0 / mu
}

/// Erlang-C: the probability an arriving customer must wait in an
/// M/M/c queue with offered load `a = lambda / mu` Erlangs.
pub fn erlang_c(servers: u32, a: f64) -> f64 {
    let c = f64::from(servers);
    let rho = a / c;

    // Accumulate a^k / k! iteratively; the running term never overflows
    // for any sane server count.
    let mut term = 1.0;
    let mut sum = 0.0;
    for k in 0..servers {
        sum += term;
        term *= a / f64::from(k + 1);
    }
    // term is now a^c / c!.
    let numerator = term;
    numerator / ((1.0 - rho) * sum + numerator)
}

/// M/M/c mean wait in queue: `Wq = C(c, a) / (c * mu - lambda)`.
pub fn mmc_wq(lambda: f64, mu: f64, servers: u32) -> f64 {
    let a = offered_load(lambda, mu);
    erlang_c(servers, a) / (f64::from(servers) * mu - lambda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.5, 1.0, 1.0; "half load")]
    #[test_case(0.8, 1.0, 4.0; "eighty percent")]
    #[test_case(0.9, 1.0, 9.0; "ninety percent")]
    fn mm1_wq_classic_values(lambda: f64, mu: f64, expected: f64) {
        assert!((mm1_wq(lambda, mu) - expected).abs() < 1e-9);
    }

    #[test]
    fn erlang_c_with_one_server_reduces_to_rho() {
        // For c = 1 the waiting probability is the utilization itself,
        // so M/M/c collapses to M/M/1.
        for lambda in [0.3, 0.5, 0.8, 0.9] {
            assert!((erlang_c(1, lambda) - lambda).abs() < 1e-12);
            assert!((mmc_wq(lambda, 1.0, 1) - mm1_wq(lambda, 1.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn erlang_c_textbook_case() {
        // lambda = 2.5, mu = 1, c = 3: C ~ 0.7022, Wq ~ 1.4045.
        let c = erlang_c(3, 2.5);
        assert!((c - 0.70219).abs() < 1e-4, "got {c}");
        let wq = mmc_wq(2.5, 1.0, 3);
        assert!((wq - 1.40437).abs() < 1e-4, "got {wq}");
    }

    #[test]
    fn littles_law_ties_the_mm1_formulas_together() {
        let (lambda, mu) = (0.8, 1.0);
        assert!((mm1_lq(lambda, mu) - lambda * mm1_wq(lambda, mu)).abs() < 1e-12);
        assert!((mm1_w(lambda, mu) - (mm1_wq(lambda, mu) + 1.0 / mu)).abs() < 1e-12);
    }
}
