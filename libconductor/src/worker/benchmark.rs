use std::time::{Duration, Instant};

use util::time::duration_as_ns;

const ITERATION_BATCH: u64 = 10_000;

pub struct BenchmarkResult {
    pub iterations: u64,
    pub duration_ns: u64,
    /// Time per iteration in nanoseconds; the worker's benchmark score.
    pub score_ns_per_iteration: f64,
    /// Folded output of the numeric loop. Returned so the computation is
    /// observable and cannot be optimized away.
    pub checksum: f64,
}

/// Runs the fixed synthetic benchmark over the given seed for at least the
/// target wall-clock interval. The loop is pure integer/float arithmetic,
/// identical on every worker, so the measured time per iteration is a
/// comparable proxy for single-thread speed.
pub fn run_benchmark(seed: u64, target: Duration) -> BenchmarkResult {
    let mut value = seed | 1;
    let mut checksum = 0f64;
    let mut iterations = 0u64;
    let start = Instant::now();

    loop {
        for _ in 0..ITERATION_BATCH {
            value ^= value << 13;
            value ^= value >> 7;
            value ^= value << 17;
            checksum += ((value >> 32) as f64).sqrt();
        }
        iterations += ITERATION_BATCH;
        if start.elapsed() >= target {
            break;
        }
    }

    let duration_ns = duration_as_ns(start.elapsed());
    BenchmarkResult {
        iterations: iterations,
        duration_ns: duration_ns,
        score_ns_per_iteration: duration_ns as f64 / iterations as f64,
        checksum: checksum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_runs_at_least_target_interval() {
        let target = Duration::from_millis(20);
        let result = run_benchmark(42, target);

        assert!(result.duration_ns >= duration_as_ns(target));
        assert!(result.iterations >= ITERATION_BATCH);
        assert!(result.score_ns_per_iteration > 0.0);
    }

    #[test]
    fn test_benchmark_is_deterministic_in_iterations() {
        // Different seeds must not change the amount of work per iteration;
        // scores from two runs on the same machine should be within an
        // order of magnitude of each other.
        let a = run_benchmark(1, Duration::from_millis(10));
        let b = run_benchmark(999, Duration::from_millis(10));
        let ratio = a.score_ns_per_iteration / b.score_ns_per_iteration;
        assert!(ratio > 0.1 && ratio < 10.0);
    }
}
