use rand::{thread_rng, Rng};

/// Number of samples the estimate window retains.
const SAMPLE_WINDOW: usize = 30;

/// Reported while the window holds no samples at all. One hour: pessimistic
/// enough that an unprimed pairing never looks attractive next to any
/// pairing with real history.
pub const PESSIMISTIC_ESTIMATE_NS: u64 = 3_600_000_000_000;

/// A sliding-window duration estimator.
///
/// Keeps the most recent `SAMPLE_WINDOW` samples in a circular buffer and
/// tracks the indices of the current minimum and maximum. `estimate()`
/// reports a uniformly random value between the tracked minimum and maximum
/// rather than a point estimate, so repeated queries spread load instead of
/// herding every dispatch onto whichever worker currently looks fastest.
pub struct TimeEstimate {
    samples: [u64; SAMPLE_WINDOW],
    /// Number of live samples; the window is full once this reaches
    /// `SAMPLE_WINDOW`.
    filled: usize,
    next_index: usize,
    min_index: usize,
    max_index: usize,
}

impl TimeEstimate {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_primed(&self) -> bool {
        self.filled > 0
    }

    pub fn sample_count(&self) -> usize {
        self.filled
    }

    /// Adds a duration sample, overwriting the oldest slot once the window
    /// is full. Amortized O(1): only overwriting the slot that holds the
    /// current minimum or maximum forces a rescan of the window.
    pub fn add_sample(&mut self, duration_ns: u64) {
        let index = self.next_index;
        self.samples[index] = duration_ns;
        self.next_index = (self.next_index + 1) % SAMPLE_WINDOW;

        if self.filled == 0 {
            self.filled = 1;
            self.min_index = index;
            self.max_index = index;
            return;
        }

        let overwrote_extreme =
            self.filled == SAMPLE_WINDOW && (index == self.min_index || index == self.max_index);
        if self.filled < SAMPLE_WINDOW {
            self.filled += 1;
        }

        if overwrote_extreme {
            self.rescan();
        } else {
            if self.samples[index] < self.samples[self.min_index] {
                self.min_index = index;
            }
            if self.samples[index] > self.samples[self.max_index] {
                self.max_index = index;
            }
        }
    }

    fn rescan(&mut self) {
        let mut min_index = 0;
        let mut max_index = 0;
        for i in 1..self.filled {
            if self.samples[i] < self.samples[min_index] {
                min_index = i;
            }
            if self.samples[i] > self.samples[max_index] {
                max_index = i;
            }
        }
        self.min_index = min_index;
        self.max_index = max_index;
    }

    pub fn min_ns(&self) -> u64 {
        if self.filled == 0 {
            return PESSIMISTIC_ESTIMATE_NS;
        }
        self.samples[self.min_index]
    }

    pub fn max_ns(&self) -> u64 {
        if self.filled == 0 {
            return PESSIMISTIC_ESTIMATE_NS;
        }
        self.samples[self.max_index]
    }

    /// A uniformly random value in [min, max] over the retained samples.
    /// Before the first sample arrives this reports
    /// `PESSIMISTIC_ESTIMATE_NS` so that unknown pairings lose every
    /// comparison against measured ones.
    pub fn estimate(&self) -> u64 {
        if self.filled == 0 {
            return PESSIMISTIC_ESTIMATE_NS;
        }
        let min = self.samples[self.min_index];
        let max = self.samples[self.max_index];
        if min == max {
            return min;
        }
        let span = (max - min) as f64;
        min + (thread_rng().next_f64() * span) as u64
    }
}

impl Default for TimeEstimate {
    fn default() -> Self {
        TimeEstimate {
            samples: [0; SAMPLE_WINDOW],
            filled: 0,
            next_index: 0,
            min_index: 0,
            max_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprimed_window_is_pessimistic() {
        let estimate = TimeEstimate::new();
        assert!(!estimate.is_primed());
        assert_eq!(estimate.estimate(), PESSIMISTIC_ESTIMATE_NS);
        assert_eq!(estimate.min_ns(), PESSIMISTIC_ESTIMATE_NS);
    }

    #[test]
    fn test_partial_window_uses_real_samples_only() {
        let mut estimate = TimeEstimate::new();
        estimate.add_sample(400);
        assert!(estimate.is_primed());
        assert_eq!(estimate.estimate(), 400);

        estimate.add_sample(600);
        for _ in 0..100 {
            let value = estimate.estimate();
            assert!(value >= 400 && value <= 600);
        }
    }

    #[test]
    fn test_estimate_within_window_bounds() {
        let mut estimate = TimeEstimate::new();
        for i in 0..SAMPLE_WINDOW {
            estimate.add_sample(1_000 + i as u64 * 10);
        }
        let min = 1_000;
        let max = 1_000 + (SAMPLE_WINDOW as u64 - 1) * 10;
        for _ in 0..200 {
            let value = estimate.estimate();
            assert!(value >= min && value <= max);
        }
    }

    #[test]
    fn test_overwriting_min_slot_rescans() {
        let mut estimate = TimeEstimate::new();
        // Slot 0 holds the minimum once the window is full.
        estimate.add_sample(1);
        for _ in 1..SAMPLE_WINDOW {
            estimate.add_sample(500);
        }
        assert_eq!(estimate.min_ns(), 1);

        // The next sample lands in slot 0 and evicts the minimum.
        estimate.add_sample(700);
        assert_eq!(estimate.min_ns(), 500);
        assert_eq!(estimate.max_ns(), 700);
    }

    #[test]
    fn test_overwriting_max_slot_rescans() {
        let mut estimate = TimeEstimate::new();
        estimate.add_sample(9_000);
        for _ in 1..SAMPLE_WINDOW {
            estimate.add_sample(100);
        }
        assert_eq!(estimate.max_ns(), 9_000);

        estimate.add_sample(50);
        assert_eq!(estimate.max_ns(), 100);
        assert_eq!(estimate.min_ns(), 50);
    }

    #[test]
    fn test_repeated_extreme_replacement_small_window() {
        // Exhaustive replay over several window generations: the tracked
        // extremes must always agree with a naive scan.
        let mut estimate = TimeEstimate::new();
        let mut history: Vec<u64> = Vec::new();
        let values = [5u64, 3, 9, 3, 7, 1, 8, 2, 6, 4];

        for round in 0..(SAMPLE_WINDOW * 4) {
            let value = values[round % values.len()] * 100;
            estimate.add_sample(value);
            history.push(value);

            let window: Vec<u64> = if history.len() <= SAMPLE_WINDOW {
                history.clone()
            } else {
                history[history.len() - SAMPLE_WINDOW..].to_vec()
            };
            let expected_min = *window.iter().min().unwrap();
            let expected_max = *window.iter().max().unwrap();
            assert_eq!(estimate.min_ns(), expected_min);
            assert_eq!(estimate.max_ns(), expected_max);
        }
    }
}
