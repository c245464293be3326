use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::prelude::*;

use conductor_proto::{Address, JobType};
use time_estimate::TimeEstimate;
use util::time::{duration_as_ns, format_ns, ns_as_duration};

/// Admission-control state for one (worker, job type) pairing.
///
/// The allowance is a slow-start-style window: it only widens after the
/// worker has proven it fills the current window (saturation sets
/// `may_increase_allowance`), and it narrows under master-wide congestion
/// pressure, never below one.
pub struct WorkerJobInfo {
    round_trip: TimeEstimate,
    outstanding: u32,
    maximal_allowance: u32,
    maximal_ever_allowance: u32,
    may_increase_allowance: bool,
    remaining_task_time_ns: u64,
    executed_count: u64,
}

impl WorkerJobInfo {
    pub fn new() -> Self {
        WorkerJobInfo {
            round_trip: TimeEstimate::new(),
            outstanding: 0,
            maximal_allowance: 1,
            maximal_ever_allowance: 1,
            may_increase_allowance: false,
            remaining_task_time_ns: 0,
            executed_count: 0,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.outstanding < self.maximal_allowance
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn maximal_allowance(&self) -> u32 {
        self.maximal_allowance
    }

    pub fn executed_count(&self) -> u64 {
        self.executed_count
    }

    pub fn round_trip_estimate_ns(&self) -> u64 {
        self.round_trip.estimate()
    }

    /// Whether the round-trip window holds at least one real sample.
    pub fn is_primed(&self) -> bool {
        self.round_trip.is_primed()
    }

    pub fn remaining_task_time_ns(&self) -> u64 {
        self.remaining_task_time_ns
    }

    /// Registers a new outstanding job. Reaching the allowance marks the
    /// pairing as saturated: the window was fully used, so a probe for more
    /// parallelism is now worth considering.
    pub fn increment_outstanding(&mut self) {
        self.outstanding += 1;
        if self.outstanding == self.maximal_allowance {
            self.may_increase_allowance = true;
        }
    }

    pub fn register_completion(&mut self, round_trip_ns: u64, task_completion_estimate_ns: u64) {
        self.round_trip.add_sample(round_trip_ns);
        self.remaining_task_time_ns = task_completion_estimate_ns;
        self.outstanding = self.outstanding.saturating_sub(1);
        self.executed_count += 1;
    }

    /// Reverses an `increment_outstanding` whose dispatch never reached the
    /// worker.
    pub fn abort_dispatch(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Widens the allowance, but only if saturation was observed since the
    /// last change. Returns whether anything changed.
    pub fn increment_allowance(&mut self) -> bool {
        if !self.may_increase_allowance {
            return false;
        }
        self.maximal_allowance += 1;
        if self.maximal_ever_allowance < self.maximal_allowance {
            self.maximal_ever_allowance = self.maximal_allowance;
        }
        self.may_increase_allowance = false;
        true
    }

    /// Narrows the allowance, with a floor of one and never below the
    /// currently outstanding count. A fresh saturation must be observed
    /// before the next probe.
    pub fn decrement_allowance(&mut self) -> bool {
        if self.maximal_allowance <= 1 || self.maximal_allowance <= self.outstanding {
            return false;
        }
        self.maximal_allowance -= 1;
        self.may_increase_allowance = false;
        true
    }

    pub fn statistics_string(&self) -> String {
        format!(
            "executed {} jobs; maximal ever allowance {}; round trip {}..{}",
            self.executed_count,
            self.maximal_ever_allowance,
            format_ns(self.round_trip.min_ns()),
            format_ns(self.round_trip.max_ns())
        )
    }
}

/// Aggregate master-side state for one subscribed worker: its identity and
/// benchmark, completion-time prediction inputs, and the per-type admission
/// windows.
pub struct WorkerInfo {
    worker_id: String,
    address: Address,
    benchmark_score_ns: f64,
    thread_count: u32,
    subscribed_at: DateTime<Utc>,

    // Both maintained as 2-sample moving averages.
    round_trip_time_ns: u64,
    compute_time_ns: u64,

    /// Start times of the most recent dispatches, capped at the worker's
    /// thread count. Approximates which jobs overlap on the worker's pool.
    recent_starts: VecDeque<Instant>,
    active_jobs: u32,

    job_info: HashMap<JobType, WorkerJobInfo>,
}

impl WorkerInfo {
    pub fn new(
        worker_id: String,
        address: Address,
        ping_round_trip_ns: u64,
        benchmark_score_ns: f64,
        thread_count: u32,
    ) -> Self {
        WorkerInfo {
            worker_id: worker_id,
            address: address,
            benchmark_score_ns: benchmark_score_ns,
            thread_count: if thread_count == 0 { 1 } else { thread_count },
            subscribed_at: Utc::now(),

            round_trip_time_ns: ping_round_trip_ns,
            compute_time_ns: 0,

            recent_starts: VecDeque::new(),
            active_jobs: 0,

            job_info: HashMap::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }

    pub fn subscribed_at(&self) -> DateTime<Utc> {
        self.subscribed_at
    }

    pub fn is_idle(&self) -> bool {
        self.active_jobs == 0
    }

    pub fn active_jobs(&self) -> u32 {
        self.active_jobs
    }

    /// Records that the worker advertised support for the given types.
    /// Existing history for a type is never reset by a re-advertisement.
    pub fn register_job_types(&mut self, types: &[JobType]) {
        for job_type in types {
            self.job_info
                .entry(job_type.clone())
                .or_insert_with(WorkerJobInfo::new);
        }
    }

    pub fn supports(&self, job_type: &JobType) -> bool {
        self.job_info.contains_key(job_type)
    }

    pub fn job_info(&self, job_type: &JobType) -> Option<&WorkerJobInfo> {
        self.job_info.get(job_type)
    }

    pub fn job_info_mut(&mut self, job_type: &JobType) -> Option<&mut WorkerJobInfo> {
        self.job_info.get_mut(job_type)
    }

    /// Narrows every per-type allowance by one. Master-wide congestion
    /// relief invoked when the queue runs empty, so inflated windows do not
    /// linger into the next burst of work.
    pub fn reduce_allowances(&mut self) {
        for job_info in self.job_info.values_mut() {
            job_info.decrement_allowance();
        }
    }

    pub fn statistics_strings(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (job_type, job_info) in &self.job_info {
            lines.push(format!(
                "worker {} type {}: {}",
                self.worker_id,
                job_type.name,
                job_info.statistics_string()
            ));
        }
        lines
    }

    pub fn register_job_start(&mut self, now: Instant) {
        self.active_jobs += 1;
        self.recent_starts.push_back(now);
        while self.recent_starts.len() > self.thread_count as usize {
            self.recent_starts.pop_front();
        }
    }

    pub fn register_job_completion(&mut self, round_trip_ns: u64, reported_compute_ns: u64) {
        self.round_trip_time_ns = (self.round_trip_time_ns + round_trip_ns) / 2;
        self.compute_time_ns = (self.compute_time_ns + reported_compute_ns) / 2;
        self.active_jobs = self.active_jobs.saturating_sub(1);
        self.recent_starts.pop_front();
    }

    /// Reverses a `register_job_start` whose dispatch never reached the
    /// worker.
    pub fn abort_dispatch(&mut self) {
        self.active_jobs = self.active_jobs.saturating_sub(1);
        self.recent_starts.pop_back();
    }

    fn overhead_ns(&self) -> u64 {
        self.round_trip_time_ns.saturating_sub(self.compute_time_ns)
    }

    /// The moment the worker is predicted to have a thread free again, as an
    /// absolute instant. Jobs queued at the worker but not yet started are
    /// deliberately ignored; the recent-start window is the whole model.
    fn worker_ready_time(&self, now: Instant) -> Instant {
        let overhead = self.overhead_ns();
        match self.recent_starts.front() {
            Some(&oldest_start) => {
                oldest_start
                    + ns_as_duration(self.round_trip_time_ns.saturating_sub(overhead / 2))
            }
            None => now,
        }
    }

    /// Predicts, in nanoseconds from `now`, when a job dispatched now would
    /// complete on this worker: the job starts when it arrives or when the
    /// worker frees up, whichever is later, then computes, then the result
    /// travels back.
    pub fn estimate_completion_time_ns(&self, now: Instant) -> u64 {
        let overhead = self.overhead_ns();
        let worker_ready = self.worker_ready_time(now);
        let arrival = now + ns_as_duration(overhead / 2);

        let start = if worker_ready > arrival {
            worker_ready
        } else {
            arrival
        };
        let completion = start + ns_as_duration(self.compute_time_ns + overhead / 2);
        duration_as_ns(completion.duration_since(now))
    }

    /// How long the worker is predicted to stay busy; bounds the scheduling
    /// loop's idle sleep.
    pub fn estimate_busy_interval(&self, now: Instant) -> Duration {
        let worker_ready = self.worker_ready_time(now);
        if worker_ready > now {
            worker_ready.duration_since(now)
        } else {
            Duration::new(0, 0)
        }
    }

    /// Measured compute cost normalized against the worker's synthetic
    /// benchmark, comparable across heterogeneous workers and job types.
    pub fn calculate_multiplier(&self) -> f64 {
        if self.benchmark_score_ns <= 0.0 {
            return self.compute_time_ns as f64;
        }
        self.compute_time_ns as f64 / self.benchmark_score_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> WorkerInfo {
        WorkerInfo::new(
            "worker-1".to_owned(),
            "node-1".to_owned(),
            1_000_000,
            50.0,
            2,
        )
    }

    #[test]
    fn test_allowance_starts_at_one() {
        let wji = WorkerJobInfo::new();
        assert_eq!(wji.maximal_allowance(), 1);
        assert!(wji.has_free_slot());
    }

    #[test]
    fn test_increment_allowance_requires_saturation() {
        let mut wji = WorkerJobInfo::new();
        assert!(!wji.increment_allowance());

        wji.increment_outstanding();
        assert!(!wji.has_free_slot());
        assert!(wji.increment_allowance());
        assert_eq!(wji.maximal_allowance(), 2);

        // The probe consumed the saturation observation.
        assert!(!wji.increment_allowance());
    }

    #[test]
    fn test_saturate_then_increment_cycles() {
        let mut wji = WorkerJobInfo::new();
        for round in 0..5 {
            while wji.has_free_slot() {
                wji.increment_outstanding();
            }
            assert!(wji.increment_allowance());
            assert_eq!(wji.maximal_allowance(), 2 + round);
        }
        assert_eq!(wji.maximal_allowance(), 6);
    }

    #[test]
    fn test_decrement_allowance_floor_is_one() {
        let mut wji = WorkerJobInfo::new();
        wji.increment_outstanding();
        assert!(wji.increment_allowance());
        assert_eq!(wji.maximal_allowance(), 2);

        assert!(wji.decrement_allowance());
        assert_eq!(wji.maximal_allowance(), 1);
        assert!(!wji.decrement_allowance());
        assert_eq!(wji.maximal_allowance(), 1);
    }

    #[test]
    fn test_decrement_clears_saturation_flag() {
        let mut wji = WorkerJobInfo::new();
        wji.increment_outstanding();
        assert!(wji.increment_allowance());
        wji.increment_outstanding();
        wji.register_completion(1_000, 0);

        // Saturation was observed at the new allowance, but the decrement
        // demands a fresh observation before the next probe.
        assert!(wji.decrement_allowance());
        assert!(!wji.increment_allowance());
    }

    #[test]
    fn test_decrement_never_undercuts_outstanding() {
        let mut wji = WorkerJobInfo::new();
        wji.increment_outstanding();
        assert!(wji.increment_allowance());
        wji.increment_outstanding();

        // Both slots are in use; the window must not narrow under them.
        assert!(!wji.decrement_allowance());
        assert_eq!(wji.maximal_allowance(), 2);
    }

    #[test]
    fn test_completion_updates_window_and_outstanding() {
        let mut wji = WorkerJobInfo::new();
        wji.increment_outstanding();
        wji.register_completion(5_000, 12_000);

        assert_eq!(wji.outstanding(), 0);
        assert_eq!(wji.executed_count(), 1);
        assert_eq!(wji.remaining_task_time_ns(), 12_000);
        assert_eq!(wji.round_trip_estimate_ns(), 5_000);
    }

    #[test]
    fn test_register_job_types_is_idempotent() {
        let mut worker = info();
        let scale = JobType::new("scale", 1);
        worker.register_job_types(&[scale.clone()]);
        worker
            .job_info_mut(&scale)
            .unwrap()
            .register_completion(1_000, 0);

        worker.register_job_types(&[scale.clone()]);
        assert_eq!(worker.job_info(&scale).unwrap().executed_count(), 1);
    }

    #[test]
    fn test_recent_starts_capped_at_thread_count() {
        let mut worker = info();
        let now = Instant::now();
        worker.register_job_start(now);
        worker.register_job_start(now);
        worker.register_job_start(now);
        assert_eq!(worker.recent_starts.len(), 2);
        assert_eq!(worker.active_jobs(), 3);
    }

    #[test]
    fn test_completion_time_prefers_measured_worker() {
        let now = Instant::now();
        let mut fast = info();
        let mut slow = info();

        // Two completions each to settle the moving averages.
        fast.register_job_completion(2_000_000, 1_000_000);
        fast.register_job_completion(2_000_000, 1_000_000);
        slow.register_job_completion(40_000_000, 30_000_000);
        slow.register_job_completion(40_000_000, 30_000_000);

        assert!(fast.estimate_completion_time_ns(now) < slow.estimate_completion_time_ns(now));
    }

    #[test]
    fn test_busy_interval_zero_when_idle() {
        let worker = info();
        assert_eq!(
            worker.estimate_busy_interval(Instant::now()),
            Duration::new(0, 0)
        );
    }

    #[test]
    fn test_busy_interval_positive_with_recent_start() {
        let mut worker = info();
        worker.register_job_completion(10_000_000, 4_000_000);
        worker.register_job_start(Instant::now());
        assert!(worker.estimate_busy_interval(Instant::now()) > Duration::new(0, 0));
    }

    #[test]
    fn test_multiplier_normalizes_by_benchmark() {
        let mut worker = info();
        worker.register_job_completion(1_000, 500);
        // compute average is (0 + 500) / 2 = 250ns against a 50ns/iteration
        // benchmark.
        assert!((worker.calculate_multiplier() - 5.0).abs() < 1e-9);
    }
}
