use std::collections::HashMap;
use std::time::{Duration, Instant};

use conductor_proto::{Address, JobType};
use errors::*;
use master::worker_info::WorkerInfo;

/// The master's registry of subscribed workers, indexed by assigned worker
/// id with a secondary index by transport address. A worker is subscribed at
/// most once.
pub struct WorkerList {
    workers: HashMap<String, WorkerInfo>,
    address_index: HashMap<Address, String>,
}

impl WorkerList {
    pub fn new() -> Self {
        WorkerList {
            workers: HashMap::new(),
            address_index: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.address_index.contains_key(address)
    }

    pub fn worker_id_for_address(&self, address: &Address) -> Option<String> {
        self.address_index.get(address).cloned()
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerInfo> {
        self.workers.get(worker_id)
    }

    pub fn get_mut(&mut self, worker_id: &str) -> Option<&mut WorkerInfo> {
        self.workers.get_mut(worker_id)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.address_index.keys().cloned().collect()
    }

    /// Registers a worker after a completed ping/benchmark handshake.
    pub fn subscribe_worker(&mut self, worker: WorkerInfo) -> Result<()> {
        if self.workers.contains_key(worker.worker_id()) {
            bail!(format!(
                "Worker with ID {} is already subscribed",
                worker.worker_id()
            ));
        }
        if self.address_index.contains_key(worker.address()) {
            bail!(format!(
                "A worker at {} is already subscribed",
                worker.address()
            ));
        }

        self.address_index
            .insert(worker.address().clone(), worker.worker_id().to_owned());
        self.workers.insert(worker.worker_id().to_owned(), worker);
        Ok(())
    }

    /// Removes a worker and returns its info; the caller is responsible for
    /// requeuing the worker's active jobs. All accumulated history leaves
    /// with the info, so a rejoining worker starts fresh.
    pub fn unsubscribe_worker(&mut self, worker_id: &str) -> Option<WorkerInfo> {
        let worker = self.workers.remove(worker_id);
        if let Some(ref worker) = worker {
            self.address_index.remove(worker.address());
        }
        worker
    }

    pub fn unsubscribe_by_address(&mut self, address: &Address) -> Option<WorkerInfo> {
        let worker_id = self.address_index.get(address).cloned();
        match worker_id {
            Some(worker_id) => self.unsubscribe_worker(&worker_id),
            None => None,
        }
    }

    /// Among workers that advertised the type and have a free admission
    /// slot, picks the one with the earliest predicted completion time.
    pub fn select_best_worker(&self, job_type: &JobType, now: Instant) -> Option<String> {
        let mut best: Option<&WorkerInfo> = None;
        let mut best_estimate = 0;

        for worker in self.workers.values() {
            let eligible = match worker.job_info(job_type) {
                Some(job_info) => job_info.has_free_slot(),
                None => false,
            };
            if !eligible {
                continue;
            }

            let estimate = worker.estimate_completion_time_ns(now);
            if best.is_none() || estimate < best_estimate {
                best_estimate = estimate;
                best = Some(worker);
            }
        }

        best.map(|worker| worker.worker_id().to_owned())
    }

    /// Books a dispatch into the worker's statistics.
    pub fn register_dispatch(
        &mut self,
        worker_id: &str,
        job_type: &JobType,
        now: Instant,
    ) -> Result<()> {
        let worker = self.workers
            .get_mut(worker_id)
            .chain_err(|| format!("Worker with ID {} not found", worker_id))?;
        worker.register_job_start(now);
        worker
            .job_info_mut(job_type)
            .chain_err(|| {
                format!("Worker {} has no info for type {}", worker_id, job_type.name)
            })?
            .increment_outstanding();
        Ok(())
    }

    /// Reverses a booked dispatch that never reached the worker.
    pub fn abort_dispatch(&mut self, worker_id: &str, job_type: &JobType) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.abort_dispatch();
            if let Some(job_info) = worker.job_info_mut(job_type) {
                job_info.abort_dispatch();
            }
        }
    }

    pub fn register_completion(
        &mut self,
        worker_id: &str,
        job_type: &JobType,
        round_trip_ns: u64,
        compute_ns: u64,
        task_completion_estimate_ns: u64,
    ) -> Result<()> {
        let worker = self.workers
            .get_mut(worker_id)
            .chain_err(|| format!("Worker with ID {} not found", worker_id))?;
        worker.register_job_completion(round_trip_ns, compute_ns);
        worker
            .job_info_mut(job_type)
            .chain_err(|| {
                format!("Worker {} has no info for type {}", worker_id, job_type.name)
            })?
            .register_completion(round_trip_ns, task_completion_estimate_ns);
        Ok(())
    }

    /// Registers the job types a worker advertised. Returns false if the
    /// address is not a subscribed worker.
    pub fn register_worker_job_types(&mut self, address: &Address, types: &[JobType]) -> bool {
        let worker_id = match self.address_index.get(address) {
            Some(worker_id) => worker_id.clone(),
            None => return false,
        };
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.register_job_types(types);
        }
        true
    }

    /// Probes for more parallelism on one worker: widens its allowance for
    /// the type if a saturation observation is available to spend. Invoked
    /// when a type has work queued but could not be placed.
    pub fn increment_allowance(&mut self, worker_id: &str, job_type: &JobType) -> bool {
        let widened = self.workers
            .get_mut(worker_id)
            .and_then(|worker| worker.job_info_mut(job_type))
            .map(|job_info| job_info.increment_allowance())
            .unwrap_or(false);
        if widened {
            debug!(
                "Widened allowance for type {} on worker {}",
                job_type.name, worker_id
            );
        }
        widened
    }

    /// Master-wide congestion relief: narrow every allowance by one.
    pub fn reduce_allowances(&mut self) {
        for worker in self.workers.values_mut() {
            worker.reduce_allowances();
        }
    }

    /// The soonest moment any busy worker is predicted to free up; bounds
    /// the scheduling loop's idle sleep. `None` when every worker is idle.
    pub fn min_busy_interval(&self, now: Instant) -> Option<Duration> {
        self.workers
            .values()
            .filter(|worker| !worker.is_idle())
            .map(|worker| worker.estimate_busy_interval(now))
            .min()
    }

    pub fn all_idle(&self) -> bool {
        self.workers.values().all(|worker| worker.is_idle())
    }

    pub fn statistics_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for worker in self.workers.values() {
            lines.extend(worker.statistics_strings());
        }
        lines
    }
}
