use std::collections::VecDeque;
use std::time::Instant;

use conductor_proto::{JobInstance, JobType, TaskInstanceId};
use master::worker_list::WorkerList;

struct TypeQueue {
    job_type: JobType,
    jobs: VecDeque<JobInstance>,
}

/// Result of one selection pass over the queue.
pub enum QueueSelection {
    /// A job and an eligible worker were found.
    Dispatch {
        job: JobInstance,
        worker_id: String,
    },
    /// Work exists but no subscribed worker can currently take any of it.
    /// The caller should back off and retry, not go idle.
    NoEligibleWorker,
    /// The queue is empty.
    NoWork,
}

/// The master's work queue: one FIFO per job type, kept in descending
/// priority order so a selection pass always offers higher-priority work
/// first regardless of submission order.
pub struct MasterQueue {
    queues: Vec<TypeQueue>,
}

impl MasterQueue {
    pub fn new() -> Self {
        MasterQueue { queues: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.jobs.is_empty())
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|queue| queue.jobs.len()).sum()
    }

    fn queue_index(&self, job_type: &JobType) -> Option<usize> {
        self.queues
            .iter()
            .position(|queue| queue.job_type == *job_type)
    }

    /// Finds the sub-queue for a type, creating it at its priority rank if
    /// this is the first job of the type. Equal priorities keep creation
    /// order, so ties stay stable.
    fn queue_for(&mut self, job_type: &JobType) -> (usize, bool) {
        if let Some(index) = self.queue_index(job_type) {
            return (index, false);
        }

        let rank = self.queues
            .iter()
            .position(|queue| queue.job_type.priority < job_type.priority)
            .unwrap_or_else(|| self.queues.len());
        self.queues.insert(
            rank,
            TypeQueue {
                job_type: job_type.clone(),
                jobs: VecDeque::new(),
            },
        );
        (rank, true)
    }

    /// Appends a job to its type's FIFO. Returns true iff a queue for a new
    /// type was created, which callers use to trigger capability gossip.
    pub fn submit(&mut self, job: JobInstance) -> bool {
        let (index, created) = self.queue_for(&job.job_type);
        self.queues[index].jobs.push_back(job);
        created
    }

    /// Puts a recovered job back at the front of its type's FIFO, ahead of
    /// everything submitted since it was first dispatched.
    pub fn requeue_front(&mut self, job: JobInstance) {
        let (index, _) = self.queue_for(&job.job_type);
        self.queues[index].jobs.push_front(job);
    }

    /// Scans sub-queues highest-priority first and returns the first
    /// (job, worker) pairing the worker list can serve. Distinguishes a
    /// truly empty queue from work that nobody can currently take.
    pub fn select_job(&mut self, workers: &WorkerList, now: Instant) -> QueueSelection {
        let mut had_work = false;

        for index in 0..self.queues.len() {
            if self.queues[index].jobs.is_empty() {
                continue;
            }
            had_work = true;

            if let Some(worker_id) = workers.select_best_worker(&self.queues[index].job_type, now)
            {
                let job = self.queues[index].jobs.pop_front().unwrap();
                return QueueSelection::Dispatch {
                    job: job,
                    worker_id: worker_id,
                };
            }
        }

        if had_work {
            QueueSelection::NoEligibleWorker
        } else {
            QueueSelection::NoWork
        }
    }

    /// Job types that currently have work waiting, highest priority first.
    pub fn waiting_types(&self) -> Vec<JobType> {
        self.queues
            .iter()
            .filter(|queue| !queue.jobs.is_empty())
            .map(|queue| queue.job_type.clone())
            .collect()
    }

    /// Removes every queued job belonging to the given task instance and
    /// returns how many were dropped.
    pub fn remove_instance(&mut self, instance: &TaskInstanceId) -> usize {
        let mut removed = 0;
        for queue in &mut self.queues {
            let before = queue.jobs.len();
            queue.jobs.retain(|job| job.task_instance != *instance);
            removed += before - queue.jobs.len();
        }
        removed
    }

    /// Drops all queued work, returning the abandoned jobs. Used when a
    /// stopping master has no workers left to drain through.
    pub fn drain_all(&mut self) -> Vec<JobInstance> {
        let mut abandoned = Vec::new();
        for queue in &mut self.queues {
            abandoned.extend(queue.jobs.drain(..));
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use master::worker_info::WorkerInfo;

    fn instance(serial: u64) -> TaskInstanceId {
        TaskInstanceId::new(serial, "master-1".to_owned())
    }

    fn job(serial: u64, job_type: &JobType) -> JobInstance {
        JobInstance::new(instance(serial), job_type.clone(), 0, json!(serial))
    }

    fn worker_for(types: &[JobType]) -> WorkerInfo {
        let mut worker = WorkerInfo::new(
            "worker-1".to_owned(),
            "node-1".to_owned(),
            1_000_000,
            50.0,
            2,
        );
        worker.register_job_types(types);
        worker
    }

    #[test]
    fn test_submit_reports_new_type_queue() {
        let mut queue = MasterQueue::new();
        let scale = JobType::new("scale", 1);

        assert!(queue.submit(job(1, &scale)));
        assert!(!queue.submit(job(2, &scale)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_empty_iff_all_subqueues_empty() {
        let mut queue = MasterQueue::new();
        assert!(queue.is_empty());

        let scale = JobType::new("scale", 1);
        queue.submit(job(1, &scale));
        assert!(!queue.is_empty());

        let workers = {
            let mut list = WorkerList::new();
            list.subscribe_worker(worker_for(&[scale.clone()])).unwrap();
            list
        };
        match queue.select_job(&workers, Instant::now()) {
            QueueSelection::Dispatch { .. } => {}
            _ => panic!("Expected a dispatch"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_higher_priority_offered_first() {
        let mut queue = MasterQueue::new();
        let low = JobType::new("cleanup", 1);
        let high = JobType::new("render", 9);

        // Submission order is low before high; selection order must not be.
        queue.submit(job(1, &low));
        queue.submit(job(2, &high));

        let mut list = WorkerList::new();
        list.subscribe_worker(worker_for(&[low.clone(), high.clone()]))
            .unwrap();

        match queue.select_job(&list, Instant::now()) {
            QueueSelection::Dispatch { job, .. } => assert_eq!(job.job_type, high),
            _ => panic!("Expected a dispatch"),
        }
    }

    #[test]
    fn test_lower_priority_dispatched_when_higher_has_no_worker() {
        let mut queue = MasterQueue::new();
        let low = JobType::new("cleanup", 1);
        let high = JobType::new("render", 9);
        queue.submit(job(1, &high));
        queue.submit(job(2, &low));

        // The only worker supports just the low-priority type.
        let mut list = WorkerList::new();
        list.subscribe_worker(worker_for(&[low.clone()])).unwrap();

        match queue.select_job(&list, Instant::now()) {
            QueueSelection::Dispatch { job, .. } => assert_eq!(job.job_type, low),
            _ => panic!("Expected a dispatch"),
        }
    }

    #[test]
    fn test_work_without_workers_is_not_no_work() {
        let mut queue = MasterQueue::new();
        queue.submit(job(1, &JobType::new("scale", 1)));

        let list = WorkerList::new();
        match queue.select_job(&list, Instant::now()) {
            QueueSelection::NoEligibleWorker => {}
            _ => panic!("Expected NoEligibleWorker"),
        }
    }

    #[test]
    fn test_requeue_front_overtakes_submissions() {
        let mut queue = MasterQueue::new();
        let scale = JobType::new("scale", 1);
        queue.submit(job(1, &scale));
        queue.requeue_front(job(2, &scale));

        let mut list = WorkerList::new();
        list.subscribe_worker(worker_for(&[scale.clone()])).unwrap();

        match queue.select_job(&list, Instant::now()) {
            QueueSelection::Dispatch { job, .. } => assert_eq!(job.task_instance, instance(2)),
            _ => panic!("Expected a dispatch"),
        }
    }

    #[test]
    fn test_remove_instance_drops_only_matching_jobs() {
        let mut queue = MasterQueue::new();
        let scale = JobType::new("scale", 1);
        queue.submit(job(1, &scale));
        queue.submit(job(2, &scale));
        queue.submit(job(1, &JobType::new("sharpen", 3)));

        assert_eq!(queue.remove_instance(&instance(1)), 2);
        assert_eq!(queue.len(), 1);
    }
}
