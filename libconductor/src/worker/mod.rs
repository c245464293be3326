pub mod benchmark;

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use conductor_proto::message::{AddNeighbors, JobCompleted, KillJob, MasterStopped, NoJob, Ping,
                               RegisterWorker, RunJob, WorkRequest, WorkerAccept, WorkerResign};
use conductor_proto::message::PingReply;
use conductor_proto::{Address, JobOutcome, JobType, Message};
use errors::*;
use runner::{JobContext, JobRunner};
use transport::Transport;
use util::output_error;
use util::time::duration_as_ns;
use worker::benchmark::run_benchmark;

/// How long an idle work thread waits before soliciting work again.
const WORK_POLL_MS: u64 = 500;

/// One master this worker is registered with. The id is assigned by the
/// master during the handshake and used in all status traffic back to it.
struct MasterRegistration {
    worker_id: Option<String>,
}

struct QueuedJob {
    source: Address,
    run: RunJob,
    enqueued_at: Instant,
    cancelled: Arc<AtomicBool>,
}

/// Entries of the internal ready queue. A `Shutdown` item is the poison
/// pill that terminates one work thread cleanly.
enum WorkItem {
    Run(Box<QueuedJob>),
    Shutdown,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkerStatistics {
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub work_time_ns: u64,
    pub queue_time_ns: u64,
    pub idle_time_ns: u64,
}

struct WorkerState {
    masters: HashMap<Address, MasterRegistration>,
    items: VecDeque<WorkItem>,
    runners: HashMap<String, Arc<JobRunner>>,
    supported_types: Vec<JobType>,
    /// Cancellation flags of jobs currently executing, so a kill can reach
    /// a job that already left the queue.
    running: HashMap<(Address, u64), Arc<AtomicBool>>,
    queue_empty_since: Option<Instant>,
    stopped: bool,
    stats: WorkerStatistics,
}

/// The execution half of a node: a registry of job runners, registrations
/// with one or more masters, and a small pool of work threads pulling from
/// one internal ready queue.
pub struct Worker {
    transport: Arc<Transport>,
    address: Address,
    thread_count: u32,
    state: Mutex<WorkerState>,
    work_available: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(transport: Arc<Transport>, thread_count: u32) -> Arc<Self> {
        let address = transport.local_address();
        Arc::new(Worker {
            transport: transport,
            address: address,
            thread_count: if thread_count == 0 { 1 } else { thread_count },
            state: Mutex::new(WorkerState {
                masters: HashMap::new(),
                items: VecDeque::new(),
                runners: HashMap::new(),
                supported_types: Vec::new(),
                running: HashMap::new(),
                queue_empty_since: Some(Instant::now()),
                stopped: false,
                stats: Default::default(),
            }),
            work_available: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }

    /// Registers a job body for a type, making the type part of this
    /// worker's advertised capabilities. Every registered master is told
    /// about the updated capability set.
    pub fn register_runner(&self, job_type: JobType, runner: Arc<JobRunner>) {
        let adverts = {
            let mut state = self.state.lock().unwrap();
            state.runners.insert(job_type.name.clone(), runner);
            if !state.supported_types.contains(&job_type) {
                state.supported_types.push(job_type);
            }
            self.work_requests(&state)
        };
        self.send_all(adverts);
    }

    pub fn supported_types(&self) -> Vec<JobType> {
        self.state.lock().unwrap().supported_types.clone()
    }

    /// Starts the handshake with a master candidate, unless it is already
    /// known.
    pub fn add_master(&self, address: &Address) {
        let register = {
            let mut state = self.state.lock().unwrap();
            if state.stopped || state.masters.contains_key(address) {
                None
            } else {
                state.masters.insert(
                    address.clone(),
                    MasterRegistration { worker_id: None },
                );
                Some((
                    address.clone(),
                    Message::RegisterWorker(RegisterWorker {
                        worker_address: self.address.clone(),
                    }),
                ))
            }
        };
        self.send_all(register);
    }

    /// Membership detected the departure of a master's node: forget the
    /// registration and drop any of its queued work.
    pub fn handle_master_departed(&self, address: &Address) {
        let mut state = self.state.lock().unwrap();
        if state.masters.remove(address).is_none() {
            return;
        }
        state.items.retain(|item| match *item {
            WorkItem::Run(ref job) => job.source != *address,
            WorkItem::Shutdown => true,
        });
        debug!("Dropped departed master {}", address);
    }

    pub fn handle_worker_accept(&self, source: &Address, accept: WorkerAccept) {
        let advert = {
            let mut state = self.state.lock().unwrap();
            {
                let registration = state
                    .masters
                    .entry(accept.master_address.clone())
                    .or_insert(MasterRegistration { worker_id: None });
                registration.worker_id = Some(accept.worker_id.clone());
            }
            info!(
                "Registered with master {} as worker {}",
                source, accept.worker_id
            );
            Some((
                source.clone(),
                Message::WorkRequest(WorkRequest {
                    worker_address: self.address.clone(),
                    supported_types: state.supported_types.clone(),
                }),
            ))
        };
        self.send_all(advert);
    }

    /// Runs the synthetic benchmark for at least the requested interval and
    /// reports the measured score. Runs on the delivery thread; the probe
    /// interval is part of what the master is measuring.
    pub fn handle_ping(&self, source: &Address, ping: Ping) {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            // A ping can arrive from a master that found us through
            // membership before we registered with it.
            state
                .masters
                .entry(ping.master_address.clone())
                .or_insert(MasterRegistration { worker_id: None });
        }

        let result = run_benchmark(
            ping.benchmark_seed,
            Duration::from_millis(ping.target_duration_ms),
        );
        let reply = {
            let state = self.state.lock().unwrap();
            Message::PingReply(PingReply {
                worker_address: self.address.clone(),
                benchmark_score_ns: result.score_ns_per_iteration,
                benchmark_duration_ns: result.duration_ns,
                thread_count: self.thread_count,
                supported_types: state.supported_types.clone(),
            })
        };
        self.send_all(Some((source.clone(), reply)));
    }

    pub fn handle_run_job(&self, source: &Address, run: RunJob) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            warn!(
                "Ignoring dispatch {} after shutdown began",
                run.dispatch_id
            );
            return;
        }

        let now = Instant::now();
        if let Some(empty_since) = state.queue_empty_since.take() {
            state.stats.idle_time_ns += duration_as_ns(empty_since.elapsed());
        }

        state.items.push_back(WorkItem::Run(Box::new(QueuedJob {
            source: source.clone(),
            run: run,
            enqueued_at: now,
            cancelled: Arc::new(AtomicBool::new(false)),
        })));
        drop(state);
        self.work_available.notify_one();
    }

    pub fn handle_kill_job(&self, source: &Address, kill: KillJob) {
        let mut state = self.state.lock().unwrap();

        let before = state.items.len();
        state.items.retain(|item| match *item {
            WorkItem::Run(ref job) => {
                !(job.source == *source && job.run.dispatch_id == kill.dispatch_id)
            }
            WorkItem::Shutdown => true,
        });
        if state.items.len() != before {
            debug!("Dropped queued job {} on kill", kill.dispatch_id);
            return;
        }

        if let Some(flag) = state.running.get(&(source.clone(), kill.dispatch_id)) {
            flag.store(true, Ordering::SeqCst);
            debug!("Flagged running job {} as cancelled", kill.dispatch_id);
        }
    }

    pub fn handle_master_stopped(&self, source: &Address, stopped: MasterStopped) {
        let mut state = self.state.lock().unwrap();
        if state.masters.remove(&stopped.master_address).is_some() {
            info!("Master {} stopped; dropping registration", source);
        }
    }

    pub fn handle_no_job(&self, source: &Address, _: NoJob) {
        debug!("Master {} has no work for us", source);
    }

    /// Gossip of candidate peers: register with any we do not know yet.
    pub fn handle_add_neighbors(&self, _source: &Address, neighbors: AddNeighbors) {
        for peer in neighbors.peers {
            if peer != self.address {
                self.add_master(&peer);
            }
        }
    }

    /// Sends a resignation to every registered master, poisons the work
    /// threads, and joins them. Queued-but-unstarted jobs are dropped; the
    /// resignation makes every master requeue whatever it still has active
    /// here.
    pub fn stop(&self) {
        let resignations = {
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                Vec::new()
            } else {
                state.stopped = true;
                let mut resignations = Vec::new();
                for (address, registration) in &state.masters {
                    if let Some(ref worker_id) = registration.worker_id {
                        resignations.push((
                            address.clone(),
                            Message::WorkerResign(WorkerResign {
                                worker_id: worker_id.clone(),
                            }),
                        ));
                    }
                }
                for _ in 0..self.thread_count {
                    state.items.push_front(WorkItem::Shutdown);
                }
                resignations
            }
        };
        self.send_all(resignations);
        self.work_available.notify_all();

        let handles = {
            let mut threads = self.threads.lock().unwrap();
            threads.drain(..).collect::<Vec<_>>()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn statistics(&self) -> WorkerStatistics {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn log_statistics(&self) {
        let state = self.state.lock().unwrap();
        info!(
            "Worker {}: executed {} ({} failed), work {} queue {} idle {}",
            self.address,
            state.stats.jobs_executed,
            state.stats.jobs_failed,
            ::util::time::format_ns(state.stats.work_time_ns),
            ::util::time::format_ns(state.stats.queue_time_ns),
            ::util::time::format_ns(state.stats.idle_time_ns)
        );
    }

    fn send_all<I>(&self, messages: I)
    where
        I: IntoIterator<Item = (Address, Message)>,
    {
        for (address, message) in messages {
            if let Err(err) = self.transport.send(&address, message) {
                output_error(&err.chain_err(|| format!("Error sending to {}", address)));
            }
        }
    }

    /// Blocks until a work item is available. An idle thread solicits more
    /// work from every registered master once per empty-queue episode, and
    /// again after each poll interval, so a master with queued work it
    /// could not place learns that this worker has capacity to spare.
    fn next_work_item(&self) -> WorkItem {
        let mut asked = false;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                if state.items.is_empty() && state.queue_empty_since.is_none() {
                    state.queue_empty_since = Some(Instant::now());
                }
                return item;
            }

            if !asked && !state.stopped {
                let requests = self.work_requests(&state);
                asked = true;
                if !requests.is_empty() {
                    drop(state);
                    self.send_all(requests);
                    state = self.state.lock().unwrap();
                    continue;
                }
            }

            let (guard, timeout) = self.work_available
                .wait_timeout(state, Duration::from_millis(WORK_POLL_MS))
                .unwrap();
            state = guard;
            if timeout.timed_out() {
                asked = false;
            }
        }
    }

    fn work_requests(&self, state: &WorkerState) -> Vec<(Address, Message)> {
        let mut requests = Vec::new();
        for (address, registration) in &state.masters {
            if registration.worker_id.is_some() {
                requests.push((
                    address.clone(),
                    Message::WorkRequest(WorkRequest {
                        worker_address: self.address.clone(),
                        supported_types: state.supported_types.clone(),
                    }),
                ));
            }
        }
        requests
    }

    fn execute(&self, job: QueuedJob) {
        let run_start = Instant::now();
        let queue_time_ns = duration_as_ns(run_start.duration_since(job.enqueued_at));

        let runner = {
            let mut state = self.state.lock().unwrap();
            state.running.insert(
                (job.source.clone(), job.run.dispatch_id),
                Arc::clone(&job.cancelled),
            );
            state.runners.get(&job.run.job.job_type.name).cloned()
        };

        let context = JobContext::new(job.run.dispatch_id, Arc::clone(&job.cancelled));
        let outcome = match runner {
            None => JobOutcome::Failure(format!(
                "No runner registered for job type {}",
                job.run.job.job_type.name
            )),
            Some(runner) => {
                let input = job.run.job.input.clone();
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| runner.run(&context, input)));
                match result {
                    Ok(Ok(value)) => JobOutcome::Success(value),
                    Ok(Err(err)) => JobOutcome::Failure(failure_details(&err)),
                    Err(_) => JobOutcome::Failure("Job body panicked".to_owned()),
                }
            }
        };
        let compute_time_ns = duration_as_ns(run_start.elapsed());

        let report = {
            let mut state = self.state.lock().unwrap();
            state
                .running
                .remove(&(job.source.clone(), job.run.dispatch_id));

            state.stats.jobs_executed += 1;
            if !outcome.is_success() {
                state.stats.jobs_failed += 1;
            }
            state.stats.work_time_ns += compute_time_ns;
            state.stats.queue_time_ns += queue_time_ns;

            if job.cancelled.load(Ordering::SeqCst) {
                debug!("Suppressing completion of killed job {}", job.run.dispatch_id);
                None
            } else {
                let worker_id = state
                    .masters
                    .get(&job.source)
                    .and_then(|registration| registration.worker_id.clone());
                match worker_id {
                    Some(worker_id) => Some(vec![(
                        job.source.clone(),
                        Message::JobCompleted(JobCompleted {
                            worker_id: worker_id,
                            dispatch_id: job.run.dispatch_id,
                            outcome: outcome,
                            compute_time_ns: compute_time_ns,
                            queue_time_ns: queue_time_ns,
                        }),
                    )]),
                    None => {
                        warn!(
                            "Completed job {} for master {} we are not registered with",
                            job.run.dispatch_id, job.source
                        );
                        None
                    }
                }
            }
        };

        if let Some(messages) = report {
            self.send_all(messages);
        }
    }
}

fn failure_details(err: &Error) -> String {
    let mut details = format!("{}", err);
    for cause in err.iter().skip(1) {
        details.push_str("\ncaused by: ");
        details.push_str(&format!("{}", cause));
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_proto::JobInstance;
    use conductor_proto::TaskInstanceId;
    use transport::LocalExchange;

    fn test_worker(name: &str) -> Arc<Worker> {
        let exchange = LocalExchange::new();
        let transport = LocalExchange::bind(&exchange, name).unwrap();
        Worker::new(transport, 2)
    }

    fn run_message(dispatch_id: u64) -> RunJob {
        RunJob {
            master_address: "master".to_owned(),
            dispatch_id: dispatch_id,
            job: JobInstance::new(
                TaskInstanceId::new(0, "master".to_owned()),
                JobType::new("scale", 1),
                0,
                json!(1),
            ),
        }
    }

    #[test]
    fn test_kill_removes_queued_job() {
        let worker = test_worker("kill-queued");
        let master = "master".to_owned();
        worker.handle_run_job(&master, run_message(1));
        worker.handle_run_job(&master, run_message(2));

        worker.handle_kill_job(&master, KillJob { dispatch_id: 1 });

        let state = worker.state.lock().unwrap();
        assert_eq!(state.items.len(), 1);
        match state.items[0] {
            WorkItem::Run(ref job) => assert_eq!(job.run.dispatch_id, 2),
            WorkItem::Shutdown => panic!("Unexpected shutdown item"),
        }
    }

    #[test]
    fn test_kill_flags_running_job() {
        let worker = test_worker("kill-running");
        let master = "master".to_owned();
        let flag = Arc::new(AtomicBool::new(false));
        worker
            .state
            .lock()
            .unwrap()
            .running
            .insert((master.clone(), 7), Arc::clone(&flag));

        worker.handle_kill_job(&master, KillJob { dispatch_id: 7 });
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_registered_types_are_advertised() {
        let worker = test_worker("advertise");
        worker.register_runner(JobType::new("scale", 1), Arc::new(NullRunner));
        worker.register_runner(JobType::new("sharpen", 2), Arc::new(NullRunner));
        worker.register_runner(JobType::new("scale", 1), Arc::new(NullRunner));

        let types = worker.supported_types();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&JobType::new("scale", 1)));
    }

    #[test]
    fn test_dispatch_after_stop_is_ignored() {
        let worker = test_worker("stopped");
        worker.state.lock().unwrap().stopped = true;
        worker.handle_run_job(&"master".to_owned(), run_message(1));
        assert!(worker.state.lock().unwrap().items.is_empty());
    }

    struct NullRunner;

    impl JobRunner for NullRunner {
        fn run(
            &self,
            _: &JobContext,
            input: ::serde_json::Value,
        ) -> Result<::serde_json::Value> {
            Ok(input)
        }
    }
}

/// Starts the worker's execution pool: `thread_count` threads each pulling
/// from the internal ready queue until poisoned.
pub fn run_work_threads(worker: &Arc<Worker>) {
    let mut threads = worker.threads.lock().unwrap();
    for _ in 0..worker.thread_count {
        let worker = Arc::clone(worker);
        threads.push(thread::spawn(move || loop {
            match worker.next_work_item() {
                WorkItem::Run(job) => worker.execute(*job),
                WorkItem::Shutdown => break,
            }
        }));
    }
}
