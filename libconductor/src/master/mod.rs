pub mod queue;
pub mod worker_info;
pub mod worker_list;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures::future;
use futures_cpupool::CpuPool;
use serde_json;
use uuid::Uuid;

use conductor_proto::message::{AddNeighbors, JobCompleted, KillJob, MasterStopped, NoJob, Ping,
                               PingReply, RegisterWorker, RunJob, WorkRequest, WorkerAccept,
                               WorkerResign};
use conductor_proto::{Address, JobInstance, JobOutcome, JobType, Message, TaskInstanceId};
use errors::*;
use master::queue::{MasterQueue, QueueSelection};
use master::worker_info::WorkerInfo;
use master::worker_list::WorkerList;
use task::{CompletionListener, Task};
use transport::Transport;
use util::output_error;
use util::time::duration_as_ns;

/// Target wall-clock interval for the ping benchmark; long enough to be
/// resilient to timing noise.
const PING_BENCHMARK_TARGET_MS: u64 = 100;

/// Soft handshake timeout. An unanswered probe is forgotten; the next
/// contact from the candidate triggers a fresh one.
const PING_TIMEOUT_MS: u64 = 10_000;

/// Minimum interval between master-wide allowance reductions.
const ALLOWANCE_DECAY_MS: u64 = 1_000;

/// Soft queue bound for `submit_task_when_room`, per subscribed worker.
const JOBS_PER_WORKER: usize = 10;

const MIN_IDLE_WAIT_MS: u64 = 10;
const MAX_IDLE_WAIT_MS: u64 = 500;
const DEFAULT_IDLE_WAIT_MS: u64 = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MasterPhase {
    Running,
    Stopping,
    Stopped,
}

/// A dispatched job awaiting its completion report.
struct ActiveJob {
    dispatch_id: u64,
    job: JobInstance,
    worker_id: String,
    started_at: Instant,
}

/// One submitted pipeline run and where its terminal result goes.
struct RunningTask {
    task: Arc<Task>,
    user_id: String,
    listener: Arc<CompletionListener>,
}

/// A terminal notification prepared under the state lock and delivered
/// outside it, so listeners can re-enter the master.
struct Notification {
    listener: Arc<CompletionListener>,
    instance: TaskInstanceId,
    user_id: String,
    outcome: JobOutcome,
}

impl Notification {
    fn deliver(self) {
        self.listener
            .task_completed(&self.instance, &self.user_id, self.outcome);
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MasterStatistics {
    pub jobs_submitted: u64,
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub anomalies: u64,
}

struct MasterState {
    phase: MasterPhase,
    queue: MasterQueue,
    workers: WorkerList,
    active_jobs: Vec<ActiveJob>,
    tasks: HashMap<u64, RunningTask>,

    next_dispatch_id: u64,
    next_task_serial: u64,
    ping_seed: u64,

    pending_pings: HashMap<Address, Instant>,
    last_allowance_decay: Instant,
    /// Set by every event that can change what is dispatchable; cleared by
    /// the scheduling loop at the start of a pass. Prevents a wake-up sent
    /// between two loop passes from being lost.
    dirty: bool,

    stats: MasterStatistics,
}

/// The scheduling half of a node: owns the work queue, the worker registry,
/// and all master-bound protocol handling. One scheduling-loop thread per
/// master; message handlers run as transport upcalls and serialize through
/// the same state lock.
pub struct Master {
    address: Address,
    transport: Arc<Transport>,
    state: Mutex<MasterState>,
    wakeup: Condvar,
    pool: CpuPool,
}

impl Master {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let address = transport.local_address();
        Arc::new(Master {
            address: address,
            transport: transport,
            state: Mutex::new(MasterState {
                phase: MasterPhase::Running,
                queue: MasterQueue::new(),
                workers: WorkerList::new(),
                active_jobs: Vec::new(),
                tasks: HashMap::new(),

                next_dispatch_id: 0,
                next_task_serial: 0,
                ping_seed: 0,

                pending_pings: HashMap::new(),
                last_allowance_decay: Instant::now(),
                dirty: false,

                stats: Default::default(),
            }),
            wakeup: Condvar::new(),
            pool: CpuPool::new_num_cpus(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Enqueues the first job of a new task instance. Never blocks; see
    /// `submit_task_when_room` for the bounded variant.
    pub fn submit_task(
        &self,
        task: &Arc<Task>,
        input: serde_json::Value,
        user_id: &str,
        listener: Arc<CompletionListener>,
    ) -> Result<TaskInstanceId> {
        let (instance, gossip) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != MasterPhase::Running {
                bail!("Master is no longer accepting submissions");
            }
            self.submit_instance(&mut state, task, input, user_id, listener)
        };
        self.wakeup.notify_all();
        self.send_all(gossip);
        Ok(instance)
    }

    /// Like `submit_task`, but blocks while the queue already holds
    /// `JOBS_PER_WORKER` jobs per subscribed worker.
    pub fn submit_task_when_room(
        &self,
        task: &Arc<Task>,
        input: serde_json::Value,
        user_id: &str,
        listener: Arc<CompletionListener>,
    ) -> Result<TaskInstanceId> {
        let (instance, gossip) = {
            let mut state = self.state.lock().unwrap();
            loop {
                if state.phase != MasterPhase::Running {
                    bail!("Master is no longer accepting submissions");
                }
                let room = JOBS_PER_WORKER * ::std::cmp::max(1, state.workers.worker_count());
                if state.queue.len() < room {
                    break;
                }
                state = self.wakeup.wait(state).unwrap();
            }
            self.submit_instance(&mut state, task, input, user_id, listener)
        };
        self.wakeup.notify_all();
        self.send_all(gossip);
        Ok(instance)
    }

    fn submit_instance(
        &self,
        state: &mut MasterState,
        task: &Arc<Task>,
        input: serde_json::Value,
        user_id: &str,
        listener: Arc<CompletionListener>,
    ) -> (TaskInstanceId, Vec<(Address, Message)>) {
        let serial = state.next_task_serial;
        state.next_task_serial += 1;
        let instance = TaskInstanceId::new(serial, self.address.clone());

        state.tasks.insert(
            serial,
            RunningTask {
                task: Arc::clone(task),
                user_id: user_id.to_owned(),
                listener: listener,
            },
        );

        let job = JobInstance::new(
            instance.clone(),
            task.stages[0].clone(),
            0,
            input,
        );
        let new_type = state.queue.submit(job);
        state.stats.jobs_submitted += 1;
        state.dirty = true;

        // A first-of-its-type queue is worth gossiping about: workers that
        // learn of more peers can register more widely and surface as
        // candidates for the new type.
        let mut gossip = Vec::new();
        if new_type {
            let peers = state.workers.addresses();
            if peers.len() > 1 {
                for address in &peers {
                    gossip.push((
                        address.clone(),
                        Message::AddNeighbors(AddNeighbors {
                            peers: peers.clone(),
                        }),
                    ));
                }
            }
        }
        (instance, gossip)
    }

    /// Membership told us about a peer: probe it as a worker candidate.
    pub fn add_candidate(&self, address: &Address) {
        let ping = {
            let mut state = self.state.lock().unwrap();
            self.guarded_ping(&mut state, address)
        };
        self.send_all(ping);
    }

    pub fn handle_register_worker(&self, _source: &Address, request: RegisterWorker) {
        let ping = {
            let mut state = self.state.lock().unwrap();
            self.guarded_ping(&mut state, &request.worker_address)
        };
        self.send_all(ping);
    }

    pub fn handle_ping_reply(&self, source: &Address, reply: PingReply) {
        let accept = {
            let mut state = self.state.lock().unwrap();
            let sent_at = match state.pending_pings.remove(source) {
                Some(sent_at) => sent_at,
                None => {
                    state.stats.anomalies += 1;
                    warn!("Discarding ping reply from {} with no probe outstanding", source);
                    return;
                }
            };

            // The probe interval includes the benchmark run; the reply tells
            // us how long that was so it can be subtracted back out.
            let elapsed_ns = duration_as_ns(sent_at.elapsed());
            let round_trip_ns = elapsed_ns.saturating_sub(reply.benchmark_duration_ns);

            let worker_id = Uuid::new_v4().to_string();
            let mut worker = WorkerInfo::new(
                worker_id.clone(),
                reply.worker_address.clone(),
                round_trip_ns,
                reply.benchmark_score_ns,
                reply.thread_count,
            );
            worker.register_job_types(&reply.supported_types);

            if let Err(err) = state.workers.subscribe_worker(worker) {
                output_error(&err.chain_err(|| "Error subscribing worker"));
                return;
            }
            info!(
                "Subscribed worker {} at {} ({} threads, ping {})",
                worker_id,
                reply.worker_address,
                reply.thread_count,
                ::util::time::format_ns(round_trip_ns)
            );
            state.dirty = true;

            (
                reply.worker_address.clone(),
                Message::WorkerAccept(WorkerAccept {
                    master_address: self.address.clone(),
                    worker_id: worker_id,
                }),
            )
        };
        self.wakeup.notify_all();
        self.send_all(Some(accept));
    }

    pub fn handle_work_request(&self, source: &Address, request: WorkRequest) {
        let reply = {
            let mut state = self.state.lock().unwrap();
            if !state.workers.contains_address(source) {
                // An unknown worker asking for work restarts the handshake.
                self.guarded_ping(&mut state, &request.worker_address)
            } else {
                state
                    .workers
                    .register_worker_job_types(source, &request.supported_types);
                state.dirty = true;
                if state.queue.is_empty() {
                    Some((
                        source.clone(),
                        Message::NoJob(NoJob {
                            master_address: self.address.clone(),
                        }),
                    ))
                } else {
                    // The worker has capacity to spare while we have work
                    // queued: probe whether one of its saturated allowances
                    // tolerates more parallelism.
                    if let Some(worker_id) = state.workers.worker_id_for_address(source) {
                        for job_type in state.queue.waiting_types() {
                            if state.workers.increment_allowance(&worker_id, &job_type) {
                                break;
                            }
                        }
                    }
                    None
                }
            }
        };
        self.wakeup.notify_all();
        self.send_all(reply);
    }

    pub fn handle_job_completed(&self, _source: &Address, report: JobCompleted) {
        let notification = {
            let mut state = self.state.lock().unwrap();
            let position = state
                .active_jobs
                .iter()
                .position(|active| active.dispatch_id == report.dispatch_id);
            let active = match position {
                Some(position) => state.active_jobs.remove(position),
                None => {
                    // Duplicate or stale: the job was already accounted for
                    // (or requeued after a departure). Not fatal.
                    state.stats.anomalies += 1;
                    warn!(
                        "Discarding completion for unknown dispatch id {}",
                        report.dispatch_id
                    );
                    return;
                }
            };

            let round_trip_ns = duration_as_ns(active.started_at.elapsed());
            let remaining_ns = self.remaining_task_time(&state, &active);
            if let Err(err) = state.workers.register_completion(
                &active.worker_id,
                &active.job.job_type,
                round_trip_ns,
                report.compute_time_ns,
                remaining_ns,
            ) {
                output_error(&err.chain_err(|| "Error recording completion statistics"));
            }
            state.dirty = true;

            self.advance_instance(&mut state, active, report.outcome)
        };
        self.wakeup.notify_all();
        if let Some(notification) = notification {
            notification.deliver();
        }
    }

    /// Sum of the worker's primed per-type round-trip estimates over the
    /// pipeline stages after the completed one.
    fn remaining_task_time(&self, state: &MasterState, active: &ActiveJob) -> u64 {
        let running = match state.tasks.get(&active.job.task_instance.serial) {
            Some(running) => running,
            None => return 0,
        };
        let worker = match state.workers.get(&active.worker_id) {
            Some(worker) => worker,
            None => return 0,
        };

        let mut remaining_ns = 0;
        for stage_type in running.task.stages.iter().skip(active.job.stage + 1) {
            if let Some(job_info) = worker.job_info(stage_type) {
                if job_info.is_primed() {
                    remaining_ns += job_info.round_trip_estimate_ns();
                }
            }
        }
        remaining_ns
    }

    /// Feeds a stage result into the next stage, or produces the terminal
    /// notification for the instance.
    fn advance_instance(
        &self,
        state: &mut MasterState,
        active: ActiveJob,
        outcome: JobOutcome,
    ) -> Option<Notification> {
        let serial = active.job.task_instance.serial;

        match outcome {
            JobOutcome::Success(value) => {
                let next_stage = active.job.stage + 1;
                let followup = match state.tasks.get(&serial) {
                    Some(running) if next_stage < running.task.stage_count() => {
                        Some(JobInstance::new(
                            active.job.task_instance.clone(),
                            running.task.stages[next_stage].clone(),
                            next_stage,
                            value.clone(),
                        ))
                    }
                    Some(_) => None,
                    None => {
                        state.stats.anomalies += 1;
                        warn!("Completion for unknown task instance {}", serial);
                        return None;
                    }
                };

                state.stats.jobs_completed += 1;
                match followup {
                    Some(job) => {
                        state.queue.submit(job);
                        None
                    }
                    None => state.tasks.remove(&serial).map(|running| Notification {
                        listener: running.listener,
                        instance: active.job.task_instance,
                        user_id: running.user_id,
                        outcome: JobOutcome::Success(value),
                    }),
                }
            }
            JobOutcome::Failure(reason) => {
                state.stats.jobs_failed += 1;
                state.tasks.remove(&serial).map(|running| Notification {
                    listener: running.listener,
                    instance: active.job.task_instance,
                    user_id: running.user_id,
                    outcome: JobOutcome::Failure(reason),
                })
            }
        }
    }

    pub fn handle_worker_resign(&self, source: &Address, resignation: WorkerResign) {
        let mut state = self.state.lock().unwrap();
        info!("Worker {} at {} resigned", resignation.worker_id, source);
        self.forget_worker(&mut state, Some(&resignation.worker_id), source);
        drop(state);
        self.wakeup.notify_all();
    }

    /// Membership detected a departed peer. Any worker subscribed at that
    /// address is dropped and its in-flight jobs recovered.
    pub fn handle_worker_departed(&self, address: &Address) {
        let mut state = self.state.lock().unwrap();
        state.pending_pings.remove(address);
        self.forget_worker(&mut state, None, address);
        drop(state);
        self.wakeup.notify_all();
    }

    fn forget_worker(
        &self,
        state: &mut MasterState,
        worker_id: Option<&str>,
        address: &Address,
    ) {
        let removed = match worker_id {
            Some(worker_id) => state.workers.unsubscribe_worker(worker_id),
            None => state.workers.unsubscribe_by_address(address),
        };
        let removed = match removed {
            Some(removed) => removed,
            None => return,
        };

        // User work must never be lost with the worker: every in-flight job
        // goes back to the front of its type's queue for redispatch.
        let mut requeued = 0;
        let mut index = 0;
        while index < state.active_jobs.len() {
            if state.active_jobs[index].worker_id == removed.worker_id() {
                let active = state.active_jobs.remove(index);
                state.queue.requeue_front(active.job);
                requeued += 1;
            } else {
                index += 1;
            }
        }
        state.stats.jobs_requeued += requeued;
        state.dirty = true;
        info!(
            "Unsubscribed worker {} at {}; requeued {} active jobs",
            removed.worker_id(),
            address,
            requeued
        );
    }

    /// Cancels a task instance: queued jobs are dropped, active ones are
    /// killed on their workers, and the listener receives a single explicit
    /// failure.
    pub fn cancel_task_instance(&self, instance: &TaskInstanceId) {
        let (kills, notification) = {
            let mut state = self.state.lock().unwrap();
            state.queue.remove_instance(instance);

            let mut kills = Vec::new();
            let mut index = 0;
            while index < state.active_jobs.len() {
                if state.active_jobs[index].job.task_instance == *instance {
                    let active = state.active_jobs.remove(index);
                    state
                        .workers
                        .abort_dispatch(&active.worker_id, &active.job.job_type);
                    if let Some(worker) = state.workers.get(&active.worker_id) {
                        kills.push((
                            worker.address().clone(),
                            Message::KillJob(KillJob {
                                dispatch_id: active.dispatch_id,
                            }),
                        ));
                    }
                } else {
                    index += 1;
                }
            }

            let notification = state.tasks.remove(&instance.serial).map(|running| {
                Notification {
                    listener: running.listener,
                    instance: instance.clone(),
                    user_id: running.user_id,
                    outcome: JobOutcome::Failure("Cancelled".to_owned()),
                }
            });
            state.dirty = true;
            (kills, notification)
        };
        self.wakeup.notify_all();
        self.send_all(kills);
        if let Some(notification) = notification {
            notification.deliver();
        }
    }

    /// RUNNING -> STOPPING. The scheduling loop keeps draining in-flight
    /// work and performs the final transition to STOPPED itself.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == MasterPhase::Running {
            state.phase = MasterPhase::Stopping;
            state.dirty = true;
        }
        drop(state);
        self.wakeup.notify_all();
    }

    pub fn wait_until_stopped(&self) {
        let mut state = self.state.lock().unwrap();
        while state.phase != MasterPhase::Stopped {
            state = self.wakeup.wait(state).unwrap();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().phase == MasterPhase::Stopped
    }

    pub fn active_job_count(&self) -> usize {
        self.state.lock().unwrap().active_jobs.len()
    }

    pub fn queued_job_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn worker_count(&self) -> usize {
        self.state.lock().unwrap().workers.worker_count()
    }

    pub fn statistics(&self) -> MasterStatistics {
        self.state.lock().unwrap().stats.clone()
    }

    pub fn log_statistics(&self) {
        let state = self.state.lock().unwrap();
        info!(
            "Master {}: submitted {} dispatched {} completed {} failed {} requeued {} anomalies {}",
            self.address,
            state.stats.jobs_submitted,
            state.stats.jobs_dispatched,
            state.stats.jobs_completed,
            state.stats.jobs_failed,
            state.stats.jobs_requeued,
            state.stats.anomalies
        );
        for line in state.workers.statistics_lines() {
            info!("Master {}: {}", self.address, line);
        }
    }

    fn guarded_ping(
        &self,
        state: &mut MasterState,
        address: &Address,
    ) -> Option<(Address, Message)> {
        if state.workers.contains_address(address) {
            return None;
        }
        if let Some(sent_at) = state.pending_pings.get(address) {
            if duration_as_ns(sent_at.elapsed()) < PING_TIMEOUT_MS * 1_000_000 {
                return None;
            }
        }

        state.pending_pings.insert(address.clone(), Instant::now());
        state.ping_seed += 1;
        Some((
            address.clone(),
            Message::Ping(Ping {
                master_address: self.address.clone(),
                benchmark_seed: state.ping_seed,
                target_duration_ms: PING_BENCHMARK_TARGET_MS,
            }),
        ))
    }

    /// Fire-and-forget sends issued outside the state lock. A failed send
    /// here is not a dispatch; nothing needs recovering.
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

    fn handle_dispatch_failure(&self, dispatch_id: u64, job_type: &JobType) {
        let mut state = self.state.lock().unwrap();
        let position = state
            .active_jobs
            .iter()
            .position(|active| active.dispatch_id == dispatch_id);
        if let Some(position) = position {
            let active = state.active_jobs.remove(position);
            state.workers.abort_dispatch(&active.worker_id, job_type);
            state.queue.requeue_front(active.job);
            state.stats.jobs_requeued += 1;
            state.dirty = true;
        }
        drop(state);
        self.wakeup.notify_all();
    }
}

struct Dispatch {
    address: Address,
    dispatch_id: u64,
    job_type: JobType,
    message: Message,
}

/// Runs the master's scheduling loop until the master reaches STOPPED.
/// Dispatch sends go through the cpu pool so a slow or failing send never
/// stalls scheduling; a failed send returns the job to the queue.
pub fn run_scheduling_loop(master: Arc<Master>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let mut dispatches: Vec<Dispatch> = Vec::new();
        let mut farewells: Vec<(Address, Message)> = Vec::new();
        let mut finished = false;
        let wait;

        {
            let mut guard = master.state.lock().unwrap();
            let state = &mut *guard;
            state.dirty = false;

            if state.phase == MasterPhase::Stopped {
                break;
            }

            if state.phase == MasterPhase::Stopping {
                if state.workers.worker_count() == 0 && !state.queue.is_empty() {
                    abandon_queue(state, &master.address);
                }
                if state.active_jobs.is_empty() && state.queue.is_empty() {
                    state.phase = MasterPhase::Stopped;
                    for address in state.workers.addresses() {
                        farewells.push((
                            address,
                            Message::MasterStopped(MasterStopped {
                                master_address: master.address.clone(),
                            }),
                        ));
                    }
                    finished = true;
                }
            }

            if !finished {
                let now = Instant::now();
                let mut stalled = false;
                loop {
                    match state.queue.select_job(&state.workers, now) {
                        QueueSelection::Dispatch { job, worker_id } => {
                            let address = match state.workers.get(&worker_id) {
                                Some(worker) => worker.address().clone(),
                                None => {
                                    state.queue.requeue_front(job);
                                    continue;
                                }
                            };
                            if let Err(err) =
                                state.workers.register_dispatch(&worker_id, &job.job_type, now)
                            {
                                output_error(&err.chain_err(|| "Error booking dispatch"));
                                state.queue.requeue_front(job);
                                break;
                            }

                            let dispatch_id = state.next_dispatch_id;
                            state.next_dispatch_id += 1;
                            state.active_jobs.push(ActiveJob {
                                dispatch_id: dispatch_id,
                                job: job.clone(),
                                worker_id: worker_id,
                                started_at: now,
                            });
                            state.stats.jobs_dispatched += 1;

                            dispatches.push(Dispatch {
                                address: address,
                                dispatch_id: dispatch_id,
                                job_type: job.job_type.clone(),
                                message: Message::RunJob(RunJob {
                                    master_address: master.address.clone(),
                                    dispatch_id: dispatch_id,
                                    job: job,
                                }),
                            });
                        }
                        QueueSelection::NoEligibleWorker => {
                            // Every supporting worker is at its ceiling, or
                            // nobody supports the waiting types. Allowance
                            // probes arrive with worker work requests; here
                            // the loop only backs off and retries.
                            stalled = true;
                            break;
                        }
                        QueueSelection::NoWork => {
                            let decay_due = duration_as_ns(state.last_allowance_decay.elapsed())
                                >= ALLOWANCE_DECAY_MS * 1_000_000;
                            if decay_due {
                                state.workers.reduce_allowances();
                                state.last_allowance_decay = now;
                            }
                            break;
                        }
                    }
                }

                // A stopping master with nothing in flight and work nobody
                // can take cannot make further progress; the work is
                // abandoned so the final transition can happen.
                if state.phase == MasterPhase::Stopping && stalled
                    && state.active_jobs.is_empty() && !state.queue.is_empty()
                {
                    abandon_queue(state, &master.address);
                    state.dirty = true;
                }

                wait = idle_wait(state);
            } else {
                wait = Duration::from_millis(0);
            }
        }

        master.send_all(farewells);
        if finished {
            master.wakeup.notify_all();
            break;
        }

        for dispatch in dispatches {
            spawn_dispatch(&master, dispatch);
        }

        let state = master.state.lock().unwrap();
        if !state.dirty {
            let _ = master.wakeup.wait_timeout(state, wait);
        }
    })
}

/// Drops all queued work at shutdown. Undelivered work yields no terminal
/// notification, which callers treat as cancellation.
fn abandon_queue(state: &mut MasterState, address: &Address) {
    let abandoned = state.queue.drain_all();
    warn!(
        "Master {}: abandoning {} queued jobs at shutdown",
        address,
        abandoned.len()
    );
    for job in abandoned {
        state.tasks.remove(&job.task_instance.serial);
    }
}

/// Bounds the idle sleep by the soonest predicted worker-ready time, so the
/// loop wakes roughly when a dispatch might become possible without ever
/// busy-spinning.
fn idle_wait(state: &MasterState) -> Duration {
    let bound = state
        .workers
        .min_busy_interval(Instant::now())
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_IDLE_WAIT_MS));
    let min = Duration::from_millis(MIN_IDLE_WAIT_MS);
    let max = Duration::from_millis(MAX_IDLE_WAIT_MS);
    if bound < min {
        min
    } else if bound > max {
        max
    } else {
        bound
    }
}

fn spawn_dispatch(master: &Arc<Master>, dispatch: Dispatch) {
    let pool = master.pool.clone();
    let master = Arc::clone(master);
    let Dispatch {
        address,
        dispatch_id,
        job_type,
        message,
    } = dispatch;
    let send_future = future::lazy(move || {
        if let Err(err) = master.transport.send(&address, message) {
            output_error(&err.chain_err(|| {
                format!("Error dispatching job {} to {}", dispatch_id, address)
            }));
            master.handle_dispatch_failure(dispatch_id, &job_type);
        }
        future::ok::<(), ()>(())
    });
    pool.spawn(send_future).forget();
}
