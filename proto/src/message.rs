use job::{JobInstance, JobOutcome, JobType};

/// A transport endpoint name. The underlying point-to-point transport is an
/// external collaborator; the core only ever treats addresses as opaque
/// routing keys.
pub type Address = String;

/// Initial handshake: a worker offers itself to a master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub worker_address: Address,
}

/// Handshake completion: the master has subscribed the worker and assigned
/// it an identifier to use in all further status traffic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerAccept {
    pub master_address: Address,
    pub worker_id: String,
}

/// Latency and speed probe. The worker must run the synthetic benchmark
/// over the seed for at least the target interval before replying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ping {
    pub master_address: Address,
    pub benchmark_seed: u64,
    pub target_duration_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PingReply {
    pub worker_address: Address,
    /// Measured benchmark cost in nanoseconds per iteration.
    pub benchmark_score_ns: f64,
    /// How long the benchmark actually ran.
    pub benchmark_duration_ns: u64,
    pub thread_count: u32,
    pub supported_types: Vec<JobType>,
}

/// Capability advertisement doubling as a request for more work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkRequest {
    pub worker_address: Address,
    pub supported_types: Vec<JobType>,
}

/// Dispatch of one job to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunJob {
    pub master_address: Address,
    pub dispatch_id: u64,
    pub job: JobInstance,
}

/// Completion report carrying the result and execution telemetry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobCompleted {
    pub worker_id: String,
    pub dispatch_id: u64,
    pub outcome: JobOutcome,
    pub compute_time_ns: u64,
    pub queue_time_ns: u64,
}

/// Graceful departure of a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerResign {
    pub worker_id: String,
}

/// Gossip of candidate peers a worker may want to register with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddNeighbors {
    pub peers: Vec<Address>,
}

/// Tell a worker to abandon an outstanding job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KillJob {
    pub dispatch_id: u64,
}

/// The master has stopped; registered workers should drop it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterStopped {
    pub master_address: Address,
}

/// Backpressure reply to a work request: the master has nothing queued.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoJob {
    pub master_address: Address,
}

/// The full message protocol as one tagged union. Every payload is its own
/// struct so handlers can take exactly the fields they need; receivers
/// dispatch through a single match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    RegisterWorker(RegisterWorker),
    WorkerAccept(WorkerAccept),
    Ping(Ping),
    PingReply(PingReply),
    WorkRequest(WorkRequest),
    RunJob(RunJob),
    JobCompleted(JobCompleted),
    WorkerResign(WorkerResign),
    AddNeighbors(AddNeighbors),
    KillJob(KillJob),
    MasterStopped(MasterStopped),
    NoJob(NoJob),
}

impl Message {
    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match *self {
            Message::RegisterWorker(_) => "RegisterWorker",
            Message::WorkerAccept(_) => "WorkerAccept",
            Message::Ping(_) => "Ping",
            Message::PingReply(_) => "PingReply",
            Message::WorkRequest(_) => "WorkRequest",
            Message::RunJob(_) => "RunJob",
            Message::JobCompleted(_) => "JobCompleted",
            Message::WorkerResign(_) => "WorkerResign",
            Message::AddNeighbors(_) => "AddNeighbors",
            Message::KillJob(_) => "KillJob",
            Message::MasterStopped(_) => "MasterStopped",
            Message::NoJob(_) => "NoJob",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        let msg = Message::KillJob(KillJob { dispatch_id: 7 });
        assert_eq!(msg.kind(), "KillJob");
    }
}
