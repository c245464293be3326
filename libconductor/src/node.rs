use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json;

use conductor_proto::{Address, Message, TaskInstanceId};
use errors::*;
use master::{self, Master};
use membership::{Membership, MembershipEvent, MembershipListener};
use task::{CompletionListener, Task};
use transport::{MessageHandler, Transport};
use util::output_error;
use worker::{self, Worker};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Size of the worker's execution pool.
    pub thread_count: u32,
    /// Whether this node stands in the leader election. Non-candidates
    /// still track the elected leaders and stop when none remain.
    pub run_for_leader: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            thread_count: 2,
            run_for_leader: true,
        }
    }
}

struct NodeState {
    is_leader: bool,
    /// The leaders this node has heard elected and not yet seen depart.
    leaders: Vec<Address>,
    saw_leader: bool,
    stopping: bool,
    scheduling_loop: Option<JoinHandle<()>>,
}

/// One process's footprint in the cluster: membership bootstrap plus one
/// `Master` and one `Worker`. Every node both submits and executes; the
/// elected leader is only distinguished as the run's initial submitter.
///
/// The node is also the process's single message switch: every transport
/// upcall lands here and is routed to the master's or the worker's handler
/// for its kind.
pub struct Node {
    membership: Arc<Membership>,
    master: Arc<Master>,
    worker: Arc<Worker>,
    address: Address,
    state: Mutex<NodeState>,
}

impl Node {
    /// Boots a node: starts the worker pool and the scheduling loop, joins
    /// cluster membership, and takes part in the leader election.
    pub fn new(
        transport: Arc<Transport>,
        membership: Arc<Membership>,
        config: NodeConfig,
    ) -> Result<Arc<Self>> {
        let address = transport.local_address();
        let master = Master::new(Arc::clone(&transport));
        let worker = Worker::new(Arc::clone(&transport), config.thread_count);

        let node = Arc::new(Node {
            membership: Arc::clone(&membership),
            master: master,
            worker: worker,
            address: address.clone(),
            state: Mutex::new(NodeState {
                is_leader: false,
                leaders: Vec::new(),
                saw_leader: false,
                stopping: false,
                scheduling_loop: None,
            }),
        });

        transport.register_handler(Arc::clone(&node) as Arc<MessageHandler>);
        worker::run_work_threads(&node.worker);
        {
            let handle = master::run_scheduling_loop(Arc::clone(&node.master));
            node.state.lock().unwrap().scheduling_loop = Some(handle);
        }

        membership
            .join(Arc::clone(&node) as Arc<MembershipListener>)
            .chain_err(|| "Unable to join cluster membership")?;

        if config.run_for_leader {
            let leader = membership
                .elect_leader()
                .chain_err(|| "Leader election failed")?;
            let mut state = node.state.lock().unwrap();
            state.is_leader = leader == address;
            if state.is_leader {
                info!("Node {} elected leader", address);
            }
        }

        Ok(node)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().unwrap().is_leader
    }

    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn submit_task(
        &self,
        task: &Arc<Task>,
        input: serde_json::Value,
        user_id: &str,
        listener: Arc<CompletionListener>,
    ) -> Result<TaskInstanceId> {
        self.master.submit_task(task, input, user_id, listener)
    }

    pub fn submit_task_when_room(
        &self,
        task: &Arc<Task>,
        input: serde_json::Value,
        user_id: &str,
        listener: Arc<CompletionListener>,
    ) -> Result<TaskInstanceId> {
        self.master
            .submit_task_when_room(task, input, user_id, listener)
    }

    pub fn cancel_task_instance(&self, instance: &TaskInstanceId) {
        self.master.cancel_task_instance(instance)
    }

    /// Orderly shutdown: the master drains its in-flight work and stops,
    /// the worker resigns everywhere and joins its pool, and the node
    /// leaves membership. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.stopping {
                return;
            }
            state.stopping = true;
        }
        info!("Node {} shutting down", self.address);

        self.master.stop();
        self.master.wait_until_stopped();
        self.worker.stop();

        if let Err(err) = self.membership.leave() {
            output_error(&err.chain_err(|| "Error leaving cluster membership"));
        }

        let handle = self.state.lock().unwrap().scheduling_loop.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.master.log_statistics();
        self.worker.log_statistics();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.lock().unwrap().stopping
    }

    fn handle_peer_gone(&self, peer: &Address) {
        self.master.handle_worker_departed(peer);
        self.worker.handle_master_departed(peer);

        let leaders_gone = {
            let mut state = self.state.lock().unwrap();
            state.leaders.retain(|leader| leader != peer);
            state.saw_leader && state.leaders.is_empty() && !state.stopping
        };

        // The termination convention for a batch-style run: when the last
        // leader (the run's submitter) has departed, the computation is
        // over and the node winds itself down.
        if leaders_gone && *peer != self.address {
            info!(
                "Node {}: no leaders left in the cluster, stopping",
                self.address
            );
            self.shutdown();
        }
    }
}

impl MessageHandler for Node {
    fn on_message(&self, source: &Address, message: Message) {
        match message {
            // Master-bound traffic.
            Message::RegisterWorker(payload) => self.master.handle_register_worker(source, payload),
            Message::PingReply(payload) => self.master.handle_ping_reply(source, payload),
            Message::WorkRequest(payload) => self.master.handle_work_request(source, payload),
            Message::JobCompleted(payload) => self.master.handle_job_completed(source, payload),
            Message::WorkerResign(payload) => self.master.handle_worker_resign(source, payload),

            // Worker-bound traffic.
            Message::WorkerAccept(payload) => self.worker.handle_worker_accept(source, payload),
            Message::Ping(payload) => self.worker.handle_ping(source, payload),
            Message::RunJob(payload) => self.worker.handle_run_job(source, payload),
            Message::KillJob(payload) => self.worker.handle_kill_job(source, payload),
            Message::AddNeighbors(payload) => self.worker.handle_add_neighbors(source, payload),
            Message::MasterStopped(payload) => self.worker.handle_master_stopped(source, payload),
            Message::NoJob(payload) => self.worker.handle_no_job(source, payload),
        }
    }
}

impl MembershipListener for Node {
    fn on_membership_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Joined(peer) => {
                // Every peer is both a worker candidate for our master and
                // a master candidate for our worker, ourselves included.
                self.master.add_candidate(&peer);
                self.worker.add_master(&peer);
            }
            MembershipEvent::Left(peer) | MembershipEvent::Died(peer) => {
                self.handle_peer_gone(&peer);
            }
            MembershipEvent::LeaderElected(leader) => {
                let mut state = self.state.lock().unwrap();
                state.saw_leader = true;
                if !state.leaders.contains(&leader) {
                    state.leaders.push(leader);
                }
            }
        }
    }
}
