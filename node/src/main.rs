#[macro_use]
extern crate clap;
extern crate conductor;
extern crate conductor_proto;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_json;
extern crate util;

mod errors {
    error_chain!{}
}

mod parser;

use std::process;
use std::sync::Arc;

use conductor::{JobContext, JobRunner, LocalCluster, LocalExchange, Membership, Node, NodeConfig,
                Task, TaskWaiter};
use conductor_proto::{JobOutcome, JobType};
use errors::*;

const DEFAULT_NODE_COUNT: usize = 3;
const DEFAULT_THREAD_COUNT: u32 = 2;
const DEFAULT_JOB_COUNT: usize = 12;

/// First pipeline stage: sum of squares up to the input value.
struct SquareSum;

impl JobRunner for SquareSum {
    fn run(
        &self,
        _: &JobContext,
        input: serde_json::Value,
    ) -> conductor::errors::Result<serde_json::Value> {
        let n = input.as_u64().ok_or("Input was not an unsigned integer")?;
        let mut total: u64 = 0;
        for i in 1..(n + 1) {
            total = total.wrapping_add(i * i);
        }
        Ok(json!(total))
    }
}

/// Second pipeline stage: integer square root of the first stage's output.
struct Root;

impl JobRunner for Root {
    fn run(
        &self,
        _: &JobContext,
        input: serde_json::Value,
    ) -> conductor::errors::Result<serde_json::Value> {
        let n = input.as_u64().ok_or("Input was not an unsigned integer")?;
        Ok(json!((n as f64).sqrt() as u64))
    }
}

fn parse_count<T: ::std::str::FromStr>(
    matches: &clap::ArgMatches,
    name: &str,
    default: T,
) -> Result<T> {
    match matches.value_of(name) {
        Some(value) => value
            .parse()
            .map_err(|_| format!("Invalid value for --{}: {}", name, value).into()),
        None => Ok(default),
    }
}

fn run() -> Result<()> {
    util::init_logger().chain_err(|| "Failed to initialize logging")?;

    let matches = parser::parse_command_line();
    let node_count = parse_count(&matches, "nodes", DEFAULT_NODE_COUNT)?;
    let thread_count = parse_count(&matches, "threads", DEFAULT_THREAD_COUNT)?;
    let job_count = parse_count(&matches, "jobs", DEFAULT_JOB_COUNT)?;
    if node_count == 0 {
        bail!("At least one node is required");
    }

    let square_sum = JobType::new("square-sum", 2);
    let root = JobType::new("root", 1);

    let exchange = LocalExchange::new();
    let cluster = LocalCluster::new();
    let mut nodes = Vec::new();

    for index in 0..node_count {
        let address = format!("node-{}", index);
        let transport = LocalExchange::bind(&exchange, &address)
            .chain_err(|| "Unable to bind node transport")?;
        let membership =
            Arc::new(LocalCluster::handle(&cluster, &address)) as Arc<Membership>;

        let node = Node::new(
            transport,
            membership,
            NodeConfig {
                thread_count: thread_count,
                run_for_leader: true,
            },
        ).chain_err(|| format!("Unable to start node {}", address))?;

        node.worker()
            .register_runner(square_sum.clone(), Arc::new(SquareSum));
        node.worker().register_runner(root.clone(), Arc::new(Root));
        nodes.push(node);
    }

    let leader = nodes
        .iter()
        .find(|node| node.is_leader())
        .chain_err(|| "No node won the election")?;
    info!(
        "Cluster of {} nodes up; leader is {}",
        node_count,
        leader.address()
    );

    let task = Arc::new(
        Task::new("checksum", vec![square_sum, root])
            .chain_err(|| "Unable to build demo task")?,
    );

    let waiter = TaskWaiter::new();
    for index in 0..job_count {
        TaskWaiter::submit(&waiter, leader.master(), &task, json!(index as u64 + 1))
            .chain_err(|| "Unable to submit task instance")?;
    }

    let results = waiter.wait();
    let successes = results
        .iter()
        .filter(|outcome| outcome.is_success())
        .count();
    info!("{}/{} task instances succeeded", successes, results.len());
    for (index, outcome) in results.iter().enumerate() {
        if let JobOutcome::Failure(ref reason) = *outcome {
            warn!("Task instance {} failed: {}", index, reason);
        }
    }

    // Stopping the leader first exercises the cluster's termination
    // convention; the remaining shutdowns are no-ops if the nodes already
    // wound themselves down.
    for node in &nodes {
        node.shutdown();
    }

    if successes != results.len() {
        bail!("Some task instances failed");
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        util::output_error(&err);
        process::exit(1);
    }
}
