#![recursion_limit = "1024"]

extern crate chrono;
extern crate conductor_proto;
#[macro_use]
extern crate error_chain;
extern crate futures;
extern crate futures_cpupool;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate util;
extern crate uuid;

pub mod errors {
    error_chain!{}
}

pub mod master;
pub mod membership;
pub mod node;
pub mod runner;
pub mod task;
pub mod time_estimate;
pub mod transport;
pub mod worker;

pub use master::Master;
pub use membership::{LocalCluster, Membership, MembershipEvent, MembershipListener};
pub use node::{Node, NodeConfig};
pub use runner::{JobContext, JobRunner};
pub use task::{CompletionListener, Task, TaskWaiter};
pub use time_estimate::TimeEstimate;
pub use transport::{LocalExchange, MessageHandler, Transport};
pub use worker::Worker;
