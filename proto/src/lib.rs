extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;

pub mod job;
pub mod message;

pub use job::{JobInstance, JobOutcome, JobType, TaskInstanceId};
pub use message::Address;
pub use message::Message;
