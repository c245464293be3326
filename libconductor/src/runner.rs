use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json;

use errors::*;

/// Execution context handed to a job body. Lets a long-running body observe
/// cancellation requested by the dispatching master.
pub struct JobContext {
    dispatch_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(dispatch_id: u64, cancelled: Arc<AtomicBool>) -> Self {
        JobContext {
            dispatch_id: dispatch_id,
            cancelled: cancelled,
        }
    }

    pub fn dispatch_id(&self) -> u64 {
        self.dispatch_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A job body: one opaque unit of computation. The scheduling core never
/// inspects the input or output values; it only moves them between pipeline
/// stages.
///
/// An `Err` return is reported to the submitting master as an explicit
/// failure, never as a crash of the executing thread.
pub trait JobRunner: Send + Sync {
    fn run(&self, context: &JobContext, input: serde_json::Value) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl JobRunner for Doubler {
        fn run(&self, _: &JobContext, input: serde_json::Value) -> Result<serde_json::Value> {
            let value = input.as_i64().chain_err(|| "Input was not an integer")?;
            Ok(json!(value * 2))
        }
    }

    #[test]
    fn test_runner_invocation() {
        let context = JobContext::new(1, Arc::new(AtomicBool::new(false)));
        let result = Doubler.run(&context, json!(21)).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn test_context_observes_cancellation() {
        let flag = Arc::new(AtomicBool::new(false));
        let context = JobContext::new(9, Arc::clone(&flag));
        assert!(!context.is_cancelled());

        flag.store(true, Ordering::SeqCst);
        assert!(context.is_cancelled());
    }
}
