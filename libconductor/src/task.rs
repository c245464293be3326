use std::sync::{Arc, Condvar, Mutex};

use serde_json;

use conductor_proto::{JobOutcome, JobType, TaskInstanceId};
use errors::*;
use master::Master;

/// A named pipeline of job types. One `Task` is a template; each submission
/// creates a task instance whose jobs flow through the stages in order,
/// every stage's output becoming the next stage's input.
pub struct Task {
    pub name: String,
    pub stages: Vec<JobType>,
}

impl Task {
    pub fn new<S: Into<String>>(name: S, stages: Vec<JobType>) -> Result<Self> {
        if stages.is_empty() {
            bail!("A task requires at least one stage");
        }
        Ok(Task {
            name: name.into(),
            stages: stages,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Receives the single terminal notification for a task instance: success
/// with the terminal stage's output, or an explicit failure.
pub trait CompletionListener: Send + Sync {
    fn task_completed(&self, instance: &TaskInstanceId, user_id: &str, outcome: JobOutcome);
}

struct WaiterState {
    outstanding: usize,
    submitted: usize,
    results: Vec<Option<JobOutcome>>,
}

/// Blocks a caller until every task instance it submitted has resolved.
///
/// The waiter registers itself as the completion listener for its own
/// submissions and keys each one by its submission index, so `wait` can hand
/// the outcomes back in submission order.
pub struct TaskWaiter {
    state: Mutex<WaiterState>,
    resolved: Condvar,
}

impl TaskWaiter {
    pub fn new() -> Arc<Self> {
        Arc::new(TaskWaiter {
            state: Mutex::new(WaiterState {
                outstanding: 0,
                submitted: 0,
                results: Vec::new(),
            }),
            resolved: Condvar::new(),
        })
    }

    /// Submits one instance of the task through the given master, tracked by
    /// this waiter.
    pub fn submit(
        waiter: &Arc<Self>,
        master: &Master,
        task: &Arc<Task>,
        input: serde_json::Value,
    ) -> Result<TaskInstanceId> {
        let index = {
            let mut state = waiter.state.lock().unwrap();
            let index = state.submitted;
            state.submitted += 1;
            state.outstanding += 1;
            state.results.push(None);
            index
        };

        let listener = Arc::clone(waiter) as Arc<CompletionListener>;
        let submit_result =
            master.submit_task(task, input, &index.to_string(), listener);

        match submit_result {
            Ok(instance) => Ok(instance),
            Err(err) => {
                // The submission never happened, so it must not hold up the
                // final wait.
                let mut state = waiter.state.lock().unwrap();
                state.outstanding -= 1;
                state.results[index] = Some(JobOutcome::Failure("Submission failed".to_owned()));
                drop(state);
                waiter.resolved.notify_all();
                Err(err).chain_err(|| "Unable to submit task instance")
            }
        }
    }

    /// Blocks until every submission tracked by this waiter has resolved,
    /// then returns the outcomes in submission order and resets the waiter
    /// for a possible next round.
    pub fn wait(&self) -> Vec<JobOutcome> {
        let mut state = self.state.lock().unwrap();
        while state.outstanding > 0 {
            state = self.resolved.wait(state).unwrap();
        }

        let results = state.results.drain(..).collect::<Vec<_>>();
        state.submitted = 0;

        results
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| JobOutcome::Failure("Result was lost".to_owned()))
            })
            .collect()
    }
}

impl CompletionListener for TaskWaiter {
    fn task_completed(&self, _: &TaskInstanceId, user_id: &str, outcome: JobOutcome) {
        let index: usize = match user_id.parse() {
            Ok(index) => index,
            Err(_) => {
                warn!("Ignoring completion with foreign user id {}", user_id);
                return;
            }
        };

        let mut state = self.state.lock().unwrap();
        if index >= state.results.len() || state.results[index].is_some() {
            warn!("Duplicate or unknown completion for submission {}", index);
            return;
        }
        state.results[index] = Some(outcome);
        state.outstanding -= 1;
        drop(state);
        self.resolved.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_requires_stages() {
        assert!(Task::new("empty", vec![]).is_err());

        let task = Task::new("scale", vec![JobType::new("scale", 1)]).unwrap();
        assert_eq!(task.stage_count(), 1);
    }

    #[test]
    fn test_waiter_resolves_out_of_order() {
        let waiter = TaskWaiter::new();
        {
            let mut state = waiter.state.lock().unwrap();
            state.submitted = 2;
            state.outstanding = 2;
            state.results = vec![None, None];
        }

        let id = TaskInstanceId::new(0, "m".to_owned());
        waiter.task_completed(&id, "1", JobOutcome::Success(json!("second")));
        waiter.task_completed(&id, "0", JobOutcome::Success(json!("first")));

        let results = waiter.wait();
        assert_eq!(results[0], JobOutcome::Success(json!("first")));
        assert_eq!(results[1], JobOutcome::Success(json!("second")));
    }
}
