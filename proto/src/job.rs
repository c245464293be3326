use std::cmp::Ordering;

use serde_json;

use message::Address;

/// `JobType` identifies a scheduling class of jobs: a name, used for
/// capability matching against workers, and a priority, used to order the
/// master queue.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobType {
    pub name: String,
    pub priority: i32,
}

impl JobType {
    pub fn new<S: Into<String>>(name: S, priority: i32) -> Self {
        JobType {
            name: name.into(),
            priority: priority,
        }
    }
}

impl Ord for JobType {
    // Scheduling order is by priority alone; the name only breaks ties so
    // that the order is total and stable.
    fn cmp(&self, other: &JobType) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for JobType {
    fn partial_cmp(&self, other: &JobType) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Identifies one run of a task pipeline. The serial is handed out by the
/// owning master; together with the owner address it is unique in the
/// cluster.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskInstanceId {
    pub serial: u64,
    pub owner: Address,
}

impl TaskInstanceId {
    pub fn new(serial: u64, owner: Address) -> Self {
        TaskInstanceId {
            serial: serial,
            owner: owner,
        }
    }
}

/// One schedulable unit of work: a stage of a task instance together with
/// its input payload. The payload is opaque to the scheduling core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobInstance {
    pub task_instance: TaskInstanceId,
    pub job_type: JobType,
    /// Index of this job's stage in the owning task pipeline.
    pub stage: usize,
    pub input: serde_json::Value,
}

impl JobInstance {
    pub fn new(
        task_instance: TaskInstanceId,
        job_type: JobType,
        stage: usize,
        input: serde_json::Value,
    ) -> Self {
        JobInstance {
            task_instance: task_instance,
            job_type: job_type,
            stage: stage,
            input: input,
        }
    }
}

/// The terminal result of executing one job body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        match *self {
            JobOutcome::Success(_) => true,
            JobOutcome::Failure(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_equality_requires_both_fields() {
        let a = JobType::new("scale", 3);
        let b = JobType::new("scale", 4);
        let c = JobType::new("sharpen", 3);

        assert_eq!(a, JobType::new("scale", 3));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_job_type_ordering_uses_priority() {
        let low = JobType::new("zzz", 1);
        let high = JobType::new("aaa", 7);

        assert!(low < high);
        assert!(high > low);
    }

    #[test]
    fn test_job_type_ordering_tie_break_is_stable() {
        let a = JobType::new("aaa", 5);
        let b = JobType::new("bbb", 5);

        assert_eq!(a.cmp(&b), Ordering::Less);
        assert_eq!(b.cmp(&a), Ordering::Greater);
    }

    #[test]
    fn test_outcome_is_success() {
        assert!(JobOutcome::Success(json!(1)).is_success());
        assert!(!JobOutcome::Failure("boom".to_owned()).is_success());
    }
}
