//! Jobs and job tasks: durable handles for out-of-process executions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sdm_core::redact::redact;

/// The lifecycle state of a job task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTaskState {
    /// Created but not yet picked up.
    Created,
    /// A worker is executing the task.
    Running,
    /// The task finished successfully.
    Success,
    /// The task failed.
    Failed,
}

/// One task of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTask {
    /// Task id within the job.
    pub id: String,
    /// Name of the registered task executor.
    pub name: String,
    /// Serialized task parameters.
    #[serde(default)]
    pub parameters: Option<String>,
    /// Current task state.
    pub state: JobTaskState,
    /// Progress or failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A durable handle for an isolated out-of-process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job id assigned by the store.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Registration owning the job.
    pub owner: String,
    /// Serialized trigger payload.
    #[serde(default)]
    pub data: Option<String>,
    /// The tasks making up the job.
    pub tasks: Vec<JobTask>,
}

/// Errors raised while executing a job task.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobTaskError {
    /// No executor is registered for the task name.
    #[error("no executor registered for task {name}")]
    UnknownTask {
        /// The unresolved task name.
        name: String,
    },

    /// The executor failed.
    #[error("{0}")]
    Execution(String),
}

/// Executes one kind of job task.
#[async_trait]
pub trait JobTaskExecutor: Send + Sync {
    /// The task name this executor handles.
    fn name(&self) -> &str;

    /// Runs the task. The returned message is surfaced on the task.
    async fn run(&self, task: &JobTask, job: &Job) -> Result<Option<String>, JobTaskError>;
}

/// Registry of job-task executors, keyed by task name.
#[derive(Default)]
pub struct JobTaskRegistry {
    executors: HashMap<String, Arc<dyn JobTaskExecutor>>,
}

impl JobTaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own name.
    pub fn register(&mut self, executor: Arc<dyn JobTaskExecutor>) {
        self.executors
            .insert(executor.name().to_string(), executor);
    }

    /// Runs `task`, returning the resulting state and message.
    ///
    /// Executor failures become `Failed` with a redacted message; they are
    /// not errors at the event-handling layer.
    pub async fn run(&self, task: &JobTask, job: &Job) -> (JobTaskState, Option<String>) {
        let Some(executor) = self.executors.get(&task.name) else {
            return (
                JobTaskState::Failed,
                Some(format!("no executor registered for task {}", task.name)),
            );
        };
        match executor.run(task, job).await {
            Ok(message) => (JobTaskState::Success, message),
            Err(err) => (JobTaskState::Failed, Some(redact(&err.to_string()))),
        }
    }
}
