// Job launcher: starts a job run and hands back its terminal execution

use crate::errors::LaunchError;
use crate::job::Job;
use crate::models::{BatchStatus, ExitStatus, JobExecution, JobParameters};
use crate::repository::JobRepository;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Launcher contract: run `job` with `parameters` and return the execution
/// once it reached a terminal status. Implementations guarantee at most one
/// live execution per (job, parameters) pair.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn run(
        &self,
        job: Arc<dyn Job>,
        parameters: JobParameters,
    ) -> Result<JobExecution, LaunchError>;
}

/// Where the launcher runs the job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskExecutor {
    /// Await the job on the caller's task
    #[default]
    Inline,
    /// Run the job on its own tokio task and wait for it to finish
    Spawned,
}

/// Launcher backed by a job repository
pub struct SimpleJobLauncher {
    repository: Arc<dyn JobRepository>,
    task_executor: TaskExecutor,
}

impl SimpleJobLauncher {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            task_executor: TaskExecutor::Inline,
        }
    }

    pub fn with_task_executor(mut self, task_executor: TaskExecutor) -> Self {
        self.task_executor = task_executor;
        self
    }

    /// Reject launches of a non-restartable instance. Running and completed
    /// instances are rejected atomically by `create_job_execution`.
    async fn check_previous(
        &self,
        job: &dyn Job,
        parameters: &JobParameters,
    ) -> Result<(), LaunchError> {
        let Some(last) = self
            .repository
            .last_job_execution(job.name(), parameters)
            .await?
        else {
            return Ok(());
        };

        if last.is_running() || last.status == BatchStatus::Completed {
            // left to create_job_execution
            return Ok(());
        }
        if !job.is_restartable() {
            return Err(LaunchError::NotRestartable {
                job_name: job.name().to_string(),
            });
        }

        info!(
            previous_execution_id = %last.id,
            previous_status = %last.status,
            "Restarting job instance"
        );
        Ok(())
    }

    async fn execute_spawned(
        &self,
        job: Arc<dyn Job>,
        execution: JobExecution,
    ) -> Result<JobExecution, LaunchError> {
        let mut fallback = execution.clone();
        let handle = tokio::spawn(async move {
            let mut execution = execution;
            job.execute(&mut execution).await;
            execution
        });

        match handle.await {
            Ok(execution) => Ok(execution),
            Err(e) => {
                error!(error = %e, execution_id = %fallback.id, "Job task did not finish");
                fallback.status = BatchStatus::Failed;
                fallback.exit_status = ExitStatus::failed().with_description(e.to_string());
                fallback.add_failure_message(e.to_string());
                fallback.completed_at = Some(Utc::now());
                self.repository.update_job_execution(&fallback).await?;
                Err(LaunchError::Interrupted(format!(
                    "execution {} of job '{}': {}",
                    fallback.id,
                    fallback.job_name(),
                    e
                )))
            }
        }
    }
}

#[async_trait]
impl JobLauncher for SimpleJobLauncher {
    #[instrument(skip(self, job, parameters), fields(job_name = %job.name(), parameters = %parameters))]
    async fn run(
        &self,
        job: Arc<dyn Job>,
        parameters: JobParameters,
    ) -> Result<JobExecution, LaunchError> {
        self.check_previous(job.as_ref(), &parameters).await?;

        let execution = self
            .repository
            .create_job_execution(job.name(), &parameters)
            .await?;

        info!(
            execution_id = %execution.id,
            instance_id = %execution.instance.id,
            task_executor = ?self.task_executor,
            "Launching job"
        );
        telemetry::record_job_launch(job.name());

        let execution = match self.task_executor {
            TaskExecutor::Inline => {
                let mut execution = execution;
                job.execute(&mut execution).await;
                execution
            }
            TaskExecutor::Spawned => self.execute_spawned(job.clone(), execution).await?,
        };
        self.repository.update_job_execution(&execution).await?;

        telemetry::record_job_completion(job.name(), &execution.status);
        info!(
            execution_id = %execution.id,
            status = %execution.status,
            "Job launch finished"
        );
        Ok(execution)
    }
}
