// Job module: job contract and a sequential, restart-aware implementation

use crate::errors::RepositoryError;
use crate::models::{BatchStatus, ExitStatus, JobExecution};
use crate::repository::JobRepository;
use crate::step::{run_step, Step};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Job trait: a named, restartable sequence of steps
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn is_restartable(&self) -> bool {
        true
    }

    /// Run the job. All failures are recorded on the execution; when this
    /// returns the execution is in a terminal status.
    async fn execute(&self, execution: &mut JobExecution);
}

/// SimpleJob runs its steps in order and stops at the first failure.
///
/// On a restart of the same job instance, steps that already completed are
/// skipped (unless they allow start-if-complete) and a step that did not
/// complete resumes with the execution context of its previous attempt.
pub struct SimpleJob {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    repository: Arc<dyn JobRepository>,
    restartable: bool,
}

impl SimpleJob {
    pub fn new(name: impl Into<String>, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            repository,
            restartable: true,
        }
    }

    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run the steps; returns the final status and exit status
    async fn run_steps(&self, execution: &mut JobExecution) -> (BatchStatus, ExitStatus) {
        for step in &self.steps {
            let previous = match self
                .repository
                .last_step_execution(execution.instance.id, step.name())
                .await
            {
                Ok(previous) => previous,
                Err(e) => {
                    error!(step_name = %step.name(), error = %e, "Failed to load previous step execution");
                    execution.add_failure_message(e.to_string());
                    return (BatchStatus::Failed, ExitStatus::failed());
                }
            };

            let mut step_execution = execution.create_step_execution(step.name());
            if let Some(previous) = previous {
                if previous.status == BatchStatus::Completed && !step.allow_start_if_complete() {
                    info!(step_name = %step.name(), "Step already complete, skipping");
                    continue;
                }
                if previous.status != BatchStatus::Completed {
                    info!(step_name = %step.name(), "Restarting step with previous execution context");
                    step_execution.execution_context = previous.execution_context;
                }
            }

            let outcome = run_step(step.as_ref(), &mut step_execution).await;
            execution.step_executions.push(step_execution);

            // the step's context is only restart-safe once it is stored
            if let Err(e) = self.persist(execution).await {
                execution.add_failure_message(e.to_string());
                return (BatchStatus::Failed, ExitStatus::failed());
            }
            if outcome.is_err() {
                return (BatchStatus::Failed, ExitStatus::failed());
            }
        }

        (BatchStatus::Completed, ExitStatus::completed())
    }

    async fn persist(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        self.repository
            .update_job_execution(execution)
            .await
            .inspect_err(|e| {
                error!(error = %e, execution_id = %execution.id, "Failed to persist job execution");
            })
    }
}

#[async_trait]
impl Job for SimpleJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    #[instrument(skip(self, execution), fields(job_name = %self.name, execution_id = %execution.id))]
    async fn execute(&self, execution: &mut JobExecution) {
        info!(
            step_count = self.steps.len(),
            parameters = %execution.parameters,
            "Executing job steps sequentially"
        );

        execution.status = BatchStatus::Started;
        execution.exit_status = ExitStatus::executing();
        execution.started_at = Some(Utc::now());

        let (status, exit_status) = match self.persist(execution).await {
            Ok(()) => self.run_steps(execution).await,
            Err(e) => {
                execution.add_failure_message(e.to_string());
                (BatchStatus::Failed, ExitStatus::failed())
            }
        };

        execution.status = status;
        execution.exit_status = exit_status;
        execution.completed_at = Some(Utc::now());
        if let Err(e) = self.persist(execution).await {
            execution.status = BatchStatus::Failed;
            execution.exit_status = ExitStatus::failed();
            execution.add_failure_message(e.to_string());
        }

        info!(status = %execution.status, "Job execution finished");
    }
}
