// Job repository: persistence contract for job instances and executions
// The in-memory implementation stores clones so reads behave like reloads

use crate::errors::RepositoryError;
use crate::models::{BatchStatus, JobExecution, JobInstance, JobParameters, StepExecution};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Repository trait for job instances and their executions
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a new execution for the instance identified by `job_name` and
    /// the identifying parameters, creating the instance if needed.
    /// Fails if an execution of that instance is still running or one
    /// already completed; the check and the insert are atomic.
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError>;

    /// Persist the current state of an execution, including its step executions
    async fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    /// Most recent execution of the instance for `job_name` and parameters
    async fn last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, RepositoryError>;

    async fn job_instances(&self, job_name: &str) -> Result<Vec<JobInstance>, RepositoryError>;

    /// All executions of an instance, oldest first
    async fn job_executions(&self, instance_id: Uuid) -> Result<Vec<JobExecution>, RepositoryError>;

    /// Most recent execution of a step across all executions of an instance
    async fn last_step_execution(
        &self,
        instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError>;
}

#[derive(Default)]
struct RepositoryState {
    // (job_name, job_key) -> instance
    instances: HashMap<(String, String), JobInstance>,
    // instance id -> executions, oldest first
    executions: HashMap<Uuid, Vec<JobExecution>>,
}

/// In-memory job repository
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    #[instrument(skip(self, parameters), fields(job_name = %job_name))]
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, RepositoryError> {
        let job_key = parameters.job_key();
        let mut state = self.state.write().await;

        let instance = state
            .instances
            .entry((job_name.to_string(), job_key.clone()))
            .or_insert_with(|| JobInstance::new(job_name, parameters))
            .clone();

        let executions = state.executions.entry(instance.id).or_default();
        if executions.iter().any(JobExecution::is_running) {
            return Err(RepositoryError::ExecutionAlreadyRunning {
                job_name: job_name.to_string(),
                job_key,
            });
        }
        if executions.iter().any(|e| e.status == BatchStatus::Completed) {
            return Err(RepositoryError::InstanceAlreadyComplete {
                job_name: job_name.to_string(),
                job_key,
            });
        }

        let execution = JobExecution::new(instance, parameters.clone());
        executions.push(execution.clone());

        debug!(
            execution_id = %execution.id,
            instance_id = %execution.instance.id,
            attempt = executions.len(),
            "Job execution created"
        );
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state
            .executions
            .get_mut(&execution.instance.id)
            .and_then(|executions| executions.iter_mut().find(|e| e.id == execution.id))
            .ok_or_else(|| RepositoryError::NotFound(format!("job execution {}", execution.id)))?;

        *stored = execution.clone();
        Ok(())
    }

    async fn last_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobExecution>, RepositoryError> {
        let state = self.state.read().await;
        let key = (job_name.to_string(), parameters.job_key());

        Ok(state
            .instances
            .get(&key)
            .and_then(|instance| state.executions.get(&instance.id))
            .and_then(|executions| executions.last())
            .cloned())
    }

    async fn job_instances(&self, job_name: &str) -> Result<Vec<JobInstance>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|instance| instance.job_name == job_name)
            .cloned()
            .collect())
    }

    async fn job_executions(&self, instance_id: Uuid) -> Result<Vec<JobExecution>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .get(&instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_step_execution(
        &self,
        instance_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepExecution>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.executions.get(&instance_id).and_then(|executions| {
            executions
                .iter()
                .rev()
                .find_map(|execution| execution.step_execution(step_name))
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(run_id: &str) -> JobParameters {
        JobParameters::builder().add_string("runId", run_id).build()
    }

    #[tokio::test]
    async fn test_same_parameters_reuse_instance() {
        let repository = InMemoryJobRepository::new();

        let mut first = repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();
        first.status = BatchStatus::Failed;
        repository.update_job_execution(&first).await.unwrap();

        let second = repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();

        assert_eq!(first.instance, second.instance);
        assert_ne!(first.id, second.id);
        assert_eq!(repository.job_instances("import").await.unwrap().len(), 1);
        assert_eq!(
            repository
                .job_executions(first.instance.id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_running_execution_blocks_new_execution() {
        let repository = InMemoryJobRepository::new();
        repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();

        let result = repository
            .create_job_execution("import", &parameters("42"))
            .await;
        assert!(matches!(
            result,
            Err(RepositoryError::ExecutionAlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_instance_blocks_new_execution() {
        let repository = InMemoryJobRepository::new();
        let mut first = repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();
        first.status = BatchStatus::Completed;
        repository.update_job_execution(&first).await.unwrap();

        let result = repository
            .create_job_execution("import", &parameters("42"))
            .await;
        assert!(matches!(
            result,
            Err(RepositoryError::InstanceAlreadyComplete { ref job_name, .. }) if job_name == "import"
        ));
        assert_eq!(
            repository
                .job_executions(first.instance.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_unknown_execution_fails() {
        let repository = InMemoryJobRepository::new();
        let params = parameters("42");
        let execution = JobExecution::new(JobInstance::new("import", &params), params);

        let result = repository.update_job_execution(&execution).await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_last_step_execution_spans_executions() {
        let repository = InMemoryJobRepository::new();

        let mut first = repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();
        let mut step = first.create_step_execution("load");
        step.status = BatchStatus::Completed;
        first.step_executions.push(step);
        first.status = BatchStatus::Failed;
        repository.update_job_execution(&first).await.unwrap();

        let second = repository
            .create_job_execution("import", &parameters("42"))
            .await
            .unwrap();
        assert!(second.step_executions.is_empty());

        let last = repository
            .last_step_execution(second.instance.id, "load")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.status, BatchStatus::Completed);
        assert_eq!(last.job_execution_id, first.id);
    }
}
