// Integration tests for job delegation
// These tests run a parent job whose steps delegate to a nested job through
// a real launcher and repository, including restarts after failure

use async_trait::async_trait;
use common::errors::{ExtractionError, StepError};
use common::job::{Job, SimpleJob};
use common::launch::{JobLauncher, SimpleJobLauncher, TaskExecutor};
use common::models::{
    BatchStatus, JobExecution, JobParameters, JobParametersBuilder, StepExecution,
};
use common::repository::{InMemoryJobRepository, JobRepository};
use common::step::{JobStep, Step, JOB_PARAMETERS_KEY};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PARENT_JOB: &str = "parent";
const NESTED_JOB: &str = "nested";

/// Nested job step failing the first attempt of one partition
struct FailOnceStep {
    fail_partition: i64,
    failed: Mutex<HashSet<i64>>,
    runs: AtomicUsize,
}

impl FailOnceStep {
    fn new(fail_partition: i64) -> Arc<Self> {
        Arc::new(Self {
            fail_partition,
            failed: Mutex::new(HashSet::new()),
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Step for FailOnceStep {
    fn name(&self) -> &str {
        "work"
    }

    async fn execute(&self, step_execution: &mut StepExecution) -> Result<(), StepError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let partition = step_execution
            .job_parameters
            .get_long("partition")
            .ok_or_else(|| StepError::Failed("no partition".to_string()))?;

        if partition == self.fail_partition && self.failed.lock().unwrap().insert(partition) {
            return Err(StepError::Failed(format!("partition {} broke", partition)));
        }
        Ok(())
    }
}

fn partition_extractor(
    partition: i64,
) -> impl Fn(&dyn Job, &StepExecution) -> Result<JobParameters, ExtractionError> + Send + Sync {
    move |_: &dyn Job, step_execution: &StepExecution| {
        Ok(JobParametersBuilder::from_parameters(&step_execution.job_parameters)
            .add_long("partition", partition)
            .build())
    }
}

struct Fixture {
    repository: Arc<InMemoryJobRepository>,
    launcher: Arc<dyn JobLauncher>,
    parent: Arc<dyn Job>,
    nested_step: Arc<FailOnceStep>,
}

fn fixture(partitions: i64, fail_partition: i64, task_executor: TaskExecutor) -> Fixture {
    let repository = Arc::new(InMemoryJobRepository::new());
    let launcher: Arc<dyn JobLauncher> = Arc::new(
        SimpleJobLauncher::new(repository.clone()).with_task_executor(task_executor),
    );

    let nested_step = FailOnceStep::new(fail_partition);
    let nested: Arc<dyn Job> =
        Arc::new(SimpleJob::new(NESTED_JOB, repository.clone()).with_step(nested_step.clone()));

    let mut parent = SimpleJob::new(PARENT_JOB, repository.clone());
    for partition in 0..partitions {
        let step = JobStep::builder(format!("partition{}", partition))
            .job(nested.clone())
            .launcher(launcher.clone())
            .parameters_extractor(Arc::new(partition_extractor(partition)))
            .build()
            .expect("job step should build");
        parent = parent.with_step(Arc::new(step));
    }

    Fixture {
        repository,
        launcher,
        parent: Arc::new(parent),
        nested_step,
    }
}

fn run_parameters() -> JobParameters {
    JobParameters::builder().add_string("runId", "42").build()
}

fn cached_parameters(execution: &JobExecution, step_name: &str) -> JobParameters {
    execution
        .step_execution(step_name)
        .expect("step execution recorded")
        .execution_context
        .get_as(JOB_PARAMETERS_KEY)
        .expect("cached parameters deserialize")
        .expect("parameters cached")
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    async fn restart_reuses_nested_instance(task_executor: TaskExecutor) {
        let fx = fixture(3, 1, task_executor);

        let first = fx
            .launcher
            .run(fx.parent.clone(), run_parameters())
            .await
            .unwrap();
        assert_eq!(first.status, BatchStatus::Failed);
        // partition2 never ran
        assert_eq!(first.step_executions.len(), 2);

        let second = fx
            .launcher
            .run(fx.parent.clone(), run_parameters())
            .await
            .unwrap();
        assert_eq!(second.status, BatchStatus::Completed);
        assert_eq!(first.instance, second.instance);

        // partition0 was skipped on restart, partition1 resumed, partition2 ran
        let restarted: Vec<&str> = second
            .step_executions
            .iter()
            .map(|s| s.step_name.as_str())
            .collect();
        assert_eq!(restarted, vec!["partition1", "partition2"]);
        assert_eq!(
            cached_parameters(&first, "partition1"),
            cached_parameters(&second, "partition1")
        );

        // one nested instance per partition, the failed one re-executed
        let instances = fx.repository.job_instances(NESTED_JOB).await.unwrap();
        assert_eq!(instances.len(), 3);
        let mut executions_per_instance = Vec::new();
        for instance in &instances {
            let executions = fx.repository.job_executions(instance.id).await.unwrap();
            executions_per_instance.push(executions.len());
            assert_eq!(executions.last().unwrap().status, BatchStatus::Completed);
        }
        executions_per_instance.sort_unstable();
        assert_eq!(executions_per_instance, vec![1, 1, 2]);
        assert_eq!(fx.nested_step.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_restart_reuses_nested_instance_inline() {
        restart_reuses_nested_instance(TaskExecutor::Inline).await;
    }

    #[tokio::test]
    async fn test_restart_reuses_nested_instance_spawned() {
        restart_reuses_nested_instance(TaskExecutor::Spawned).await;
    }

    #[tokio::test]
    async fn test_delegate_failure_is_recorded_on_parent_step() {
        let fx = fixture(1, 0, TaskExecutor::Inline);

        let execution = fx
            .launcher
            .run(fx.parent.clone(), run_parameters())
            .await
            .unwrap();

        let step = execution.step_execution("partition0").unwrap();
        assert_eq!(step.status, BatchStatus::Failed);
        assert_eq!(step.exit_status.exit_code, "FAILED");
        assert_eq!(step.failure_messages.len(), 1);
        assert!(step.failure_messages[0].contains("delegate Job 'nested'"));
        assert!(step.failure_messages[0].contains("status failed"));
    }

    #[tokio::test]
    async fn test_machinery_failure_is_distinct_from_delegate_failure() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let launcher: Arc<dyn JobLauncher> =
            Arc::new(SimpleJobLauncher::new(repository.clone()));
        let nested: Arc<dyn Job> = Arc::new(
            SimpleJob::new(NESTED_JOB, repository.clone()).with_step(FailOnceStep::new(-1)),
        );

        let broken_extractor =
            |_: &dyn Job, _: &StepExecution| -> Result<JobParameters, ExtractionError> {
                Err(ExtractionError::Failed("partition table unavailable".to_string()))
            };
        let step = JobStep::builder("partition0")
            .job(nested)
            .launcher(launcher.clone())
            .parameters_extractor(Arc::new(broken_extractor))
            .build()
            .unwrap();
        let parent: Arc<dyn Job> =
            Arc::new(SimpleJob::new(PARENT_JOB, repository.clone()).with_step(Arc::new(step)));

        let execution = launcher.run(parent, run_parameters()).await.unwrap();

        assert_eq!(execution.status, BatchStatus::Failed);
        let step = execution.step_execution("partition0").unwrap();
        assert_eq!(
            step.failure_messages,
            vec!["Job parameter extraction failed: partition table unavailable".to_string()]
        );
        assert!(!step.execution_context.contains_key(JOB_PARAMETERS_KEY));
        assert!(repository.job_instances(NESTED_JOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_nested_instance_surfaces_launch_error() {
        let fx = fixture(1, -1, TaskExecutor::Inline);
        let nested_parameters = JobParametersBuilder::from_parameters(&run_parameters())
            .add_long("partition", 0)
            .build();

        // the nested instance the step will ask for is already complete
        let nested = fx
            .repository
            .create_job_execution(NESTED_JOB, &nested_parameters)
            .await
            .unwrap();
        let mut completed = nested.clone();
        completed.status = BatchStatus::Completed;
        fx.repository.update_job_execution(&completed).await.unwrap();

        let execution = fx
            .launcher
            .run(fx.parent.clone(), run_parameters())
            .await
            .unwrap();

        let step = execution.step_execution("partition0").unwrap();
        assert_eq!(step.status, BatchStatus::Failed);
        assert!(step.failure_messages[0].contains("already exists and is complete"));
        assert_eq!(fx.nested_step.runs.load(Ordering::SeqCst), 0);
    }
}
