// Worker binary entry point
// Runs a partitioned parent job whose steps each delegate to a nested job,
// restarting the parent once if the first attempt fails

mod partition;

use anyhow::Result;
use common::config::Settings;
use common::job::{Job, SimpleJob};
use common::launch::{JobLauncher, SimpleJobLauncher};
use common::models::{BatchStatus, JobExecution, JobParameters};
use common::repository::{InMemoryJobRepository, JobRepository};
use common::step::JobStep;
use common::telemetry;
use partition::{partition_extractor, PartitionStep};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const PARENT_JOB: &str = "partitionedJob";
const NESTED_JOB: &str = "partitionJob";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings.validate()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        partitions = settings.worker.partitions,
        items_per_partition = settings.worker.items_per_partition,
        chunk_size = settings.worker.chunk_size,
        task_executor = ?settings.launcher.task_executor,
        "Starting batch worker"
    );

    let repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let launcher: Arc<dyn JobLauncher> = Arc::new(
        SimpleJobLauncher::new(repository.clone())
            .with_task_executor(settings.launcher.task_executor),
    );

    let parent = build_parent_job(&settings, repository.clone(), launcher.clone())?;
    let parameters = JobParameters::builder()
        .add_string("runId", Uuid::new_v4().to_string())
        .build();

    let mut execution = launcher.run(parent.clone(), parameters.clone()).await?;
    if execution.status != BatchStatus::Completed {
        warn!(
            status = %execution.status,
            failures = ?execution.failure_messages,
            "First attempt did not complete, restarting with the same parameters"
        );
        execution = launcher.run(parent, parameters).await?;
    }

    log_summary(repository.as_ref(), &execution).await?;

    if execution.status != BatchStatus::Completed {
        error!(status = %execution.status, "Batch run did not complete");
        anyhow::bail!("job '{}' finished with status {}", PARENT_JOB, execution.status);
    }

    info!("Batch worker finished");
    Ok(())
}

/// Parent job with one delegating step per partition, all sharing one nested
/// job definition
fn build_parent_job(
    settings: &Settings,
    repository: Arc<dyn JobRepository>,
    launcher: Arc<dyn JobLauncher>,
) -> Result<Arc<dyn Job>> {
    let worker = &settings.worker;
    let last_partition = i64::from(worker.partitions) - 1;
    let fail_partition = worker.fail_first_attempt.then_some(last_partition);

    let nested: Arc<dyn Job> = Arc::new(
        SimpleJob::new(NESTED_JOB, repository.clone()).with_step(Arc::new(PartitionStep::new(
            worker.chunk_size,
            fail_partition,
        ))),
    );

    let mut parent = SimpleJob::new(PARENT_JOB, repository);
    for partition in 0..i64::from(worker.partitions) {
        let step = JobStep::builder(format!("partition{}", partition))
            .job(nested.clone())
            .launcher(launcher.clone())
            .parameters_extractor(Arc::new(partition_extractor(
                partition,
                i64::from(worker.items_per_partition),
            )))
            .build()?;
        parent = parent.with_step(Arc::new(step));
    }

    Ok(Arc::new(parent))
}

async fn log_summary(repository: &dyn JobRepository, execution: &JobExecution) -> Result<()> {
    for step in &execution.step_executions {
        info!(
            step_name = %step.step_name,
            status = %step.status,
            failures = ?step.failure_messages,
            "Parent step"
        );
    }

    for instance in repository.job_instances(NESTED_JOB).await? {
        let executions = repository.job_executions(instance.id).await?;
        let statuses: Vec<String> = executions.iter().map(|e| e.status.to_string()).collect();
        info!(
            instance_id = %instance.id,
            job_key = %instance.job_key,
            executions = executions.len(),
            statuses = ?statuses,
            "Nested job instance"
        );
    }
    Ok(())
}
