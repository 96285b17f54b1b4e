// Step module: step contract, execution skeleton and the job-delegating step

pub mod extractor;
pub mod job_step;

pub use extractor::{DefaultJobParametersExtractor, JobParametersExtractor};
pub use job_step::{JobStep, JobStepBuilder, JOB_PARAMETERS_KEY, STEP_TYPE_KEY};

use crate::errors::StepError;
use crate::models::{BatchStatus, ExitStatus, StepExecution};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument};

/// Step trait defines one unit of a job's execution graph
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the step runs again on restart even if it completed before
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    /// Do the work of the step. Status bookkeeping is done by `run_step`.
    async fn execute(&self, step_execution: &mut StepExecution) -> Result<(), StepError>;
}

/// Run a step and record its outcome on the step execution.
///
/// The error message is appended to `failure_messages`, so a failed
/// delegate and a failure of the delegation itself stay distinguishable.
#[instrument(skip(step, step_execution), fields(step_name = %step.name(), step_execution_id = %step_execution.id))]
pub async fn run_step(step: &dyn Step, step_execution: &mut StepExecution) -> Result<(), StepError> {
    step_execution.status = BatchStatus::Started;
    step_execution.exit_status = ExitStatus::executing();
    step_execution.started_at = Some(Utc::now());

    info!("Executing step");

    let result = step.execute(step_execution).await;
    step_execution.completed_at = Some(Utc::now());

    match &result {
        Ok(()) => {
            step_execution.status = BatchStatus::Completed;
            step_execution.exit_status = ExitStatus::completed();
            info!("Step completed successfully");
        }
        Err(e) => {
            error!(error = %e, "Step execution failed");
            step_execution.status = BatchStatus::Failed;
            step_execution.exit_status = ExitStatus::failed().with_description(e.to_string());
            step_execution.add_failure_message(e.to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobExecution, JobInstance, JobParameters};

    struct OutcomeStep {
        fail: bool,
    }

    #[async_trait]
    impl Step for OutcomeStep {
        fn name(&self) -> &str {
            "outcome"
        }

        async fn execute(&self, step_execution: &mut StepExecution) -> Result<(), StepError> {
            step_execution.execution_context.put("touched", &true)?;
            if self.fail {
                return Err(StepError::Failed("boom".to_string()));
            }
            Ok(())
        }
    }

    fn step_execution() -> StepExecution {
        let parameters = JobParameters::new();
        JobExecution::new(JobInstance::new("job", &parameters), parameters)
            .create_step_execution("outcome")
    }

    #[tokio::test]
    async fn test_successful_step_is_completed() {
        let mut execution = step_execution();
        run_step(&OutcomeStep { fail: false }, &mut execution)
            .await
            .unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code, ExitStatus::COMPLETED);
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_records_message() {
        let mut execution = step_execution();
        let result = run_step(&OutcomeStep { fail: true }, &mut execution).await;

        assert!(result.is_err());
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.exit_status.exit_code, ExitStatus::FAILED);
        assert_eq!(execution.failure_messages, vec!["Step failed: boom"]);
        // context changes made before the failure are kept
        assert!(execution.execution_context.contains_key("touched"));
    }
}
