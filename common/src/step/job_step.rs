// Job step: a step that delegates its whole unit of work to a nested job
//
// The parameters used for the nested job are cached in the step execution
// context on the first attempt, so a restart re-attempts the same nested
// job instance instead of starting a new one.

use super::extractor::{DefaultJobParametersExtractor, JobParametersExtractor};
use super::Step;
use crate::errors::{ConfigurationError, StepError};
use crate::job::Job;
use crate::launch::JobLauncher;
use crate::models::{JobParameters, StepExecution};
use crate::telemetry;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Context key recording the implementation type of the step
pub const STEP_TYPE_KEY: &str = "batch.stepType";

/// Context key under which the nested job parameters are cached for restarts
pub const JOB_PARAMETERS_KEY: &str = "batch.jobStep.jobParameters";

/// A step that runs a nested job through a launcher and fails if the nested
/// job does not complete. Usable as the worker of a partitioned execution by
/// giving it an extractor that derives partition-specific parameters.
pub struct JobStep {
    name: String,
    job: Arc<dyn Job>,
    launcher: Arc<dyn JobLauncher>,
    extractor: Arc<dyn JobParametersExtractor>,
}

impl std::fmt::Debug for JobStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStep")
            .field("name", &self.name)
            .field("job", &self.job.name())
            .finish_non_exhaustive()
    }
}

impl JobStep {
    pub fn builder(name: impl Into<String>) -> JobStepBuilder {
        JobStepBuilder::new(name)
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// Reuse cached parameters if present, otherwise extract and cache them
    fn resolve_parameters(
        &self,
        step_execution: &mut StepExecution,
    ) -> Result<JobParameters, StepError> {
        if let Some(cached) = step_execution
            .execution_context
            .get_as::<JobParameters>(JOB_PARAMETERS_KEY)?
        {
            info!(parameters = %cached, "Reusing job parameters cached by a previous attempt");
            return Ok(cached);
        }

        let parameters = self
            .extractor
            .get_job_parameters(self.job.as_ref(), step_execution)?;
        step_execution
            .execution_context
            .put(JOB_PARAMETERS_KEY, &parameters)?;

        debug!(parameters = %parameters, "Job parameters extracted and cached");
        Ok(parameters)
    }
}

#[async_trait]
impl Step for JobStep {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, step_execution), fields(step_name = %self.name, job_name = %self.job.name()))]
    async fn execute(&self, step_execution: &mut StepExecution) -> Result<(), StepError> {
        step_execution
            .execution_context
            .put(STEP_TYPE_KEY, std::any::type_name::<Self>())?;

        let parameters = self.resolve_parameters(step_execution)?;

        let job_execution = self.launcher.run(self.job.clone(), parameters).await?;

        if job_execution.status.is_unsuccessful() {
            warn!(
                job_execution_id = %job_execution.id,
                status = %job_execution.status,
                "Delegate job was unsuccessful"
            );
            telemetry::record_delegation_failure(&self.name, &job_execution.status);
            return Err(StepError::UnexpectedJobExecution(format!(
                "Step failure: the delegate Job '{}' finished with status {} in JobStep '{}'",
                job_execution.job_name(),
                job_execution.status,
                self.name
            )));
        }

        info!(job_execution_id = %job_execution.id, "Delegate job completed");
        Ok(())
    }
}

/// Builder for JobStep; `build` validates that the collaborators are set
pub struct JobStepBuilder {
    name: String,
    job: Option<Arc<dyn Job>>,
    launcher: Option<Arc<dyn JobLauncher>>,
    extractor: Arc<dyn JobParametersExtractor>,
}

impl JobStepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            job: None,
            launcher: None,
            extractor: Arc::new(DefaultJobParametersExtractor::default()),
        }
    }

    /// The job to delegate to
    pub fn job(mut self, job: Arc<dyn Job>) -> Self {
        self.job = Some(job);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn JobLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Strategy used to derive the nested job parameters. Defaults to
    /// copying the enclosing job's parameters.
    pub fn parameters_extractor(mut self, extractor: Arc<dyn JobParametersExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn build(self) -> Result<JobStep, ConfigurationError> {
        let launcher = self.launcher.ok_or_else(|| ConfigurationError::MissingLauncher {
            step: self.name.clone(),
        })?;
        let job = self.job.ok_or_else(|| ConfigurationError::MissingJob {
            step: self.name.clone(),
        })?;

        Ok(JobStep {
            name: self.name,
            job,
            launcher,
            extractor: self.extractor,
        })
    }
}
