// Job parameter extraction strategies for the job-delegating step

use crate::errors::ExtractionError;
use crate::job::Job;
use crate::models::{
    JobParameter, JobParameters, JobParametersBuilder, ParameterValue, StepExecution,
};

/// Strategy deriving the parameters of a nested job from the step execution.
///
/// Implementations must be deterministic for a given step execution; the
/// job step caches the first result and reuses it on restart.
pub trait JobParametersExtractor: Send + Sync {
    fn get_job_parameters(
        &self,
        job: &dyn Job,
        step_execution: &StepExecution,
    ) -> Result<JobParameters, ExtractionError>;
}

impl<F> JobParametersExtractor for F
where
    F: Fn(&dyn Job, &StepExecution) -> Result<JobParameters, ExtractionError> + Send + Sync,
{
    fn get_job_parameters(
        &self,
        job: &dyn Job,
        step_execution: &StepExecution,
    ) -> Result<JobParameters, ExtractionError> {
        self(job, step_execution)
    }
}

/// Default extractor: copies the enclosing job's parameters, optionally
/// adding values for a set of keys found in the step execution context or
/// in the enclosing job's parameters.
#[derive(Debug, Clone)]
pub struct DefaultJobParametersExtractor {
    keys: Vec<String>,
    use_all_parent_parameters: bool,
}

impl Default for DefaultJobParametersExtractor {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            use_all_parent_parameters: true,
        }
    }
}

impl DefaultJobParametersExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys to pull into the nested job parameters
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn use_all_parent_parameters(mut self, use_all: bool) -> Self {
        self.use_all_parent_parameters = use_all;
        self
    }
}

impl JobParametersExtractor for DefaultJobParametersExtractor {
    fn get_job_parameters(
        &self,
        _job: &dyn Job,
        step_execution: &StepExecution,
    ) -> Result<JobParameters, ExtractionError> {
        let parent = &step_execution.job_parameters;
        let mut builder = if self.use_all_parent_parameters {
            JobParametersBuilder::from_parameters(parent)
        } else {
            JobParametersBuilder::default()
        };

        for key in &self.keys {
            if let Some(value) = step_execution.execution_context.get(key) {
                let value = to_parameter_value(key, value)?;
                builder = builder.add_parameter(key.clone(), JobParameter::new(value));
            } else if let Some(parameter) = parent.get(key) {
                builder = builder.add_parameter(key.clone(), parameter.clone());
            }
        }

        Ok(builder.build())
    }
}

fn to_parameter_value(key: &str, value: &serde_json::Value) -> Result<ParameterValue, ExtractionError> {
    match value {
        serde_json::Value::String(s) => Ok(ParameterValue::String(s.clone())),
        // integers outside i64 would only survive as a rounded double
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(long), _) => Ok(ParameterValue::Long(long)),
            (None, Some(double)) if n.is_f64() => Ok(ParameterValue::Double(double)),
            _ => Err(ExtractionError::UnsupportedValue {
                key: key.to_string(),
                value: n.to_string(),
            }),
        },
        serde_json::Value::Bool(b) => Ok(ParameterValue::String(b.to_string())),
        other => Err(ExtractionError::UnsupportedValue {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}
