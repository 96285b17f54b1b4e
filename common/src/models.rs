use crate::context::ExecutionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Job Parameters
// ============================================================================

/// ParameterValue is the typed value of a single job parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    #[serde(serialize_with = "serialize_finite")]
    Double(f64),
    Date(DateTime<Utc>),
}

/// JSON has no NaN or infinity; refusing them here keeps a persisted
/// parameter set readable on restart
fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "non-finite double {} cannot be persisted",
            value
        )));
    }
    serializer.serialize_f64(*value)
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterValue::String(v) => write!(f, "{}", v),
            ParameterValue::Long(v) => write!(f, "{}", v),
            ParameterValue::Double(v) => write!(f, "{}", v),
            ParameterValue::Date(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// JobParameter is a value plus whether it takes part in the job identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    #[serde(default = "default_identifying")]
    pub identifying: bool,
}

fn default_identifying() -> bool {
    true
}

impl JobParameter {
    pub fn new(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: true,
        }
    }

    pub fn non_identifying(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: false,
        }
    }
}

/// JobParameters is the immutable identity and configuration of one job run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Parameters that take part in the job identity
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Stable key identifying a job instance: SHA-256 over the identifying
    /// parameters in key order. Non-identifying parameters never change it.
    pub fn job_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, parameter) in self.parameters.iter().filter(|(_, p)| p.identifying) {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(parameter.value.to_string().as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for JobParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (index, (key, parameter)) in self.parameters.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, parameter.value)?;
        }
        write!(f, "}}")
    }
}

/// Builder for JobParameters
#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.parameters.clone(),
        }
    }

    pub fn add_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_parameter(key, JobParameter::new(ParameterValue::String(value.into())))
    }

    pub fn add_long(self, key: impl Into<String>, value: i64) -> Self {
        self.add_parameter(key, JobParameter::new(ParameterValue::Long(value)))
    }

    pub fn add_double(self, key: impl Into<String>, value: f64) -> Self {
        self.add_parameter(key, JobParameter::new(ParameterValue::Double(value)))
    }

    pub fn add_date(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.add_parameter(key, JobParameter::new(ParameterValue::Date(value)))
    }

    pub fn add_parameter(mut self, key: impl Into<String>, parameter: JobParameter) -> Self {
        self.parameters.insert(key.into(), parameter);
        self
    }

    pub fn add_job_parameters(mut self, parameters: &JobParameters) -> Self {
        for (key, parameter) in &parameters.parameters {
            self.parameters.insert(key.clone(), parameter.clone());
        }
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}

// ============================================================================
// Status Models
// ============================================================================

/// BatchStatus is the lifecycle status of a job or step execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    /// Anything other than a completed run counts as unsuccessful,
    /// including a non-terminal status handed back by a launcher.
    pub fn is_unsuccessful(&self) -> bool {
        *self != BatchStatus::Completed
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Starting => write!(f, "starting"),
            BatchStatus::Started => write!(f, "started"),
            BatchStatus::Stopping => write!(f, "stopping"),
            BatchStatus::Stopped => write!(f, "stopped"),
            BatchStatus::Failed => write!(f, "failed"),
            BatchStatus::Abandoned => write!(f, "abandoned"),
            BatchStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(BatchStatus::Completed),
            "starting" => Ok(BatchStatus::Starting),
            "started" => Ok(BatchStatus::Started),
            "stopping" => Ok(BatchStatus::Stopping),
            "stopped" => Ok(BatchStatus::Stopped),
            "failed" => Ok(BatchStatus::Failed),
            "abandoned" => Ok(BatchStatus::Abandoned),
            "unknown" => Ok(BatchStatus::Unknown),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

/// ExitStatus is the outcome code recorded for a job or step execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

// ============================================================================
// Execution Models
// ============================================================================

/// JobInstance is the logical run of a job, identified by name and job key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    pub job_key: String,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, parameters: &JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            job_key: parameters.job_key(),
        }
    }
}

/// JobExecution is one attempt at running a job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub step_executions: Vec<StepExecution>,
    pub failure_messages: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobExecution {
    /// Create a new execution in Starting status
    pub fn new(instance: JobInstance, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance,
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            step_executions: Vec::new(),
            failure_messages: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Create the next step execution belonging to this job execution
    pub fn create_step_execution(&self, step_name: impl Into<String>) -> StepExecution {
        StepExecution::new(step_name, self)
    }

    pub fn add_failure_message(&mut self, message: impl Into<String>) {
        self.failure_messages.push(message.into());
    }

    /// Latest step execution recorded for a step name
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }
}

/// StepExecution is one run-attempt of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub job_execution_id: Uuid,
    pub job_name: String,
    /// Parameters of the enclosing job execution
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub execution_context: ExecutionContext,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub failure_messages: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(step_name: impl Into<String>, job_execution: &JobExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.into(),
            job_execution_id: job_execution.id,
            job_name: job_execution.job_name().to_string(),
            job_parameters: job_execution.parameters.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            execution_context: ExecutionContext::new(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            failure_messages: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// A fresh contribution for one unit of work in this step
    pub fn create_contribution(&self) -> StepContribution {
        StepContribution::default()
    }

    /// Fold a committed contribution into the step counters
    pub fn apply_contribution(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.commit_count += 1;
        if let Some(exit_status) = &contribution.exit_status {
            self.exit_status = exit_status.clone();
        }
    }

    pub fn add_failure_message(&mut self, message: impl Into<String>) {
        self.failure_messages.push(message.into());
    }
}

/// StepContribution accumulates counts and a proposed exit status for
/// one unit of work. Owned by the caller that commits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContribution {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub exit_status: Option<ExitStatus>,
}

impl StepContribution {
    pub fn increment_read_count(&mut self) {
        self.read_count += 1;
    }

    pub fn increment_write_count(&mut self, count: u64) {
        self.write_count += count;
    }

    pub fn increment_filter_count(&mut self, count: u64) {
        self.filter_count += count;
    }

    pub fn set_exit_status(&mut self, exit_status: ExitStatus) {
        self.exit_status = Some(exit_status);
    }

    /// Total of all item counters
    pub fn item_count(&self) -> u64 {
        self.read_count + self.write_count + self.filter_count
    }
}
