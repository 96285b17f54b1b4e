// Error handling framework
// One enum per concern; the step-level enum wraps collaborator errors transparently

use thiserror::Error;

/// Setup errors, raised before any execution is attempted
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("A Job must be provided for step '{step}'")]
    MissingJob { step: String },

    #[error("A JobLauncher must be provided for step '{step}'")]
    MissingLauncher { step: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Execution context (de)serialization errors
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to serialize value for key '{key}': {reason}")]
    Serialization { key: String, reason: String },

    #[error("Failed to deserialize value for key '{key}': {reason}")]
    Deserialization { key: String, reason: String },
}

/// Job parameter extraction errors
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Value under key '{key}' cannot be used as a job parameter: {value}")]
    UnsupportedValue { key: String, value: String },

    #[error("Job parameter extraction failed: {0}")]
    Failed(String),
}

/// Job repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("An execution of job '{job_name}' with key {job_key} is already running")]
    ExecutionAlreadyRunning { job_name: String, job_key: String },

    #[error("The instance of job '{job_name}' with key {job_key} already completed")]
    InstanceAlreadyComplete { job_name: String, job_key: String },

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Job launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("A job execution for job '{job_name}' with key {job_key} is already running")]
    AlreadyRunning { job_name: String, job_key: String },

    #[error("A job instance already exists and is complete for job '{job_name}' with key {job_key}")]
    InstanceAlreadyComplete { job_name: String, job_key: String },

    #[error("Job '{job_name}' is not restartable")]
    NotRestartable { job_name: String },

    #[error("Job execution was interrupted: {0}")]
    Interrupted(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LaunchError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ExecutionAlreadyRunning { job_name, job_key } => {
                LaunchError::AlreadyRunning { job_name, job_key }
            }
            RepositoryError::InstanceAlreadyComplete { job_name, job_key } => {
                LaunchError::InstanceAlreadyComplete { job_name, job_key }
            }
            other => LaunchError::Repository(other),
        }
    }
}

/// Chunk processing errors
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Item read failed: {0}")]
    Read(String),

    #[error("Item processing failed: {0}")]
    Process(String),

    #[error("Item write failed: {0}")]
    Write(String),
}

/// Errors surfaced by a step to the step skeleton
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Unexpected job execution: {0}")]
    UnexpectedJobExecution(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("Step failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_step() {
        let err = ConfigurationError::MissingLauncher {
            step: "delegate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "A JobLauncher must be provided for step 'delegate'"
        );
    }

    #[test]
    fn test_launch_error_surfaces_unmodified_through_step_error() {
        let launch = LaunchError::NotRestartable {
            job_name: "nightly".to_string(),
        };
        let expected = launch.to_string();
        let err: StepError = launch.into();
        assert_eq!(err.to_string(), expected);
        assert!(matches!(
            err,
            StepError::Launch(LaunchError::NotRestartable { .. })
        ));
    }

    #[test]
    fn test_repository_conflict_maps_to_already_running() {
        let err: LaunchError = RepositoryError::ExecutionAlreadyRunning {
            job_name: "nightly".to_string(),
            job_key: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, LaunchError::AlreadyRunning { .. }));

        let err: LaunchError = RepositoryError::InstanceAlreadyComplete {
            job_name: "nightly".to_string(),
            job_key: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, LaunchError::InstanceAlreadyComplete { .. }));
    }

    #[test]
    fn test_unexpected_job_execution_is_distinct() {
        let err = StepError::UnexpectedJobExecution("delegate failed".to_string());
        assert!(err.to_string().starts_with("Unexpected job execution"));
    }
}
