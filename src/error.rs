use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Condition error: {0}")]
    Condition(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Dependency cycle detected at task: {0}")]
    CycleDetected(String),

    #[error("Workflow already started (status: {status})")]
    AlreadyStarted { status: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Workflow runner is no longer accepting messages")]
    RunnerClosed,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::NoHomeDir), "No home directory");
        assert_eq!(
            format!("{}", Error::CycleDetected("b".to_string())),
            "Dependency cycle detected at task: b"
        );
        assert_eq!(
            format!(
                "{}",
                Error::InvalidTransition {
                    from: "completed".to_string(),
                    to: "running".to_string()
                }
            ),
            "Invalid transition from completed to running"
        );
    }

    #[test]
    fn test_error_from_json() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
