use crate::workflow::types::ErrorKind;
use thiserror::Error;

/// Error surfaced by an external collaborator call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("challenge failure: {0}")]
    Captcha(String),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollaboratorError::Network(_) => ErrorKind::Network,
            CollaboratorError::Timeout(_) => ErrorKind::Timeout,
            CollaboratorError::Captcha(_) => ErrorKind::Captcha,
            CollaboratorError::Parse(_) => ErrorKind::Parse,
            CollaboratorError::Rejected(_) => ErrorKind::WorkflowRejected,
            CollaboratorError::Unavailable(_) => ErrorKind::Dependency,
        }
    }
}

/// Errors that end a whole run
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("bootstrap failed ({kind}): {details}")]
    Bootstrap { kind: ErrorKind, details: String },
    #[error("output artifact error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_map_to_kinds() {
        assert_eq!(CollaboratorError::Network("x".into()).kind(), ErrorKind::Network);
        assert_eq!(CollaboratorError::Rejected("x".into()).kind(), ErrorKind::WorkflowRejected);
        assert_eq!(CollaboratorError::Unavailable("x".into()).kind(), ErrorKind::Dependency);
    }

    #[test]
    fn bootstrap_error_display_names_kind() {
        let err = RunnerError::Bootstrap {
            kind: ErrorKind::Parse,
            details: "action id not found".to_string(),
        };
        assert_eq!(err.to_string(), "bootstrap failed (parse): action id not found");
    }
}
