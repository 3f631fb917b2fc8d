use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("No element matched selectors: {0}")]
    SelectorNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Tried to load unknown recording: {0}")]
    UnknownRecording(String),

    #[error("Step not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Template render error for '{name}': {source}")]
    TemplateRender {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Recording parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Execution context error: {0}")]
    Driver(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
