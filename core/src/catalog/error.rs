use thiserror::Error;

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout")]
    Timeout,
}

pub type FunctionResult<T> = Result<T, FunctionError>;
