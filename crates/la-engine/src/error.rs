use la_model::ModelError;
use la_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The chat template rejected the request's messages.
    #[error("chat template error: {0}")]
    Template(String),
    /// A forward pass produced output of the wrong shape.
    #[error("shape assertion failed for {what}: expected {expected:?}, got {got:?}")]
    ShapeAssertion {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("inference service is not initialized")]
    NotInitialized,
    #[error("inference service is already initialized")]
    AlreadyInitialized,
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid decode transition from {from} via {op}")]
    InvalidTransition { from: &'static str, op: &'static str },
    #[error("model error: {0}")]
    Model(ModelError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Template(msg) => EngineError::Template(msg),
            other => EngineError::Model(other),
        }
    }
}

impl EngineError {
    /// True for errors caused by the request rather than the engine. A
    /// prompt longer than the model's context window is the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Template(_)
                | EngineError::InvalidArgument(_)
                | EngineError::Cancelled
                | EngineError::Model(ModelError::ContextOverflow { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
