use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("missing metadata key: {0}")]
    MissingKey(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("tensor '{name}' has {got} elements, expected {expected}")]
    TensorSize {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),
    #[error("tokenizer error: {0}")]
    TokenizerError(String),
    #[error("chat template error: {0}")]
    Template(String),
    #[error("token id {id} exceeds vocab size {vocab_size}")]
    InvalidToken { id: u32, vocab_size: usize },
    #[error("token batch is ragged: row {row} has {got} tokens, expected {expected}")]
    RaggedBatch {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("forward pass over an empty token batch")]
    EmptyBatch,
    #[error("cache holds {cache} sequences but the batch has {batch}")]
    BatchMismatch { cache: usize, batch: usize },
    #[error("context overflow: {requested} positions requested, model holds {max}")]
    ContextOverflow { requested: usize, max: usize },
    #[error("cache reorder index {index} out of range for batch size {batch}")]
    ReorderIndex { index: usize, batch: usize },
    #[error("tensor error: {0}")]
    Tensor(#[from] la_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
