use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeAtlasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Circuit open after {failures} consecutive failures, retry in {retry_after_ms}ms")]
    CircuitOpen { failures: u32, retry_after_ms: u64 },

    #[error("Invalid root path: {0}")]
    InvalidRoot(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl CodeAtlasError {
    /// Errors worth another attempt: I/O hiccups and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            CodeAtlasError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::InvalidData
            ),
            CodeAtlasError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CodeAtlasError::CircuitOpen { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodeAtlasError>;
