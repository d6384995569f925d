//! Error types for the graph reader

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Extraction parse error: {0}")]
    ExtractionParse(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Chunk {0} does not exist in the chunk store")]
    ReferentialIntegrity(i64),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Graph format error: {0}")]
    GraphFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient failures worth another attempt (index upserts and queries).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Service(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Service(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Service(format!("Qdrant: {}", err))
    }
}

impl From<async_openai::error::OpenAIError> for Error {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Error::Service(format!("OpenAI: {}", err))
    }
}
