use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("hardware detection failed: {0}")]
    Hardware(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("metadata tool failed: {0}")]
    Metadata(String),

    #[error("transcoder failed: {0}")]
    Transcode(String),

    #[error("transcoder lacks hardware capability: {0}")]
    HwCapExceeded(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job interrupted")]
    Interrupted,

    #[error("job cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
