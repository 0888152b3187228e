use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Expected a hello envelope, got {0:?}")]
    ExpectedHello(String),

    #[error("Hello envelope is missing its body")]
    MissingHello,

    #[error("Hello envelope is missing device_id")]
    MissingDeviceId,

    #[error("Inline clip data too large: {size} bytes (max {max})")]
    InlineTooLarge { size: usize, max: usize },
}
