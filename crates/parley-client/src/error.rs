use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No conversation selected")]
    NoPeerSelected,

    /// The server answered with `{success: false, message}`.
    #[error("{0}")]
    Server(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Please select a valid image file")]
    NotAnImage,

    #[error("Image size must be less than {max} bytes (got {size})")]
    TooLarge { size: usize, max: usize },
}
