use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserIdError {
    #[error("User id is empty")]
    Empty,

    #[error("User id is the literal \"undefined\"")]
    Undefined,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Message must contain text or an image")]
    Empty,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed session token: {0}")]
    Malformed(String),

    #[error("Session token expired")]
    Expired,

    #[error("Invalid verification key")]
    InvalidKey,

    #[error("Session token signature does not verify")]
    InvalidSignature,
}
