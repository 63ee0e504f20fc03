use thiserror::Error;

use crate::packet::LoginResult;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] crate::socket::Error),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::Error),
    #[error(transparent)]
    Frame(#[from] crate::framing::FrameError),
    #[error("invalid packet: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Movie(#[from] crate::movie::MovieError),
    #[error(transparent)]
    KeyFile(#[from] crate::keyfile::KeyFileError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("clock went backwards: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
    #[error("world has not received its first frame")]
    Uninitialized,
    #[error("session cancelled")]
    Cancelled,
    #[error("no address found for {0}")]
    Unresolved(String),
}

/// Failures while decoding a single message. A decode error rejects the
/// frame it occurred in, never the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload truncated while reading {0}")]
    Truncated(&'static str),
    #[error("bit stream underrun")]
    BitUnderrun,
    #[error("unexpected message tag {0}")]
    UnexpectedTag(u16),
    #[error("malformed {0}")]
    Malformed(&'static str),
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => DecodeError::Truncated("record"),
            _ => DecodeError::Malformed("record"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("login rejected: {0}")]
    Rejected(LoginResult),
    #[error("this client is obsolete ({code}), please upgrade at {url}")]
    Obsolete { code: i16, url: &'static str },
    #[error("unexpected message tag {0} during login")]
    UnexpectedMessage(u16),
    #[error("no password or password hash available")]
    MissingCredentials,
    #[error("login cancelled")]
    Cancelled,
}
