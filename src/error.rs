use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("no serial port found")]
    PortNotFound,
    #[error("failed to open {port}: {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: io::Error,
    },
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),
    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),
    #[error("malformed line {0:?}")]
    MalformedLine(String),
    #[error("connection timeout")]
    Timeout,
    #[error("link is not connected")]
    NotConnected,
    #[error("link is closed")]
    Closed,
    #[error("gave up after {0} failed reconnects")]
    ReconnectLimit(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LinkError {
    pub(crate) fn into_write_failure(self) -> LinkError {
        match self {
            LinkError::Io(err) => LinkError::WriteFailed(err),
            other => other,
        }
    }

    pub(crate) fn into_read_failure(self) -> LinkError {
        match self {
            LinkError::Io(err) => LinkError::ReadFailed(err),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
