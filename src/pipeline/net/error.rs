use std::time::Duration;

use thiserror::Error;
use zeromq::ZmqError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("zeromq: {0}")]
    Zmq(#[from] ZmqError),
    #[error("could not connect to {addr} after {attempts} attempts: {last}")]
    ConnectExhausted {
        addr: String,
        attempts: u32,
        last: ZmqError,
    },
    #[error("{0} channel already taken")]
    AlreadyOpen(&'static str),
    #[error("peer closed the channel")]
    ChannelClosed,
    #[error("no frame received within {0:?}")]
    TimedOut(Duration),
    #[error("received an empty message")]
    EmptyRead,
}

impl Error {
    /// Errors that only mean "nothing useful arrived this time"; the
    /// receive loop goes back to waiting on these.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EmptyRead | Error::Zmq(ZmqError::NoMessage))
    }
}
