//! Error of chord-overlay.

use crate::dht::id::NodeId;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in chord-overlay.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("identifier must be {expected} bytes, got {actual}")]
    InvalidIdentifier { expected: usize, actual: usize },

    #[error("invalid hexadecimal identifier")]
    InvalidHexIdentifier(#[from] hex::FromHexError),

    #[error("local node has no successor yet")]
    NoSuccessor,

    #[error("you should not connect to yourself")]
    ConnectToSelf,

    #[error("no known peer listening on {0}")]
    UnknownPeer(String),

    #[error("no route to destination {0}")]
    NoRoute(NodeId),

    #[error("router already registered for {0}")]
    RouterExists(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("synchronous request timed out")]
    ReplyTimeout,

    #[error("unexpected reply body")]
    UnexpectedReply,

    #[error("send message through channel failed")]
    ChannelSendMessageFailed,

    #[error("recv message through channel failed")]
    ChannelRecvMessageFailed,

    #[error("bincode serialization error")]
    BincodeSerialize(#[source] bincode::Error),

    #[error("bincode deserialization error")]
    BincodeDeserialize(#[source] bincode::Error),

    #[error("overlay already started")]
    AlreadyStarted,

    #[error("overlay already stopped")]
    AlreadyStopped,
}

impl Error {
    /// Build an [Error::InvalidIdentifier] from an expected byte length and
    /// an offending identifier.
    pub fn invalid_id(expected: usize, id: &NodeId) -> Self {
        Error::InvalidIdentifier {
            expected,
            actual: id.len(),
        }
    }
}
