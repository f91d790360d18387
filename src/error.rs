use std::{io, path::PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the scoreboard RPC channel.
///
/// Errors tied to a single request are delivered to that request's caller only and never
/// tear the channel down.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The transport could not be opened or the handshake was rejected.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The server rejected the machine credentials.
    #[error("authentication failed")]
    Authentication,
    /// A frame was malformed or could not be matched to a request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The channel is not connected; the frame was dropped.
    #[error("not connected; message dropped")]
    Disconnected,
    /// The channel was torn down before the response arrived.
    #[error("channel closed before a response arrived")]
    ChannelClosed,
    /// No response arrived within the request timeout.
    #[error("request {0} timed out")]
    Timeout(Uuid),
    /// The outbound request could not be encoded.
    #[error("failed to encode request")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised by the QR scanner device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The scanner device could not be opened.
    #[error("cannot open scanner device {}", path.display())]
    Open {
        /// Device node that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The scanner device reached end-of-file and can no longer be read.
    #[error("scanner device closed")]
    Closed,
}

/// Errors raised while reading a game's score or audit files.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The file could not be read.
    #[error("cannot read {}", path.display())]
    Io {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The file was read but its layout was not understood.
    #[error("malformed score file {}: {reason}", path.display())]
    Malformed {
        /// File with the unexpected layout.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// The file is not valid JSON.
    #[error("invalid JSON in {}", path.display())]
    Json {
        /// File holding the invalid document.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by player session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Player positions are 1 through 4.
    #[error("invalid player position {0}; expected 1..=4")]
    InvalidPosition(i64),
    /// The server answered the login with a non-success status.
    #[error("login rejected with status {status}")]
    LoginRejected {
        /// HTTP-style status returned by the server.
        status: u16,
    },
    /// The server answered with a body we could not understand.
    #[error("malformed login response: {0}")]
    MalformedResponse(String),
    /// The login request never completed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Errors raised while loading or saving the persisted machine identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity file could not be read or written.
    #[error("cannot access identity file {}", path.display())]
    Io {
        /// Identity file path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The identity file is not valid JSON.
    #[error("invalid identity file {}", path.display())]
    Json {
        /// Identity file path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The stored machine UUID is missing or malformed.
    #[error("invalid machine UUID `{0}`")]
    InvalidUuid(String),
    /// The stored bearer token is empty.
    #[error("machine token is empty")]
    MissingToken,
}

/// Errors raised while registering this machine with the scoreboard.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Registration codes are exactly four characters.
    #[error("invalid registration code; expected 4 characters")]
    InvalidCode,
    /// The server refused the code.
    #[error("registration rejected with status {status}")]
    Rejected {
        /// HTTP-style status returned by the server.
        status: u16,
    },
    /// The server answered with a body we could not understand.
    #[error("malformed registration response: {0}")]
    MalformedResponse(String),
    /// The registration request never completed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The issued identity could not be persisted.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
