//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering all failure modes of the session driver.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Packet framing failure on the inbound byte stream (fatal for the connection).
    Framing(String),
    /// A well-framed packet carried JSON that does not match the message schema.
    Protocol(String),
    /// The build tool process could not be launched.
    Spawn(String),
    /// The session is not in a state that allows the requested action.
    Session(String),
    /// An operation's preconditions (project, build root, settings) are not met.
    Precondition(String),
    /// An operation reached its end without success.
    Operation(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Precondition(msg) => write!(f, "precondition: {msg}"),
            Self::Operation(msg) => write!(f, "operation: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
