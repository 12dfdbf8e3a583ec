//! Protocol error types.
//!
//! Every variant renders as the payload of an `ERROR ...` reply; the
//! connection is never closed over a malformed line.

use thiserror::Error;

/// Errors produced while parsing a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line tokenized to nothing, or the shape was unrecognizable.
    #[error("invalid command format")]
    InvalidFormat,

    /// The verb is not one we know.
    #[error("unknown command")]
    UnknownCommand,

    /// Wrong number of arguments for the named command.
    #[error("invalid {0} command")]
    InvalidArity(&'static str),

    /// Object-building commands need field/value pairs.
    #[error("{0} requires even number of arguments for key-value pairs")]
    UnpairedFields(&'static str),

    /// AUTH takes exactly one argument.
    #[error("AUTH requires password")]
    AuthMissingPassword,

    /// The `-t` flag value didn't parse.
    #[error("invalid ttl value: {0}")]
    InvalidTtl(String),

    /// KEYS only supports the literal `*` pattern.
    #[error("KEYS only supports the '*' pattern")]
    UnsupportedPattern,
}
