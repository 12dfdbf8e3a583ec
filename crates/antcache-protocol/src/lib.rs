//! antcache-protocol: the line-oriented text protocol.
//!
//! Commands and responses are newline-terminated. Parsing happens in
//! three stages: the tokenizer splits a line on whitespace with
//! shell-style quoting, the TTL flag is stripped from write commands,
//! and the remaining tokens become a typed [`Command`].
//!
//! # quick start
//!
//! ```
//! use antcache_protocol::Command;
//!
//! let cmd = Command::parse("SET greet -t 60 hello world").unwrap();
//! match cmd {
//!     Command::Set { key, value, ttl, nx } => {
//!         assert_eq!(key, "greet");
//!         assert_eq!(value, "hello world");
//!         assert_eq!(ttl.as_secs(), 60);
//!         assert!(!nx);
//!     }
//!     _ => unreachable!(),
//! }
//! ```

pub mod command;
pub mod error;
pub mod reply;
pub mod tokenize;
pub mod ttl;

pub use command::Command;
pub use error::ProtocolError;
pub use tokenize::tokenize;
pub use ttl::parse_ttl;

/// Maximum accepted request line length (1 MiB).
pub const MAX_LINE_LEN: usize = 1024 * 1024;
