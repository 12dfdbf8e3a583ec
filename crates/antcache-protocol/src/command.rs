//! Command parsing from tokenized lines.
//!
//! The optional TTL flag `-t <value>` is recognized only as the third
//! and fourth tokens (immediately after the key) of write commands;
//! GET, DEL, KEYS, FLUSHALL, and AUTH never honor it.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::tokenize::tokenize;
use crate::ttl::parse_ttl;

/// A parsed client command, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// SET (nx=false) / SETNX (nx=true): store a string. The value is
    /// the remaining tokens joined with single spaces.
    Set {
        key: String,
        value: String,
        ttl: Duration,
        nx: bool,
    },
    /// SETS / SETSNX: store an ordered string array.
    SetArray {
        key: String,
        values: Vec<String>,
        ttl: Duration,
        nx: bool,
    },
    /// SETX / SETXNX: store a field/value object.
    SetObject {
        key: String,
        fields: BTreeMap<String, String>,
        ttl: Duration,
        nx: bool,
    },
    /// GET with one or more keys.
    Get { keys: Vec<String> },
    /// DEL with one or more keys; replies with the count deleted.
    Del { keys: Vec<String> },
    /// KEYS: list every key with its type.
    Keys,
    /// FLUSHALL: clear the keyspace.
    FlushAll,
    /// AUTH with the password to verify.
    Auth { password: String },
}

impl Command {
    /// Parses one command line.
    pub fn parse(line: &str) -> Result<Command, ProtocolError> {
        let parts = tokenize(line);
        if parts.is_empty() {
            return Err(ProtocolError::InvalidFormat);
        }

        let verb = parts[0].to_ascii_uppercase();

        if verb == "AUTH" {
            if parts.len() != 2 {
                return Err(ProtocolError::AuthMissingPassword);
            }
            return Ok(Command::Auth {
                password: parts[1].clone(),
            });
        }

        let (ttl, parts) = strip_ttl_flag(&verb, parts)?;

        match verb.as_str() {
            "SET" => parse_set(&parts, ttl, false),
            "SETNX" => parse_set(&parts, ttl, true),
            "SETS" => parse_set_array(&parts, ttl, false),
            "SETSNX" => parse_set_array(&parts, ttl, true),
            "SETX" => parse_set_object(&parts, ttl, false),
            "SETXNX" => parse_set_object(&parts, ttl, true),
            "GET" => {
                if parts.len() < 2 {
                    return Err(ProtocolError::InvalidArity("GET"));
                }
                Ok(Command::Get {
                    keys: parts[1..].to_vec(),
                })
            }
            "DEL" => {
                if parts.len() < 2 {
                    return Err(ProtocolError::InvalidArity("DEL"));
                }
                Ok(Command::Del {
                    keys: parts[1..].to_vec(),
                })
            }
            "KEYS" => match parts.len() {
                1 => Ok(Command::Keys),
                2 if parts[1] == "*" => Ok(Command::Keys),
                2 => Err(ProtocolError::UnsupportedPattern),
                _ => Err(ProtocolError::InvalidArity("KEYS")),
            },
            "FLUSHALL" => {
                if parts.len() != 1 {
                    return Err(ProtocolError::InvalidArity("FLUSHALL"));
                }
                Ok(Command::FlushAll)
            }
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

/// Commands that never honor the TTL flag.
fn ttl_exempt(verb: &str) -> bool {
    matches!(verb, "GET" | "DEL" | "KEYS" | "FLUSHALL" | "AUTH")
}

/// Recognizes `-t <value>` at token positions 3 and 4 and removes both
/// tokens, returning the parsed TTL alongside the filtered tokens.
fn strip_ttl_flag(
    verb: &str,
    parts: Vec<String>,
) -> Result<(Duration, Vec<String>), ProtocolError> {
    if ttl_exempt(verb) || parts.len() < 4 || parts[2] != "-t" {
        return Ok((Duration::ZERO, parts));
    }

    let ttl = parse_ttl(&parts[3])?;
    let mut filtered = Vec::with_capacity(parts.len() - 2);
    filtered.push(parts[0].clone());
    filtered.push(parts[1].clone());
    filtered.extend_from_slice(&parts[4..]);
    Ok((ttl, filtered))
}

fn parse_set(parts: &[String], ttl: Duration, nx: bool) -> Result<Command, ProtocolError> {
    if parts.len() < 3 {
        return Err(ProtocolError::InvalidArity(if nx { "SETNX" } else { "SET" }));
    }
    Ok(Command::Set {
        key: parts[1].clone(),
        value: parts[2..].join(" "),
        ttl,
        nx,
    })
}

fn parse_set_array(parts: &[String], ttl: Duration, nx: bool) -> Result<Command, ProtocolError> {
    if parts.len() < 3 {
        return Err(ProtocolError::InvalidArity(if nx { "SETSNX" } else { "SETS" }));
    }
    Ok(Command::SetArray {
        key: parts[1].clone(),
        values: parts[2..].to_vec(),
        ttl,
        nx,
    })
}

fn parse_set_object(parts: &[String], ttl: Duration, nx: bool) -> Result<Command, ProtocolError> {
    let name = if nx { "SETXNX" } else { "SETX" };
    if parts.len() < 4 {
        return Err(ProtocolError::InvalidArity(name));
    }
    if (parts.len() - 2) % 2 != 0 {
        return Err(ProtocolError::UnpairedFields(name));
    }

    let mut fields = BTreeMap::new();
    for pair in parts[2..].chunks(2) {
        fields.insert(pair[0].clone(), pair[1].clone());
    }
    Ok(Command::SetObject {
        key: parts[1].clone(),
        fields,
        ttl,
        nx,
    })
}
