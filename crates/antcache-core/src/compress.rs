//! Value compression policy.
//!
//! The codec itself is an external collaborator; the keyspace only calls
//! the `compress`/`decompress` hooks on its write and read paths. The
//! policy carries the gating configuration (enabled, minimum payload
//! size, strings-only) and the shipped transform is the identity, so the
//! hooks are safe to call unconditionally.

use crate::types::Value;

/// Gating configuration for the compression policy, consumed from the
/// external configuration loader.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Minimum payload size in bytes before compression is considered.
    pub min_size: usize,
    /// When set, only string values are eligible.
    pub strings_only: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_size: 1024,
            strings_only: false,
        }
    }
}

/// The compression policy attached to a keyspace.
#[derive(Debug, Clone, Default)]
pub struct Compression {
    config: CompressionConfig,
}

impl Compression {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Whether the policy would compress this value at all.
    pub fn eligible(&self, value: &Value) -> bool {
        if !self.config.enabled {
            return false;
        }
        match value {
            Value::String(s) => s.len() >= self.config.min_size,
            Value::Array(elems) => {
                !self.config.strings_only
                    && elems.iter().map(String::len).sum::<usize>() >= self.config.min_size
            }
            Value::Object(fields) => {
                !self.config.strings_only
                    && fields.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
                        >= self.config.min_size
            }
        }
    }

    /// Transform applied on the write path. Identity codec; eligibility
    /// gating is preserved for codecs plugged in at this seam.
    pub fn compress(&self, value: Value) -> Value {
        value
    }

    /// Transform applied on the read path.
    pub fn decompress(&self, value: Value) -> Value {
        value
    }
}
