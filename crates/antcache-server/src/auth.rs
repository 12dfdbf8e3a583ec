//! The authentication probe.
//!
//! Enabled iff a password is configured. Verification is a
//! constant-time compare; credential storage and hashing live outside
//! the server, which only ever sees this enabled/verify interface.

use subtle::ConstantTimeEq;

/// Password verification for AUTH.
#[derive(Clone)]
pub struct AuthProbe {
    password: Option<String>,
}

impl AuthProbe {
    /// Builds a probe from the configured password; empty disables
    /// authentication.
    pub fn from_password(password: &str) -> Self {
        Self {
            password: if password.is_empty() {
                None
            } else {
                Some(password.to_string())
            },
        }
    }

    pub fn disabled() -> Self {
        Self { password: None }
    }

    pub fn enabled(&self) -> bool {
        self.password.is_some()
    }

    /// Verifies a password attempt in constant time. Always `true`
    /// when authentication is disabled.
    pub fn verify(&self, attempt: &str) -> bool {
        match &self.password {
            None => true,
            Some(expected) => bool::from(attempt.as_bytes().ct_eq(expected.as_bytes())),
        }
    }
}

impl std::fmt::Debug for AuthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProbe")
            .field("enabled", &self.enabled())
            .finish()
    }
}
