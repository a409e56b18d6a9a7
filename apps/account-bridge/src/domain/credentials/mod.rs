//! Client Credentials
//!
//! The key/secret pair a client supplies when requesting monitoring.
//! Shape is validated at construction; malformed input is rejected
//! synchronously and never retried.

// =============================================================================
// Validation Rules
// =============================================================================

/// Required API key length.
pub const API_KEY_LENGTH: usize = 24;

/// Minimum API secret length.
pub const API_SECRET_MIN_LENGTH: usize = 20;

/// Malformed credential input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialFormatError {
    /// API key is not exactly [`API_KEY_LENGTH`] characters.
    #[error("API key must be exactly {API_KEY_LENGTH} characters, got {0}")]
    InvalidKeyLength(usize),

    /// API secret is shorter than [`API_SECRET_MIN_LENGTH`] characters.
    #[error("API secret must be at least {API_SECRET_MIN_LENGTH} characters, got {0}")]
    SecretTooShort(usize),
}

// =============================================================================
// Credentials
// =============================================================================

/// Validated API credentials for one client session.
///
/// Exclusively owned by the session that stored them; erased when the
/// session is removed. `Debug` never prints the raw values.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create credentials, validating the key/secret shape.
    ///
    /// # Errors
    ///
    /// Returns `CredentialFormatError` if the key is not exactly 24
    /// characters or the secret is shorter than 20 characters.
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Result<Self, CredentialFormatError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();

        if api_key.len() != API_KEY_LENGTH {
            return Err(CredentialFormatError::InvalidKeyLength(api_key.len()));
        }

        if api_secret.len() < API_SECRET_MIN_LENGTH {
            return Err(CredentialFormatError::SecretTooShort(api_secret.len()));
        }

        Ok(Self {
            api_key,
            api_secret,
        })
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
