//! Process-wide account signing identity.

use nkeys::KeyPair;
use thiserror::Error;

use natsgate_core::CalloutError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("account public key is not configured")]
    MissingPublicKey,

    #[error("account signing seed is not configured")]
    MissingSeed,

    #[error("account signing seed is invalid: {0}")]
    InvalidSeed(String),

    #[error("'{0}' is not an account public key")]
    NotAnAccountKey(String),

    #[error("signing seed belongs to {derived}, not the configured account {configured}")]
    KeyMismatch { configured: String, derived: String },

    #[error("signature failed: {0}")]
    Sign(String),
}

impl From<SigningError> for CalloutError {
    fn from(value: SigningError) -> Self {
        CalloutError::Signing(value.to_string())
    }
}

/// Account key pair used to sign every issued artifact.
///
/// Built once at startup and shared read-only; a missing or inconsistent
/// secret is a startup failure, never a per-request one.
pub struct SigningIdentity {
    account_public_key: String,
    key_pair: KeyPair,
}

impl SigningIdentity {
    pub fn from_secrets(account_public_key: &str, seed: &str) -> Result<Self, SigningError> {
        let account_public_key = account_public_key.trim();
        let seed = seed.trim();
        if account_public_key.is_empty() {
            return Err(SigningError::MissingPublicKey);
        }
        if seed.is_empty() {
            return Err(SigningError::MissingSeed);
        }
        if !account_public_key.starts_with('A') {
            return Err(SigningError::NotAnAccountKey(account_public_key.to_string()));
        }

        let key_pair =
            KeyPair::from_seed(seed).map_err(|e| SigningError::InvalidSeed(e.to_string()))?;
        let derived = key_pair.public_key();
        if derived != account_public_key {
            return Err(SigningError::KeyMismatch {
                configured: account_public_key.to_string(),
                derived,
            });
        }

        Ok(Self {
            account_public_key: account_public_key.to_string(),
            key_pair,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.account_public_key
    }

    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>, SigningError> {
        self.key_pair
            .sign(input)
            .map_err(|e| SigningError::Sign(e.to_string()))
    }
}

impl core::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("account_public_key", &self.account_public_key)
            .finish_non_exhaustive()
    }
}
