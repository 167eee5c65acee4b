//! Error taxonomy for one authorization exchange.

use thiserror::Error;

/// Result type used across the decision core.
pub type CalloutResult<T> = Result<T, CalloutError>;

/// Coarse category of a failed authorization call.
///
/// The category decides the outward message placed in the error envelope;
/// the detailed reason stays internal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    Authentication,
    Authorization,
    Upstream,
    Signing,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Signing => "signing",
        };
        f.write_str(s)
    }
}

/// Why a client failed to authenticate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationFailure {
    #[error("user not found")]
    UnknownLogin,

    #[error("missing credential")]
    MissingStoredHash,

    #[error("password mismatch")]
    PasswordMismatch,

    #[error("stored hash is unreadable: {0}")]
    UnreadableHash(String),

    #[error("token rejected: {0}")]
    InvalidToken(String),

    #[error("no identity in token")]
    NoIdentityInToken,

    #[error("missing credentials")]
    MissingCredentials,
}

impl AuthenticationFailure {
    /// Message safe to hand back to the broker.
    ///
    /// Every password-path failure collapses to the same text so a caller
    /// cannot probe which logins exist.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthenticationFailure::UnknownLogin
            | AuthenticationFailure::MissingStoredHash
            | AuthenticationFailure::PasswordMismatch
            | AuthenticationFailure::UnreadableHash(_) => "invalid credentials",
            AuthenticationFailure::InvalidToken(_) => "invalid token",
            AuthenticationFailure::NoIdentityInToken => "no identity in token",
            AuthenticationFailure::MissingCredentials => "missing credentials",
        }
    }
}

/// Failure of a single authorization call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalloutError {
    /// The inbound request could not be decoded.
    #[error("malformed request: {0}")]
    Decode(String),

    /// The client could not be authenticated.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationFailure),

    /// The client authenticated but holds no usable permissions.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The credential store or identity provider failed or timed out.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Building or signing an artifact failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl CalloutError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn signing(msg: impl Into<String>) -> Self {
        Self::Signing(msg.into())
    }

    pub fn no_permissions() -> Self {
        Self::Authorization("no permissions assigned".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CalloutError::Decode(_) => ErrorKind::Decode,
            CalloutError::Authentication(_) => ErrorKind::Authentication,
            CalloutError::Authorization(_) => ErrorKind::Authorization,
            CalloutError::Upstream(_) => ErrorKind::Upstream,
            CalloutError::Signing(_) => ErrorKind::Signing,
        }
    }

    /// Terse message for the error envelope. Never carries internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            CalloutError::Decode(_) => "malformed request",
            CalloutError::Authentication(failure) => failure.public_message(),
            CalloutError::Authorization(_) => "no permissions assigned",
            CalloutError::Upstream(_) | CalloutError::Signing(_) => "internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_failures_share_one_public_message() {
        let failures = [
            AuthenticationFailure::UnknownLogin,
            AuthenticationFailure::MissingStoredHash,
            AuthenticationFailure::PasswordMismatch,
            AuthenticationFailure::UnreadableHash("bad".into()),
        ];
        for failure in failures {
            let err = CalloutError::from(failure);
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(err.public_message(), "invalid credentials");
        }
    }

    #[test]
    fn internal_failures_do_not_leak_detail() {
        let err = CalloutError::upstream("postgres: connection refused at 10.0.0.4");
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn token_failures_keep_their_category() {
        let err = CalloutError::from(AuthenticationFailure::NoIdentityInToken);
        assert_eq!(err.public_message(), "no identity in token");
        assert_eq!(CalloutError::no_permissions().kind(), ErrorKind::Authorization);
    }
}
