use natsgate_core::UserId;

/// Login record held by the credential store for the password path.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub user_id: UserId,
    pub login: String,
    /// bcrypt hash; `None` when the account has no password set.
    pub password_hash: Option<String>,
}

impl core::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How the connecting client proved who it is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CredentialPath {
    Password,
    Token,
}

impl CredentialPath {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialPath::Password => "password",
            CredentialPath::Token => "token",
        }
    }
}

/// An authenticated client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub path: CredentialPath,
}
