use serde::{Deserialize, Serialize};

/// What a permission allows a client to do with a subject.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Publish,
    Subscribe,
}

impl Action {
    pub const fn prefix(self) -> &'static str {
        match self {
            Action::Publish => "publish:",
            Action::Subscribe => "subscribe:",
        }
    }
}

/// Permission string as stored by the credential store.
///
/// The wire grammar is `"<action>:<subject-pattern>"` with action one of
/// `publish` or `subscribe` (e.g. `"subscribe:app.chat.>"`). Strings that do
/// not follow the grammar are kept as-is and simply grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn publish(subject: &str) -> Self {
        Self(format!("{}{}", Action::Publish.prefix(), subject))
    }

    pub fn subscribe(subject: &str) -> Self {
        Self(format!("{}{}", Action::Subscribe.prefix(), subject))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into action and trimmed subject pattern.
    ///
    /// Returns `None` for unknown actions and for blank subjects.
    pub fn grant(&self) -> Option<(Action, &str)> {
        [Action::Publish, Action::Subscribe]
            .into_iter()
            .find_map(|action| {
                self.0
                    .strip_prefix(action.prefix())
                    .map(|subject| (action, subject.trim()))
            })
            .filter(|(_, subject)| !subject.is_empty())
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self(value)
    }
}
