//! Translation of effective permissions into publish/subscribe allow-lists.

use crate::permissions::Action;
use crate::resolve::EffectivePermissions;

/// Subject allow-lists embedded in an issued user credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControlList {
    pub publish_allow: Vec<String>,
    pub subscribe_allow: Vec<String>,
}

impl AccessControlList {
    pub fn is_empty(&self) -> bool {
        self.publish_allow.is_empty() && self.subscribe_allow.is_empty()
    }
}

/// Split permissions by action prefix, keeping resolution order.
///
/// Strings that match neither `publish:` nor `subscribe:` are ignored, as are
/// grants whose trimmed subject is blank: NATS rejects an empty subject, so
/// `publish:` alone grants nothing.
pub fn translate(effective: &EffectivePermissions) -> AccessControlList {
    let mut acl = AccessControlList::default();
    for permission in &effective.permissions {
        match permission.grant() {
            Some((Action::Publish, subject)) => acl.publish_allow.push(subject.to_string()),
            Some((Action::Subscribe, subject)) => acl.subscribe_allow.push(subject.to_string()),
            None => tracing::trace!(permission = %permission, "ignoring non-subject permission"),
        }
    }
    acl
}
