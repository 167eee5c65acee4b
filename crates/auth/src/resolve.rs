//! Permission resolution: individual grants merged with group grants.

use std::collections::HashSet;
use std::sync::Arc;

use natsgate_core::{GroupId, UserId};

use crate::Permission;
use crate::ports::{CredentialStore, StoreError};

/// Effective permissions of one identity.
///
/// `permissions` is a set: duplicates are collapsed, and the order is the
/// order in which each permission was first seen (individual grants, then
/// groups in membership order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub permissions: Vec<Permission>,
    pub groups: Vec<GroupId>,
}

impl EffectivePermissions {
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p.as_str() == permission)
    }
}

/// Set union of individual and group permissions, first occurrence wins.
pub fn merge_permissions(
    individual: Vec<Permission>,
    groups: Vec<Vec<Permission>>,
) -> Vec<Permission> {
    let mut seen: HashSet<Permission> = HashSet::new();
    individual
        .into_iter()
        .chain(groups.into_iter().flatten())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Resolves effective permissions against a credential store.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_id: &UserId) -> Result<EffectivePermissions, StoreError> {
        let individual = self.store.permissions_for(user_id).await?;
        let groups = self.store.groups_for(user_id).await?;

        let group_permissions = if groups.is_empty() {
            Vec::new()
        } else {
            self.store.permissions_for_groups(&groups).await?
        };

        let permissions = merge_permissions(individual, group_permissions);
        tracing::debug!(
            user_id = %user_id,
            groups = groups.len(),
            permissions = permissions.len(),
            "resolved effective permissions"
        );

        Ok(EffectivePermissions { permissions, groups })
    }

    /// Resolve by login. An unknown login resolves to no permissions.
    pub async fn resolve_by_login(&self, login: &str) -> Result<EffectivePermissions, StoreError> {
        match self.store.find_by_login(login).await? {
            Some(identity) => self.resolve(&identity.user_id).await,
            None => Ok(EffectivePermissions::default()),
        }
    }
}
