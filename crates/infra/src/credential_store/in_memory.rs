use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use natsgate_auth::{CredentialAdmin, CredentialStore, Permission, StoreError, StoredIdentity};
use natsgate_core::{GroupId, UserId};

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by login.
    users: HashMap<String, StoredIdentity>,
    user_permissions: HashMap<UserId, Vec<Permission>>,
    /// Memberships in insertion order.
    memberships: HashMap<UserId, Vec<GroupId>>,
    group_permissions: HashMap<GroupId, Vec<Permission>>,
}

/// In-memory credential store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a login record.
    pub fn insert_user(
        &self,
        user_id: UserId,
        login: impl Into<String>,
        password_hash: Option<String>,
    ) -> Result<(), StoreError> {
        let login = login.into();
        let mut tables = self.write()?;
        tables.users.retain(|_, stored| stored.user_id != user_id);
        tables.users.insert(
            login.clone(),
            StoredIdentity {
                user_id,
                login,
                password_hash,
            },
        );
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<StoredIdentity>, StoreError> {
        Ok(self.read()?.users.get(login).cloned())
    }

    async fn permissions_for(&self, user_id: &UserId) -> Result<Vec<Permission>, StoreError> {
        Ok(self
            .read()?
            .user_permissions
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn groups_for(&self, user_id: &UserId) -> Result<Vec<GroupId>, StoreError> {
        Ok(self
            .read()?
            .memberships
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn permissions_for_groups(
        &self,
        group_ids: &[GroupId],
    ) -> Result<Vec<Vec<Permission>>, StoreError> {
        let tables = self.read()?;
        Ok(group_ids
            .iter()
            .filter_map(|id| tables.group_permissions.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl CredentialAdmin for InMemoryCredentialStore {
    async fn register_login(
        &self,
        user_id: &UserId,
        login: &str,
        password_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        self.insert_user(user_id.clone(), login, password_hash.map(str::to_string))
    }

    async fn set_user_permissions(
        &self,
        user_id: &UserId,
        permissions: &[Permission],
    ) -> Result<(), StoreError> {
        self.write()?
            .user_permissions
            .insert(user_id.clone(), permissions.to_vec());
        Ok(())
    }

    async fn set_group_permissions(
        &self,
        group_id: &GroupId,
        permissions: &[Permission],
    ) -> Result<(), StoreError> {
        self.write()?
            .group_permissions
            .insert(group_id.clone(), permissions.to_vec());
        Ok(())
    }

    async fn add_user_to_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let groups = tables.memberships.entry(user_id.clone()).or_default();
        if !groups.contains(group_id) {
            groups.push(group_id.clone());
        }
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if let Some(groups) = tables.memberships.get_mut(user_id) {
            groups.retain(|g| g != group_id);
        }
        Ok(())
    }
}
