//! Postgres-backed credential store.
//!
//! ## Schema
//!
//! | Table | Columns | Notes |
//! |-------|---------|-------|
//! | `user_credentials` | `user_id`, `login`, `password_hash` | `login` is unique |
//! | `user_permissions` | `user_id`, `permission`, `seq` | individual grants |
//! | `group_members` | `user_id`, `group_id`, `seq` | membership order follows `seq` |
//! | `group_permissions` | `group_id`, `permission`, `seq` | grants per group |
//!
//! ## Error Mapping
//!
//! Every SQLx failure (connection, pool, query) maps to
//! `StoreError::Unavailable`; rows that do not decode into domain values map
//! to `StoreError::Corrupt`. Both surface as upstream failures to the
//! authorization path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use natsgate_auth::{CredentialAdmin, CredentialStore, Permission, StoreError, StoredIdentity};
use natsgate_core::{GroupId, UserId};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_credentials (
        user_id       TEXT PRIMARY KEY,
        login         TEXT NOT NULL UNIQUE,
        password_hash TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_permissions (
        seq        BIGSERIAL,
        user_id    TEXT NOT NULL,
        permission TEXT NOT NULL,
        PRIMARY KEY (user_id, permission)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_members (
        seq      BIGSERIAL,
        user_id  TEXT NOT NULL,
        group_id TEXT NOT NULL,
        PRIMARY KEY (user_id, group_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS group_permissions (
        seq        BIGSERIAL,
        group_id   TEXT NOT NULL,
        permission TEXT NOT NULL,
        PRIMARY KEY (group_id, permission)
    )
    "#,
];

/// Credential store backed by PostgreSQL.
///
/// `Send + Sync`; all access goes through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the credential tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn replace_permissions(
        &self,
        operation: &'static str,
        delete: &'static str,
        insert: &'static str,
        owner: &str,
        permissions: &[Permission],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        sqlx::query(delete)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        for permission in permissions {
            sqlx::query(insert)
                .bind(owner)
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self), err)]
    async fn find_by_login(&self, login: &str) -> Result<Option<StoredIdentity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, login, password_hash
            FROM user_credentials
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_login", e))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let row = CredentialRow::from_row(&row)
                    .map_err(|e| StoreError::Corrupt(format!("user_credentials row: {e}")))?;
                Ok(Some(row.try_into()?))
            }
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn permissions_for(&self, user_id: &UserId) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT permission
            FROM user_permissions
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_for", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("permission")
                    .map(Permission::new)
                    .map_err(|e| StoreError::Corrupt(format!("user_permissions row: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn groups_for(&self, user_id: &UserId) -> Result<Vec<GroupId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT group_id
            FROM group_members
            WHERE user_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("groups_for", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("group_id")
                    .map_err(|e| StoreError::Corrupt(format!("group_members row: {e}")))?;
                GroupId::parse(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    #[instrument(skip(self), fields(groups = group_ids.len()), err)]
    async fn permissions_for_groups(
        &self,
        group_ids: &[GroupId],
    ) -> Result<Vec<Vec<Permission>>, StoreError> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = group_ids.iter().map(|g| g.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT group_id, permission
            FROM group_permissions
            WHERE group_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("permissions_for_groups", e))?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let group: String = row
                .try_get("group_id")
                .map_err(|e| StoreError::Corrupt(format!("group_permissions row: {e}")))?;
            let permission: String = row
                .try_get("permission")
                .map_err(|e| StoreError::Corrupt(format!("group_permissions row: {e}")))?;
            pairs.push((group, permission));
        }

        Ok(group_rows(group_ids, pairs))
    }
}

#[async_trait]
impl CredentialAdmin for PostgresCredentialStore {
    #[instrument(skip(self, password_hash), fields(user_id = %user_id), err)]
    async fn register_login(
        &self,
        user_id: &UserId,
        login: &str,
        password_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, login, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET login = EXCLUDED.login, password_hash = EXCLUDED.password_hash
            "#,
        )
        .bind(user_id.as_str())
        .bind(login)
        .bind(password_hash)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_login", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, permissions),
        fields(user_id = %user_id, count = permissions.len()),
        err
    )]
    async fn set_user_permissions(
        &self,
        user_id: &UserId,
        permissions: &[Permission],
    ) -> Result<(), StoreError> {
        self.replace_permissions(
            "set_user_permissions",
            "DELETE FROM user_permissions WHERE user_id = $1",
            "INSERT INTO user_permissions (user_id, permission) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            user_id.as_str(),
            permissions,
        )
        .await
    }

    #[instrument(
        skip(self, permissions),
        fields(group_id = %group_id, count = permissions.len()),
        err
    )]
    async fn set_group_permissions(
        &self,
        group_id: &GroupId,
        permissions: &[Permission],
    ) -> Result<(), StoreError> {
        self.replace_permissions(
            "set_group_permissions",
            "DELETE FROM group_permissions WHERE group_id = $1",
            "INSERT INTO group_permissions (group_id, permission) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            group_id.as_str(),
            permissions,
        )
        .await
    }

    #[instrument(skip(self), fields(user_id = %user_id, group_id = %group_id), err)]
    async fn add_user_to_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (user_id, group_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id.as_str())
        .bind(group_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_user_to_group", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, group_id = %group_id), err)]
    async fn remove_user_from_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM group_members WHERE user_id = $1 AND group_id = $2")
            .bind(user_id.as_str())
            .bind(group_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_user_from_group", e))?;
        Ok(())
    }
}

/// Regroup `(group_id, permission)` rows into one set per requested group,
/// in the order the groups were requested. Groups without rows are omitted.
fn group_rows(group_ids: &[GroupId], rows: Vec<(String, String)>) -> Vec<Vec<Permission>> {
    let mut by_group: HashMap<String, Vec<Permission>> = HashMap::new();
    for (group, permission) in rows {
        by_group.entry(group).or_default().push(Permission::new(permission));
    }

    group_ids
        .iter()
        .filter_map(|g| by_group.remove(g.as_str()))
        .collect()
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Unavailable(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[derive(Debug)]
struct CredentialRow {
    user_id: String,
    login: String,
    password_hash: Option<String>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for CredentialRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(CredentialRow {
            user_id: row.try_get("user_id")?,
            login: row.try_get("login")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

impl TryFrom<CredentialRow> for StoredIdentity {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(StoredIdentity {
            user_id: UserId::parse(&row.user_id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            login: row.login,
            password_hash: row.password_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(raw: &str) -> GroupId {
        GroupId::parse(raw).unwrap()
    }

    #[test]
    fn group_rows_follow_requested_group_order() {
        let rows = vec![
            ("ops".to_string(), "subscribe:ops.>".to_string()),
            ("dev".to_string(), "publish:dev.1".to_string()),
            ("ops".to_string(), "publish:ops.1".to_string()),
        ];

        let sets = group_rows(&[gid("dev"), gid("ops"), gid("empty")], rows);
        assert_eq!(
            sets,
            vec![
                vec![Permission::new("publish:dev.1")],
                vec![Permission::new("subscribe:ops.>"), Permission::new("publish:ops.1")],
            ]
        );
    }

    #[test]
    fn pool_failures_are_unavailable() {
        assert!(matches!(
            map_sqlx_error("find_by_login", sqlx::Error::PoolClosed),
            StoreError::Unavailable(msg) if msg.contains("find_by_login")
        ));
    }

    #[test]
    fn blank_user_id_row_is_corrupt() {
        let row = CredentialRow {
            user_id: "  ".into(),
            login: "alice".into(),
            password_hash: None,
        };
        assert!(matches!(
            StoredIdentity::try_from(row),
            Err(StoreError::Corrupt(_))
        ));
    }
}
