use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{DocumentId, GroupId, RightAction, UserId, WorkspaceId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub is_superuser: bool,
}

#[derive(Debug, Clone)]
pub struct StoredGroup {
    pub group_id: GroupId,
    pub name: String,
    pub is_builtin: bool,
}

#[derive(Debug, Clone)]
pub struct StoredWorkspace {
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub owner_user_id: UserId,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document_id: DocumentId,
    pub title: String,
    pub owner_user_id: UserId,
    pub workspace_id: Option<WorkspaceId>,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Login is an idempotent upsert; an existing username hands back its id.
    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username = excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn set_superuser(&self, user_id: UserId, is_superuser: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_superuser = ? WHERE id = ?")
            .bind(is_superuser)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_by_id(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query("SELECT id, username, is_superuser FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredUser {
            user_id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            is_superuser: r.get::<bool, _>(2),
        }))
    }

    pub async fn create_group(&self, name: &str) -> Result<GroupId> {
        let rec = sqlx::query("INSERT INTO groups (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(GroupId(rec.get::<i64, _>(0)))
    }

    pub async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES (?, ?)
             ON CONFLICT(group_id, user_id) DO NOTHING",
        )
        .bind(group_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn group_by_id(&self, group_id: GroupId) -> Result<Option<StoredGroup>> {
        let row = sqlx::query("SELECT id, name, is_builtin FROM groups WHERE id = ?")
            .bind(group_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(group_from_row))
    }

    pub async fn group_by_name(&self, name: &str) -> Result<Option<StoredGroup>> {
        let row = sqlx::query("SELECT id, name, is_builtin FROM groups WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(group_from_row))
    }

    pub async fn create_workspace(&self, title: &str, owner: UserId) -> Result<WorkspaceId> {
        let rec = sqlx::query(
            "INSERT INTO workspaces (title, owner_user_id) VALUES (?, ?) RETURNING id",
        )
        .bind(title)
        .bind(owner.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(WorkspaceId(rec.get::<i64, _>(0)))
    }

    /// Title comparison is case-insensitive; the column collation makes a
    /// plain equality match "Alpha" against "alpha".
    pub async fn workspace_title_exists(&self, title: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM workspaces WHERE title = ?)")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    pub async fn workspace_by_id(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<StoredWorkspace>> {
        let row = sqlx::query(
            "SELECT id, title, owner_user_id, is_public, created_at
             FROM workspaces
             WHERE id = ?",
        )
        .bind(workspace_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(workspace_from_row))
    }

    pub async fn list_all_workspaces(&self) -> Result<Vec<StoredWorkspace>> {
        let rows = sqlx::query(
            "SELECT id, title, owner_user_id, is_public, created_at
             FROM workspaces
             ORDER BY lower(title) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(workspace_from_row).collect())
    }

    pub async fn list_workspaces_with_write_access(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredWorkspace>> {
        let rows = sqlx::query(
            "SELECT DISTINCT w.id, w.title, w.owner_user_id, w.is_public, w.created_at
             FROM workspaces w
             LEFT JOIN workspace_user_rights ur ON ur.workspace_id = w.id AND ur.user_id = ?1
             LEFT JOIN workspace_group_rights gr ON gr.workspace_id = w.id
             LEFT JOIN group_members gm ON gm.group_id = gr.group_id AND gm.user_id = ?1
             WHERE w.owner_user_id = ?1
                OR ur.can_write = 1
                OR (gr.can_write = 1 AND gm.user_id IS NOT NULL)
             ORDER BY lower(w.title) ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(workspace_from_row).collect())
    }

    pub async fn list_workspaces_with_read_access(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredWorkspace>> {
        let rows = sqlx::query(
            "SELECT DISTINCT w.id, w.title, w.owner_user_id, w.is_public, w.created_at
             FROM workspaces w
             LEFT JOIN workspace_user_rights ur ON ur.workspace_id = w.id AND ur.user_id = ?1
             LEFT JOIN workspace_group_rights gr ON gr.workspace_id = w.id
             LEFT JOIN group_members gm ON gm.group_id = gr.group_id AND gm.user_id = ?1
             WHERE w.owner_user_id = ?1
                OR w.is_public = 1
                OR ur.can_read = 1
                OR (gr.can_read = 1 AND gm.user_id IS NOT NULL)
             ORDER BY lower(w.title) ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(workspace_from_row).collect())
    }

    pub async fn set_workspace_public(&self, workspace_id: WorkspaceId) -> Result<()> {
        sqlx::query("UPDATE workspaces SET is_public = 1 WHERE id = ?")
            .bind(workspace_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rights rows go with the workspace; documents assigned to it become
    /// unassigned instead of disappearing.
    pub async fn delete_workspace(&self, workspace_id: WorkspaceId) -> Result<()> {
        sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(workspace_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Users eligible for a new grant on this workspace: no current read or
    /// write flag, and not the owner. Sorted for form rendering.
    pub async fn list_users_without_access(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.is_superuser
             FROM users u
             WHERE u.id NOT IN (
                     SELECT r.user_id FROM workspace_user_rights r
                     WHERE r.workspace_id = ?1 AND (r.can_read = 1 OR r.can_write = 1)
                   )
               AND u.id <> (SELECT owner_user_id FROM workspaces WHERE id = ?1)
             ORDER BY lower(u.username) ASC",
        )
        .bind(workspace_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredUser {
                user_id: UserId(r.get::<i64, _>(0)),
                username: r.get::<String, _>(1),
                is_superuser: r.get::<bool, _>(2),
            })
            .collect())
    }

    /// Group counterpart of `list_users_without_access`. Builtin groups are
    /// never eligible.
    pub async fn list_groups_without_access(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<StoredGroup>> {
        let rows = sqlx::query(
            "SELECT g.id, g.name, g.is_builtin
             FROM groups g
             WHERE g.is_builtin = 0
               AND g.id NOT IN (
                     SELECT r.group_id FROM workspace_group_rights r
                     WHERE r.workspace_id = ? AND (r.can_read = 1 OR r.can_write = 1)
                   )
             ORDER BY lower(g.name) ASC",
        )
        .bind(workspace_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(group_from_row).collect())
    }

    pub async fn set_user_right(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        action: RightAction,
        value: bool,
    ) -> Result<()> {
        let sql = match action {
            RightAction::Read => {
                "INSERT INTO workspace_user_rights (workspace_id, user_id, can_read)
                 VALUES (?, ?, ?)
                 ON CONFLICT(workspace_id, user_id) DO UPDATE SET can_read = excluded.can_read"
            }
            RightAction::Write => {
                "INSERT INTO workspace_user_rights (workspace_id, user_id, can_write)
                 VALUES (?, ?, ?)
                 ON CONFLICT(workspace_id, user_id) DO UPDATE SET can_write = excluded.can_write"
            }
        };
        sqlx::query(sql)
            .bind(workspace_id.0)
            .bind(user_id.0)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_group_right(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
        action: RightAction,
        value: bool,
    ) -> Result<()> {
        let sql = match action {
            RightAction::Read => {
                "INSERT INTO workspace_group_rights (workspace_id, group_id, can_read)
                 VALUES (?, ?, ?)
                 ON CONFLICT(workspace_id, group_id) DO UPDATE SET can_read = excluded.can_read"
            }
            RightAction::Write => {
                "INSERT INTO workspace_group_rights (workspace_id, group_id, can_write)
                 VALUES (?, ?, ?)
                 ON CONFLICT(workspace_id, group_id) DO UPDATE SET can_write = excluded.can_write"
            }
        };
        sqlx::query(sql)
            .bind(workspace_id.0)
            .bind(group_id.0)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_user_rights(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<()> {
        sqlx::query("DELETE FROM workspace_user_rights WHERE workspace_id = ? AND user_id = ?")
            .bind(workspace_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_group_rights(
        &self,
        workspace_id: WorkspaceId,
        group_id: GroupId,
    ) -> Result<()> {
        sqlx::query("DELETE FROM workspace_group_rights WHERE workspace_id = ? AND group_id = ?")
            .bind(workspace_id.0)
            .bind(group_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn has_write_access(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM workspaces
                           WHERE id = ?1 AND owner_user_id = ?2)
                 OR EXISTS(SELECT 1 FROM workspace_user_rights
                           WHERE workspace_id = ?1 AND user_id = ?2 AND can_write = 1)
                 OR EXISTS(SELECT 1 FROM workspace_group_rights r
                           INNER JOIN group_members m ON m.group_id = r.group_id
                           WHERE r.workspace_id = ?1 AND m.user_id = ?2 AND r.can_write = 1)",
        )
        .bind(workspace_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    /// Public visibility grants read to everyone, never write.
    pub async fn has_read_access(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM workspaces
                           WHERE id = ?1 AND (owner_user_id = ?2 OR is_public = 1))
                 OR EXISTS(SELECT 1 FROM workspace_user_rights
                           WHERE workspace_id = ?1 AND user_id = ?2 AND can_read = 1)
                 OR EXISTS(SELECT 1 FROM workspace_group_rights r
                           INNER JOIN group_members m ON m.group_id = r.group_id
                           WHERE r.workspace_id = ?1 AND m.user_id = ?2 AND r.can_read = 1)",
        )
        .bind(workspace_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    pub async fn create_document(&self, title: &str, owner: UserId) -> Result<DocumentId> {
        let rec = sqlx::query(
            "INSERT INTO documents (title, owner_user_id) VALUES (?, ?) RETURNING id",
        )
        .bind(title)
        .bind(owner.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(DocumentId(rec.get::<i64, _>(0)))
    }

    pub async fn document_by_id(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, title, owner_user_id, workspace_id, created_at
             FROM documents
             WHERE id = ?",
        )
        .bind(document_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredDocument {
            document_id: DocumentId(r.get::<i64, _>(0)),
            title: r.get::<String, _>(1),
            owner_user_id: UserId(r.get::<i64, _>(2)),
            workspace_id: r.get::<Option<i64>, _>(3).map(WorkspaceId),
            created_at: r.get::<DateTime<Utc>, _>(4),
        }))
    }

    pub async fn assign_document(
        &self,
        document_id: DocumentId,
        workspace_id: WorkspaceId,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET workspace_id = ? WHERE id = ?")
            .bind(workspace_id.0)
            .bind(document_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn workspace_from_row(r: sqlx::sqlite::SqliteRow) -> StoredWorkspace {
    StoredWorkspace {
        workspace_id: WorkspaceId(r.get::<i64, _>(0)),
        title: r.get::<String, _>(1),
        owner_user_id: UserId(r.get::<i64, _>(2)),
        is_public: r.get::<bool, _>(3),
        created_at: r.get::<DateTime<Utc>, _>(4),
    }
}

fn group_from_row(r: sqlx::sqlite::SqliteRow) -> StoredGroup {
    StoredGroup {
        group_id: GroupId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        is_builtin: r.get::<bool, _>(2),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if let Some(parent) = sqlite_path(database_url).as_deref().and_then(Path::parent) {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create directory '{}' for database url '{database_url}'",
                parent.display()
            )
        })?;
    }
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
