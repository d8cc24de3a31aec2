//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult, map_unique};
use crate::repos::{
    AuditRepo, BootstrapRepo, FileRepo, OrganizationRepo, ShareRepo, TokenRepo, UserRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    UserRepo
    + TokenRepo
    + FileRepo
    + OrganizationRepo
    + ShareRepo
    + AuditRepo
    + BootstrapRepo
    + Send
    + Sync
{
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Option<Duration>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply the schema.
    ///
    /// `query_timeout_secs` bounds file writes and listings; `None` or `0`
    /// disables the bound.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection avoids "database is locked" under concurrent handlers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: query_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "sqlite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// After a guarded member write touched no row: `Conflict` when the
    /// member exists (the last-admin guard held), otherwise `Ok`.
    async fn refuse_if_member(
        &self,
        org_id: uuid::Uuid,
        user_id: uuid::Uuid,
    ) -> MetadataResult<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM organization_members WHERE org_id = ? AND user_id = ?)",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Err(MetadataError::Conflict(format!(
                "organization {org_id} must keep at least one active admin"
            )));
        }
        Ok(())
    }

    async fn timed<T, F>(&self, query: F) -> MetadataResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, query)
                .await
                .map_err(|_| MetadataError::Timeout(limit))?
                .map_err(MetadataError::from),
            None => query.await.map_err(MetadataError::from),
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn create_user(&self, user: &UserRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO users (
                    user_id, username, display_name, email, role, disabled, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user.user_id)
            .bind(&user.username)
            .bind(&user.display_name)
            .bind(&user.email)
            .bind(&user.role)
            .bind(user.disabled)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, || format!("username '{}'", user.username)))?;
            Ok(())
        }

        async fn get_user(&self, user_id: Uuid) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_user_by_username(&self, username: &str) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_users(&self) -> MetadataResult<Vec<UserRow>> {
            let rows = sqlx::query_as::<_, UserRow>("SELECT * FROM users ORDER BY username")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn set_user_role(
            &self,
            user_id: Uuid,
            role: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE user_id = ?")
                .bind(role)
                .bind(updated_at)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn set_user_disabled(
            &self,
            user_id: Uuid,
            disabled: bool,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE users SET disabled = ?, updated_at = ? WHERE user_id = ?")
                    .bind(disabled)
                    .bind(updated_at)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn count_users(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, user_id, token_hash, scopes, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(&token.scopes)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, || "token hash".to_string()))?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE tokens SET revoked_at = ? WHERE token_id = ? AND revoked_at IS NULL",
            )
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_tokens(&self, user_id: Option<Uuid>) -> MetadataResult<Vec<TokenRow>> {
            let rows = match user_id {
                Some(id) => {
                    sqlx::query_as::<_, TokenRow>(
                        "SELECT * FROM tokens WHERE user_id = ? ORDER BY created_at DESC",
                    )
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens ORDER BY created_at DESC")
                        .fetch_all(&self.pool)
                        .await?
                }
            };
            Ok(rows)
        }
    }

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn insert_file(&self, file: &FileRow) -> MetadataResult<bool> {
            let insert = sqlx::query(
                r#"
                INSERT INTO files (
                    file_id, owner_id, org_id, original_name, storage_path, size_bytes,
                    content_type, sha256, category, tags, course_code, description,
                    semester, subject, folder, is_public, gdpr_compliant, data_location,
                    idempotency_key, download_count, share_count, last_shared_at,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(owner_id, idempotency_key) DO NOTHING
                "#,
            )
            .bind(file.file_id)
            .bind(file.owner_id)
            .bind(file.org_id)
            .bind(&file.original_name)
            .bind(&file.storage_path)
            .bind(file.size_bytes)
            .bind(&file.content_type)
            .bind(&file.sha256)
            .bind(&file.category)
            .bind(&file.tags)
            .bind(&file.course_code)
            .bind(&file.description)
            .bind(&file.semester)
            .bind(&file.subject)
            .bind(&file.folder)
            .bind(file.is_public)
            .bind(file.gdpr_compliant)
            .bind(&file.data_location)
            .bind(&file.idempotency_key)
            .bind(file.download_count)
            .bind(file.share_count)
            .bind(file.last_shared_at)
            .bind(file.created_at)
            .bind(file.updated_at)
            .execute(&self.pool);

            match self.timed(insert).await {
                Ok(result) => Ok(result.rows_affected() > 0),
                Err(MetadataError::Database(sqlx::Error::Database(db_err)))
                    if db_err.is_unique_violation() =>
                {
                    Err(MetadataError::Constraint(format!(
                        "storage path already recorded: {}",
                        file.storage_path
                    )))
                }
                Err(err) => Err(err),
            }
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_by_idempotency_key(
            &self,
            owner_id: Uuid,
            key: &str,
        ) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE owner_id = ? AND idempotency_key = ?",
            )
            .bind(owner_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_files(&self, filter: &FileFilter) -> MetadataResult<Vec<FileRow>> {
            let mut query = sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM files WHERE 1 = 1");
            if let Some(owner_id) = filter.owner_id {
                query.push(" AND owner_id = ").push_bind(owner_id);
            }
            if let Some(org_id) = filter.org_id {
                query.push(" AND org_id = ").push_bind(org_id);
            }
            if let Some(category) = &filter.category {
                query.push(" AND category = ").push_bind(category.clone());
            }
            if let Some(course_code) = &filter.course_code {
                query.push(" AND course_code = ").push_bind(course_code.clone());
            }
            if let Some(tag) = &filter.tag {
                query
                    .push(" AND EXISTS (SELECT 1 FROM json_each(files.tags) WHERE json_each.value = ")
                    .push_bind(tag.clone())
                    .push(")");
            }
            query
                .push(" ORDER BY created_at DESC, file_id LIMIT ")
                .push_bind(filter.limit.clamp(1, 1000))
                .push(" OFFSET ")
                .push_bind(filter.offset.max(0));

            self.timed(query.build_query_as::<FileRow>().fetch_all(&self.pool))
                .await
        }

        async fn delete_file(&self, file_id: Uuid) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM file_shares WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn record_file_event(&self, file_id: Uuid, event: FileEvent) -> MetadataResult<()> {
            let result = match event {
                FileEvent::Downloaded => {
                    sqlx::query(
                        "UPDATE files SET download_count = download_count + 1 WHERE file_id = ?",
                    )
                    .bind(file_id)
                    .execute(&self.pool)
                    .await?
                }
                FileEvent::Shared { at } => {
                    sqlx::query(
                        "UPDATE files SET share_count = share_count + 1, last_shared_at = ? WHERE file_id = ?",
                    )
                    .bind(at)
                    .bind(file_id)
                    .execute(&self.pool)
                    .await?
                }
            };
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("file {file_id}")));
            }
            Ok(())
        }

        async fn storage_totals(&self) -> MetadataResult<StorageTotals> {
            let (files, bytes): (i64, i64) =
                sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM files")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(StorageTotals {
                files: files as u64,
                bytes: bytes as u64,
            })
        }
    }

    #[async_trait]
    impl OrganizationRepo for SqliteStore {
        async fn create_organization(
            &self,
            org: &OrganizationRow,
            creator: &MemberRow,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO organizations (
                    org_id, name, org_type, description, course_code, org_code,
                    max_members, is_public, created_by, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(org.org_id)
            .bind(&org.name)
            .bind(&org.org_type)
            .bind(&org.description)
            .bind(&org.course_code)
            .bind(&org.org_code)
            .bind(org.max_members)
            .bind(org.is_public)
            .bind(org.created_by)
            .bind(org.created_at)
            .bind(org.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique(e, || format!("organization code '{}'", org.org_code)))?;

            sqlx::query(
                r#"
                INSERT INTO organization_members (
                    org_id, user_id, role, status, invited_by, joined_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(creator.org_id)
            .bind(creator.user_id)
            .bind(&creator.role)
            .bind(&creator.status)
            .bind(creator.invited_by)
            .bind(creator.joined_at)
            .bind(creator.updated_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn get_organization(&self, org_id: Uuid) -> MetadataResult<Option<OrganizationRow>> {
            let row = sqlx::query_as::<_, OrganizationRow>(
                "SELECT * FROM organizations WHERE org_id = ?",
            )
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_organization_by_code(
            &self,
            org_code: &str,
        ) -> MetadataResult<Option<OrganizationRow>> {
            let row = sqlx::query_as::<_, OrganizationRow>(
                "SELECT * FROM organizations WHERE org_code = ?",
            )
            .bind(org_code)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_organizations_for_user(
            &self,
            user_id: Uuid,
        ) -> MetadataResult<Vec<OrganizationRow>> {
            let rows = sqlx::query_as::<_, OrganizationRow>(
                r#"
                SELECT o.* FROM organizations o
                JOIN organization_members m ON m.org_id = o.org_id
                WHERE m.user_id = ? AND m.status = 'active'
                ORDER BY o.name
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_organizations(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }

        async fn delete_organization(&self, org_id: Uuid) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM organization_members WHERE org_id = ?")
                .bind(org_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM organizations WHERE org_id = ?")
                .bind(org_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn add_member(&self, member: &MemberRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO organization_members (
                    org_id, user_id, role, status, invited_by, joined_at, updated_at
                )
                SELECT ?, ?, ?, ?, ?, ?, ?
                WHERE ? <> 'active'
                   OR (SELECT COUNT(*) FROM organization_members
                       WHERE org_id = ? AND status = 'active')
                    < (SELECT max_members FROM organizations WHERE org_id = ?)
                "#,
            )
            .bind(member.org_id)
            .bind(member.user_id)
            .bind(&member.role)
            .bind(&member.status)
            .bind(member.invited_by)
            .bind(member.joined_at)
            .bind(member.updated_at)
            .bind(&member.status)
            .bind(member.org_id)
            .bind(member.org_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_unique(e, || {
                    format!("user {} in organization {}", member.user_id, member.org_id)
                })
            })?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::Conflict(format!(
                    "organization {} is full",
                    member.org_id
                )));
            }
            Ok(())
        }

        async fn get_member(
            &self,
            org_id: Uuid,
            user_id: Uuid,
        ) -> MetadataResult<Option<MemberRow>> {
            let row = sqlx::query_as::<_, MemberRow>(
                "SELECT * FROM organization_members WHERE org_id = ? AND user_id = ?",
            )
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_members(
            &self,
            org_id: Uuid,
            filter: &MemberFilter,
        ) -> MetadataResult<Vec<MemberRow>> {
            let mut query = sqlx::QueryBuilder::<Sqlite>::new(
                "SELECT * FROM organization_members WHERE org_id = ",
            );
            query.push_bind(org_id);
            if let Some(role) = &filter.role {
                query.push(" AND role = ").push_bind(role.clone());
            }
            if let Some(status) = &filter.status {
                query.push(" AND status = ").push_bind(status.clone());
            }
            query.push(" ORDER BY joined_at");

            let rows = query
                .build_query_as::<MemberRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn update_member(
            &self,
            org_id: Uuid,
            user_id: Uuid,
            update: &MemberUpdate,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<Option<MemberRow>> {
            let row = sqlx::query_as::<_, MemberRow>(
                r#"
                UPDATE organization_members
                SET role = COALESCE(?, role), status = COALESCE(?, status), updated_at = ?
                WHERE org_id = ? AND user_id = ?
                  AND (
                    (COALESCE(?, role) = 'admin' AND COALESCE(?, status) = 'active')
                    OR NOT (role = 'admin' AND status = 'active')
                    OR (SELECT COUNT(*) FROM organization_members
                        WHERE org_id = ? AND role = 'admin' AND status = 'active') > 1
                  )
                RETURNING *
                "#,
            )
            .bind(&update.role)
            .bind(&update.status)
            .bind(updated_at)
            .bind(org_id)
            .bind(user_id)
            .bind(&update.role)
            .bind(&update.status)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => Ok(Some(row)),
                None => self.refuse_if_member(org_id, user_id).await.map(|()| None),
            }
        }

        async fn remove_member(&self, org_id: Uuid, user_id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                DELETE FROM organization_members
                WHERE org_id = ? AND user_id = ?
                  AND (
                    NOT (role = 'admin' AND status = 'active')
                    OR (SELECT COUNT(*) FROM organization_members
                        WHERE org_id = ? AND role = 'admin' AND status = 'active') > 1
                  )
                "#,
            )
            .bind(org_id)
            .bind(user_id)
            .bind(org_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(true);
            }
            self.refuse_if_member(org_id, user_id).await.map(|()| false)
        }

        async fn count_active_members(&self, org_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM organization_members WHERE org_id = ? AND status = 'active'",
            )
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }

        async fn count_admins(&self, org_id: Uuid) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM organization_members WHERE org_id = ? AND role = 'admin' AND status = 'active'",
            )
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl ShareRepo for SqliteStore {
        async fn create_share(&self, share: &ShareRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO file_shares (
                    share_id, file_id, shared_by, storage_path, signed_url_hash, purpose,
                    status, expires_at, created_at, revoked_at, revoked_by, access_count,
                    last_accessed_at, client_ip, user_agent
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(share.share_id)
            .bind(share.file_id)
            .bind(share.shared_by)
            .bind(&share.storage_path)
            .bind(&share.signed_url_hash)
            .bind(&share.purpose)
            .bind(&share.status)
            .bind(share.expires_at)
            .bind(share.created_at)
            .bind(share.revoked_at)
            .bind(share.revoked_by)
            .bind(share.access_count)
            .bind(share.last_accessed_at)
            .bind(&share.client_ip)
            .bind(&share.user_agent)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_share(&self, share_id: Uuid) -> MetadataResult<Option<ShareRow>> {
            let row =
                sqlx::query_as::<_, ShareRow>("SELECT * FROM file_shares WHERE share_id = ?")
                    .bind(share_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn revoke_share(
            &self,
            share_id: Uuid,
            revoked_by: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE file_shares SET status = 'revoked', revoked_at = ?, revoked_by = ?
                WHERE share_id = ? AND status = 'active'
                "#,
            )
            .bind(revoked_at)
            .bind(revoked_by)
            .bind(share_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn mark_share_expired(&self, share_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE file_shares SET status = 'expired' WHERE share_id = ? AND status = 'active'",
            )
            .bind(share_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn expire_shares(&self, now: OffsetDateTime) -> MetadataResult<Vec<Uuid>> {
            let ids: Vec<Uuid> = sqlx::query_scalar(
                r#"
                UPDATE file_shares SET status = 'expired'
                WHERE status = 'active' AND datetime(expires_at) <= datetime(?)
                RETURNING share_id
                "#,
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(ids)
        }

        async fn record_share_access(
            &self,
            share_id: Uuid,
            accessed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE file_shares SET access_count = access_count + 1, last_accessed_at = ? WHERE share_id = ?",
            )
            .bind(accessed_at)
            .bind(share_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_shares_for_file(&self, file_id: Uuid) -> MetadataResult<Vec<ShareRow>> {
            let rows = sqlx::query_as::<_, ShareRow>(
                "SELECT * FROM file_shares WHERE file_id = ? ORDER BY created_at DESC",
            )
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn count_active_shares(&self) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM file_shares WHERE status = 'active'")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }
    }

    #[async_trait]
    impl AuditRepo for SqliteStore {
        async fn append_audit(&self, entry: &AuditLogRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO sharing_audit_log (
                    audit_id, action, share_id, file_id, user_id, details,
                    client_ip, user_agent, retention_period, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.audit_id)
            .bind(&entry.action)
            .bind(entry.share_id)
            .bind(entry.file_id)
            .bind(entry.user_id)
            .bind(&entry.details)
            .bind(&entry.client_ip)
            .bind(&entry.user_agent)
            .bind(&entry.retention_period)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_audit(&self, filter: &AuditFilter) -> MetadataResult<Vec<AuditLogRow>> {
            let mut query =
                sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM sharing_audit_log WHERE 1 = 1");
            if let Some(action) = &filter.action {
                query.push(" AND action = ").push_bind(action.clone());
            }
            if let Some(file_id) = filter.file_id {
                query.push(" AND file_id = ").push_bind(file_id);
            }
            if let Some(share_id) = filter.share_id {
                query.push(" AND share_id = ").push_bind(share_id);
            }
            query
                .push(" ORDER BY created_at DESC LIMIT ")
                .push_bind(filter.limit.clamp(1, 1000));

            let rows = query
                .build_query_as::<AuditLogRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl BootstrapRepo for SqliteStore {
        async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            value
                .flatten()
                .filter(|id| !id.is_empty())
                .map(|id| {
                    Uuid::parse_str(&id).map_err(|e| {
                        MetadataError::Internal(format!("invalid bootstrap_token_id '{id}': {e}"))
                    })
                })
                .transpose()
        }

        async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (id, bootstrap_token_id)
                VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE
                SET bootstrap_token_id = excluded.bootstrap_token_id
                "#,
            )
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_bootstrap_token_id(&self) -> MetadataResult<()> {
            sqlx::query("UPDATE bootstrap_state SET bootstrap_token_id = NULL WHERE id = 1")
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id BLOB PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT,
    email TEXT,
    role TEXT NOT NULL DEFAULT 'user',
    disabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(user_id),
    token_hash TEXT NOT NULL UNIQUE,
    scopes TEXT NOT NULL,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);

CREATE TABLE IF NOT EXISTS organizations (
    org_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    org_type TEXT NOT NULL,
    description TEXT,
    course_code TEXT,
    org_code TEXT NOT NULL UNIQUE,
    max_members INTEGER NOT NULL,
    is_public INTEGER NOT NULL DEFAULT 0,
    created_by BLOB NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organization_members (
    org_id BLOB NOT NULL REFERENCES organizations(org_id),
    user_id BLOB NOT NULL REFERENCES users(user_id),
    role TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    invited_by BLOB,
    joined_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (org_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_members_user ON organization_members(user_id, status);

CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    owner_id BLOB NOT NULL REFERENCES users(user_id),
    org_id BLOB,
    original_name TEXT NOT NULL,
    storage_path TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL,
    content_type TEXT,
    sha256 TEXT NOT NULL,
    category TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    course_code TEXT,
    description TEXT,
    semester TEXT,
    subject TEXT,
    folder TEXT NOT NULL,
    is_public INTEGER NOT NULL DEFAULT 0,
    gdpr_compliant INTEGER NOT NULL DEFAULT 1,
    data_location TEXT NOT NULL DEFAULT 'EU',
    idempotency_key TEXT,
    download_count INTEGER NOT NULL DEFAULT 0,
    share_count INTEGER NOT NULL DEFAULT 0,
    last_shared_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (owner_id, idempotency_key)
);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id, created_at);
CREATE INDEX IF NOT EXISTS idx_files_org ON files(org_id, created_at);
CREATE INDEX IF NOT EXISTS idx_files_course ON files(course_code);

CREATE TABLE IF NOT EXISTS file_shares (
    share_id BLOB PRIMARY KEY,
    file_id BLOB NOT NULL REFERENCES files(file_id),
    shared_by BLOB NOT NULL,
    storage_path TEXT NOT NULL,
    signed_url_hash TEXT NOT NULL,
    purpose TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT,
    revoked_by BLOB,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    client_ip TEXT,
    user_agent TEXT
);
CREATE INDEX IF NOT EXISTS idx_shares_file ON file_shares(file_id);
CREATE INDEX IF NOT EXISTS idx_shares_status ON file_shares(status, expires_at);

-- Audit rows outlive the shares and files they describe: no foreign keys.
CREATE TABLE IF NOT EXISTS sharing_audit_log (
    audit_id BLOB PRIMARY KEY,
    action TEXT NOT NULL,
    share_id BLOB,
    file_id BLOB,
    user_id BLOB,
    details TEXT NOT NULL DEFAULT '{}',
    client_ip TEXT,
    user_agent TEXT,
    retention_period TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_created ON sharing_audit_log(created_at);

CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
"#;
