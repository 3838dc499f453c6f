use crate::pool::DbPool;
use crate::repositories::utils::map_db_error;
use anyhow::Context;
use async_trait::async_trait;
use services::account::{Account, Role};
use services::common::RepositoryError;
use services::organization::domain::OrgMember;
use services::organization::ports::MembershipRepository;
use tokio_postgres::Row;
use tracing::debug;

/// Postgres-backed membership store, one versioned row per (org, user).
pub struct PgMemberRepository {
    pool: DbPool,
}

impl PgMemberRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_member(row: &Row) -> Result<OrgMember, RepositoryError> {
        let conversion = RepositoryError::DataConversionError;

        let org_name: String = row.get("org_name");
        let username: String = row.get("username");
        let role: String = row.get("role");

        Ok(OrgMember {
            id: row.get("id"),
            org_name: Account::new(org_name).map_err(|e| conversion(e.into()))?,
            username: Account::new(username).map_err(|e| conversion(e.into()))?,
            role: role
                .parse()
                .map_err(|e: services::account::InvalidRole| conversion(e.into()))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            version: row.get("version"),
        })
    }
}

#[async_trait]
impl MembershipRepository for PgMemberRepository {
    async fn add(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        // The unique (org_name, username) constraint turns a duplicate insert
        // into AlreadyExists via map_db_error.
        let row = client
            .query_one(
                r#"
                INSERT INTO org_members (
                    id, org_name, username, role, created_at, updated_at, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
                &[
                    &member.id,
                    &member.org_name.as_str(),
                    &member.username.as_str(),
                    &member.role.to_string(),
                    &member.created_at,
                    &member.updated_at,
                    &member.version,
                ],
            )
            .await
            .map_err(map_db_error)?;

        debug!(
            "Added member {} to organization {} with role {}",
            member.username, member.org_name, member.role
        );
        Self::row_to_member(&row)
    }

    async fn save(&self, member: &OrgMember) -> Result<OrgMember, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let row = client
            .query_opt(
                r#"
                UPDATE org_members
                SET role = $2, updated_at = $3, version = version + 1
                WHERE id = $1 AND version = $4
                RETURNING *
                "#,
                &[
                    &member.id,
                    &member.role.to_string(),
                    &member.updated_at,
                    &member.version,
                ],
            )
            .await
            .map_err(map_db_error)?;

        match row {
            Some(row) => Self::row_to_member(&row),
            None => {
                let exists = client
                    .query_opt("SELECT 1 FROM org_members WHERE id = $1", &[&member.id])
                    .await
                    .map_err(map_db_error)?;
                if exists.is_some() {
                    Err(RepositoryError::ConcurrentUpdate)
                } else {
                    Err(RepositoryError::NotFound(member.username.to_string()))
                }
            }
        }
    }

    async fn delete(&self, member: &OrgMember) -> Result<(), RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows_affected = client
            .execute("DELETE FROM org_members WHERE id = $1", &[&member.id])
            .await
            .map_err(map_db_error)?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound(member.username.to_string()));
        }

        debug!(
            "Removed member {} from organization {}",
            member.username, member.org_name
        );
        Ok(())
    }

    async fn delete_by_org(&self, org: &Account) -> Result<(), RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows_affected = client
            .execute(
                "DELETE FROM org_members WHERE org_name = $1",
                &[&org.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        debug!("Removed {} members of organization {}", rows_affected, org);
        Ok(())
    }

    async fn get_by_org(&self, org: &Account) -> Result<Vec<OrgMember>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows = client
            .query(
                "SELECT * FROM org_members WHERE org_name = $1 ORDER BY username",
                &[&org.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        rows.iter().map(Self::row_to_member).collect()
    }

    async fn get_by_org_and_role(
        &self,
        org: &Account,
        role: Role,
    ) -> Result<Vec<OrgMember>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows = client
            .query(
                "SELECT * FROM org_members WHERE org_name = $1 AND role = $2 ORDER BY username",
                &[&org.as_str(), &role.to_string()],
            )
            .await
            .map_err(map_db_error)?;

        rows.iter().map(Self::row_to_member).collect()
    }

    async fn get_by_org_and_user(
        &self,
        org: &Account,
        user: &Account,
    ) -> Result<Option<OrgMember>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let row = client
            .query_opt(
                "SELECT * FROM org_members WHERE org_name = $1 AND username = $2",
                &[&org.as_str(), &user.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        row.as_ref().map(Self::row_to_member).transpose()
    }

    async fn get_by_user(&self, user: &Account) -> Result<Vec<OrgMember>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows = client
            .query(
                "SELECT * FROM org_members WHERE username = $1 ORDER BY org_name",
                &[&user.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        rows.iter().map(Self::row_to_member).collect()
    }
}
