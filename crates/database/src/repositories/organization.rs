use crate::pool::DbPool;
use crate::repositories::utils::map_db_error;
use anyhow::Context;
use async_trait::async_trait;
use services::account::Account;
use services::common::RepositoryError;
use services::organization::domain::{Approve, Organization};
use services::organization::ports::OrganizationRepository;
use tokio_postgres::Row;
use tracing::debug;

/// Postgres-backed organization store. The pending approve list is persisted
/// as a JSONB column, so a single versioned row carries the whole aggregate.
pub struct PgOrganizationRepository {
    pool: DbPool,
}

impl PgOrganizationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_org(row: &Row) -> Result<Organization, RepositoryError> {
        let conversion = RepositoryError::DataConversionError;

        let name: String = row.get("name");
        let owner: String = row.get("owner");
        let default_role: String = row.get("default_role");
        let approves: serde_json::Value = row.get("approves");
        let approves: Vec<Approve> =
            serde_json::from_value(approves).map_err(|e| conversion(e.into()))?;

        Ok(Organization {
            id: row.get("id"),
            name: Account::new(name).map_err(|e| conversion(e.into()))?,
            full_name: row.get("full_name"),
            description: row.get("description"),
            website: row.get("website"),
            avatar_id: row.get("avatar_id"),
            owner: Account::new(owner).map_err(|e| conversion(e.into()))?,
            default_role: default_role
                .parse()
                .map_err(|e: services::account::InvalidRole| conversion(e.into()))?,
            allow_request: row.get("allow_request"),
            approves,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            version: row.get("version"),
        })
    }

    fn approves_json(org: &Organization) -> Result<serde_json::Value, RepositoryError> {
        serde_json::to_value(&org.approves)
            .map_err(|e| RepositoryError::DataConversionError(e.into()))
    }
}

#[async_trait]
impl OrganizationRepository for PgOrganizationRepository {
    async fn add(&self, org: &Organization) -> Result<Organization, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let row = client
            .query_one(
                r#"
                INSERT INTO organizations (
                    id, name, full_name, description, website, avatar_id, owner,
                    default_role, allow_request, approves, created_at, updated_at, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                RETURNING *
                "#,
                &[
                    &org.id,
                    &org.name.as_str(),
                    &org.full_name,
                    &org.description,
                    &org.website,
                    &org.avatar_id,
                    &org.owner.as_str(),
                    &org.default_role.to_string(),
                    &org.allow_request,
                    &Self::approves_json(org)?,
                    &org.created_at,
                    &org.updated_at,
                    &org.version,
                ],
            )
            .await
            .map_err(map_db_error)?;

        debug!("Created organization: {}", org.name);
        Self::row_to_org(&row)
    }

    async fn save(&self, org: &Organization) -> Result<Organization, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        // Compare-and-swap on the version the aggregate was read with.
        let row = client
            .query_opt(
                r#"
                UPDATE organizations
                SET full_name = $2, description = $3, website = $4, avatar_id = $5,
                    owner = $6, default_role = $7, allow_request = $8, approves = $9,
                    updated_at = $10, version = version + 1
                WHERE name = $1 AND version = $11
                RETURNING *
                "#,
                &[
                    &org.name.as_str(),
                    &org.full_name,
                    &org.description,
                    &org.website,
                    &org.avatar_id,
                    &org.owner.as_str(),
                    &org.default_role.to_string(),
                    &org.allow_request,
                    &Self::approves_json(org)?,
                    &org.updated_at,
                    &org.version,
                ],
            )
            .await
            .map_err(map_db_error)?;

        match row {
            Some(row) => Self::row_to_org(&row),
            None => {
                // Distinguish a lost CAS from a deleted row.
                let exists = client
                    .query_opt(
                        "SELECT 1 FROM organizations WHERE name = $1",
                        &[&org.name.as_str()],
                    )
                    .await
                    .map_err(map_db_error)?;
                if exists.is_some() {
                    Err(RepositoryError::ConcurrentUpdate)
                } else {
                    Err(RepositoryError::NotFound(org.name.to_string()))
                }
            }
        }
    }

    async fn delete(&self, org: &Organization) -> Result<(), RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows_affected = client
            .execute(
                "DELETE FROM organizations WHERE name = $1",
                &[&org.name.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound(org.name.to_string()));
        }

        debug!("Deleted organization: {}", org.name);
        Ok(())
    }

    async fn get_by_name(&self, name: &Account) -> Result<Option<Organization>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let row = client
            .query_opt(
                "SELECT * FROM organizations WHERE name = $1",
                &[&name.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        row.as_ref().map(Self::row_to_org).transpose()
    }

    async fn get_by_owner(&self, owner: &Account) -> Result<Vec<Organization>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows = client
            .query(
                "SELECT * FROM organizations WHERE owner = $1 ORDER BY name",
                &[&owner.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        rows.iter().map(Self::row_to_org).collect()
    }

    async fn count_by_owner(&self, owner: &Account) -> Result<i64, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let row = client
            .query_one(
                "SELECT COUNT(*) FROM organizations WHERE owner = $1",
                &[&owner.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        Ok(row.get(0))
    }

    async fn get_by_pending_user(
        &self,
        user: &Account,
    ) -> Result<Vec<Organization>, RepositoryError> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get database connection")
            .map_err(RepositoryError::PoolError)?;

        let rows = client
            .query(
                r#"
                SELECT * FROM organizations
                WHERE EXISTS (
                    SELECT 1 FROM jsonb_array_elements(approves) AS entry
                    WHERE entry->>'status' = 'pending'
                      AND (entry->>'username' = $1 OR entry->>'inviter' = $1)
                )
                ORDER BY name
                "#,
                &[&user.as_str()],
            )
            .await
            .map_err(map_db_error)?;

        rows.iter().map(Self::row_to_org).collect()
    }
}
