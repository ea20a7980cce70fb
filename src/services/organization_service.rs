use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::database::models::Organization;
use crate::database::Repository;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub description: Option<String>,
}

pub struct OrganizationService {
    pool: PgPool,
}

impl OrganizationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repository(&self) -> Repository<Organization> {
        Repository::new("organizations", "Organization", self.pool.clone()).with_soft_delete()
    }

    pub async fn find(&self, id: Uuid) -> ServiceResult<Option<Organization>> {
        Ok(self.repository().find_by_id(id).await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Organization> {
        self.find(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Organization not found: {}", id)))
    }

    pub async fn find_by_name(&self, name: &str) -> ServiceResult<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(
            "SELECT * FROM organizations WHERE name = $1 AND deleted_at IS NULL",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(org)
    }

    /// Look up an organization by name, creating it on first use
    pub async fn get_or_create_default(&self, name: &str) -> ServiceResult<Organization> {
        if let Some(org) = self.find_by_name(name).await? {
            return Ok(org);
        }

        let inserted = sqlx::query_as::<_, Organization>(
            "INSERT INTO organizations (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING *",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(org) => {
                tracing::info!("Created organization '{}' ({})", org.name, org.id);
                Ok(org)
            }
            // Lost a race with another writer
            None => self
                .find_by_name(name)
                .await?
                .ok_or_else(|| ServiceError::conflict(format!("Organization '{}' is unavailable", name))),
        }
    }

    pub async fn list(&self) -> ServiceResult<Vec<Organization>> {
        let orgs = sqlx::query_as::<_, Organization>(
            "SELECT * FROM organizations WHERE deleted_at IS NULL ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(orgs)
    }

    pub async fn create(&self, request: CreateOrganizationRequest) -> ServiceResult<Organization> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::bad_request("Organization name is required"));
        }

        let org = sqlx::query_as::<_, Organization>(
            "INSERT INTO organizations (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(&request.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::on_unique_violation(e, format!("Organization already exists: {}", name)))?;

        tracing::info!("Created organization '{}' ({})", org.name, org.id);
        Ok(org)
    }
}
