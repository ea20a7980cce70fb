use sqlx::{postgres::PgRow, FromRow, PgPool};
use uuid::Uuid;

use crate::database::manager::DatabaseError;

/// Organization-scoped reads over one table.
///
/// Table names are compile-time constants owned by the services, never user
/// input. Tables with soft-delete columns hide deleted rows from every query.
pub struct Repository<T> {
    table_name: &'static str,
    entity: &'static str,
    soft_delete: bool,
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    pub fn new(table_name: &'static str, entity: &'static str, pool: PgPool) -> Self {
        Self {
            table_name,
            entity,
            soft_delete: false,
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    fn live_clause(&self) -> &'static str {
        if self.soft_delete {
            " AND deleted_at IS NULL"
        } else {
            ""
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<T>, DatabaseError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1{}",
            self.table_name,
            self.live_clause()
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_in_org(&self, id: Uuid, organization_id: Uuid) -> Result<Option<T>, DatabaseError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1 AND organization_id = $2{}",
            self.table_name,
            self.live_clause()
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_404(&self, id: Uuid, organization_id: Uuid) -> Result<T, DatabaseError> {
        self.find_in_org(id, organization_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} not found: {}", self.entity, id)))
    }

    /// Newest first
    pub async fn list_in_org(&self, organization_id: Uuid) -> Result<Vec<T>, DatabaseError> {
        let sql = format!(
            "SELECT * FROM {} WHERE organization_id = $1{} ORDER BY created_at DESC",
            self.table_name,
            self.live_clause()
        );
        let rows = sqlx::query_as::<_, T>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
