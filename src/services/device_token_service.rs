use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::database::models::Device;

/// True when `candidate` is a lowercase canonical UUID string
pub fn is_device_token(candidate: &str) -> bool {
    candidate.len() == 36
        && candidate.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_digit() || ('a'..='f').contains(&c),
        })
}

pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

/// First characters of a token, safe to log
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

/// `12345678...cdef` form for display; short tokens are fully hidden
pub fn mask_token(token: &str) -> String {
    match (token.get(..8), token.len().checked_sub(4).and_then(|i| token.get(i..))) {
        (Some(head), Some(tail)) if token.len() > 12 => format!("{}...{}", head, tail),
        _ => "****".to_string(),
    }
}

pub struct DeviceTokenService {
    pool: PgPool,
}

impl DeviceTokenService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active, non-deleted device owning `token`
    pub async fn get_device_by_token(&self, token: &str) -> ServiceResult<Option<Device>> {
        if !is_device_token(token) {
            return Ok(None);
        }
        let device = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE api_token = $1 AND active = TRUE AND deleted_at IS NULL",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    pub async fn assign_token(&self, device_id: Uuid) -> ServiceResult<(Device, String)> {
        let token = generate_token();
        let device = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET api_token = $2, token_created_at = $3, token_last_used_at = NULL, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(device_id)
        .bind(&token)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("Device not found: {}", device_id)))?;

        Ok((device, token))
    }

    pub async fn rotate_token(&self, device: &Device) -> ServiceResult<(Device, String)> {
        let old_prefix = device
            .api_token
            .as_deref()
            .map(token_prefix)
            .unwrap_or("none")
            .to_string();

        let (updated, token) = self.assign_token(device.id).await?;
        tracing::info!(
            "Rotated API token for device {} (old token {}...)",
            updated.external_id,
            old_prefix
        );
        Ok((updated, token))
    }

    pub async fn revoke_token(&self, device: &Device) -> ServiceResult<Device> {
        let updated = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET api_token = NULL, token_created_at = NULL, token_last_used_at = NULL, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(device.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Revoked API token for device {}", updated.external_id);
        Ok(updated)
    }

    pub async fn update_token_last_used(&self, token: &str) -> ServiceResult<()> {
        sqlx::query("UPDATE devices SET token_last_used_at = now() WHERE api_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_lowercase_uuid_tokens() {
        assert!(is_device_token(&generate_token()));
        assert!(is_device_token("123e4567-e89b-42d3-a456-426614174000"));
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(!is_device_token(""));
        assert!(!is_device_token("123E4567-E89B-42D3-A456-426614174000"));
        assert!(!is_device_token("123e4567e89b42d3a456426614174000"));
        assert!(!is_device_token("123e4567-e89b-42d3-a456-42661417400g"));
        assert!(!is_device_token("eyJhbGciOiJIUzI1NiJ9.e30.sig"));
    }

    #[test]
    fn masked_tokens_keep_both_ends() {
        assert_eq!(mask_token("123e4567-e89b-42d3-a456-426614174000"), "123e4567...4000");
        assert_eq!(mask_token("short"), "****");
    }

    #[test]
    fn prefix_is_at_most_eight_chars() {
        assert_eq!(token_prefix("123e4567-e89b"), "123e4567");
        assert_eq!(token_prefix("abc"), "abc");
    }
}
