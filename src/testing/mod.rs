//! Fixtures for unit tests. Nothing here touches the database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::models::{Device, User};
use crate::middleware::AuthUser;
use crate::types::DeviceStatus;

pub fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| r.to_string()).collect()
}

/// Enabled, live user in a fresh organization
pub fn user(role_names: &[&str]) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        username: "operator".into(),
        email: None,
        first_name: None,
        last_name: None,
        roles: roles(role_names),
        enabled: true,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        deleted_by: None,
        deletion_reason: None,
    }
}

pub fn auth_user(role_names: &[&str]) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        username: "admin".into(),
        roles: roles(role_names),
    }
}

pub fn device(external_id: &str, status: DeviceStatus, last_seen_at: Option<DateTime<Utc>>) -> Device {
    let now = Utc::now();
    Device {
        id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        external_id: external_id.into(),
        name: external_id.into(),
        description: None,
        active: true,
        location: None,
        sensor_type: None,
        firmware_version: None,
        status,
        last_seen_at,
        latitude: None,
        longitude: None,
        altitude: None,
        api_token: None,
        token_created_at: None,
        token_last_used_at: None,
        health_score: 0,
        last_health_check_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        deleted_by: None,
        deletion_reason: None,
    }
}
