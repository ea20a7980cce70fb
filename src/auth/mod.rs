use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config;

/// Bearer token claims: the user, their organization and their roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub org: Uuid,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, organization_id: Uuid, username: impl Into<String>, roles: Vec<String>) -> Self {
        let now = Utc::now();
        let expiry_hours = config::config().security.jwt_expiry_hours;
        Self {
            sub: user_id,
            org: organization_id,
            username: username.into(),
            roles,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
    #[error("JWT secret not configured")]
    InvalidSecret,
}

fn secret() -> Result<&'static str, JwtError> {
    let secret = config::config().security.jwt_secret.as_str();
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    Ok(secret)
}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    let key = EncodingKey::from_secret(secret()?.as_bytes());
    encode(&Header::default(), claims, &key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Verify an HS256 token and return its claims
pub fn decode_jwt(token: &str) -> Result<Claims, JwtError> {
    let key = DecodingKey::from_secret(secret()?.as_bytes());
    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_claims() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "ops", vec!["ROLE_ADMIN".into()]);
        let token = generate_jwt(&claims).unwrap();
        let decoded = decode_jwt(&token).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.org, claims.org);
        assert_eq!(decoded.roles, vec!["ROLE_ADMIN".to_string()]);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "ops", vec![]);
        let mut token = generate_jwt(&claims).unwrap();
        token.push('x');
        assert!(matches!(decode_jwt(&token), Err(JwtError::InvalidToken(_))));
    }
}
