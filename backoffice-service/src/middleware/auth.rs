//! Session auth middleware.
//!
//! Portal and admin routes carry a bearer session token. Missing or invalid
//! tokens are a 401; a valid session with the wrong role is a 403. Handlers
//! read the verified claims through the `CurrentUser` extractor.

use crate::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CUSTOMER: &str = "customer";

/// Verified session claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the account identifier.
    pub sub: String,
    /// Customer row this session belongs to, absent for admin sessions.
    pub customer_id: Option<i64>,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// Signs and verifies session tokens with the configured secret.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn encode(&self, claims: &SessionClaims) -> Result<String, AppError> {
        Ok(encode(&Header::default(), claims, &self.encoding)?)
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, AppError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Require a valid session of any role.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid session token"))
    })?;

    let claims = state.sessions.decode(token).map_err(|_| {
        AppError::Unauthorized(anyhow::anyhow!("Invalid or expired session token"))
    })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Require an admin session. Runs after `auth_middleware`.
pub async fn require_admin_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<SessionClaims>()
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing session")))?;

    if !claims.is_admin() {
        tracing::warn!(sub = %claims.sub, "Non-admin session attempted admin route");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Admin privileges required"
        )));
    }

    Ok(next.run(req).await)
}

/// Extractor for the verified session in handlers.
pub struct CurrentUser(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<SessionClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Session claims missing from request extensions"
            ))
        })?;

        Ok(CurrentUser(claims.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims(role: &str, exp_offset: i64) -> SessionClaims {
        let now = Utc::now().timestamp();
        SessionClaims {
            sub: "u1".to_string(),
            customer_id: Some(7),
            role: role.to_string(),
            exp: now + exp_offset,
            iat: now,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let keys = SessionKeys::new("test-secret");
        let token = keys.encode(&claims(ROLE_CUSTOMER, 3600)).unwrap();
        let decoded = keys.decode(&token).unwrap();
        assert_eq!(decoded.customer_id, Some(7));
        assert!(!decoded.is_admin());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = SessionKeys::new("test-secret");
        let token = keys.encode(&claims(ROLE_CUSTOMER, -3600)).unwrap();
        assert!(keys.decode(&token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let keys = SessionKeys::new("test-secret");
        let other = SessionKeys::new("other-secret");
        let token = keys.encode(&claims(ROLE_ADMIN, 3600)).unwrap();
        assert!(other.decode(&token).is_err());
    }
}
