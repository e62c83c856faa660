//! Request authentication
//!
//! - [`identity_middleware`]: bearer JWT issued by the identity service
//! - [`gateway_ip::gateway_allowlist_middleware`]: source IP check on the
//!   gateway callback

pub mod gateway_ip;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::models::UserRole;

use crate::state::AppState;

/// JWT claims shared with the identity service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: UserRole,
    /// Expiration (Unix timestamp seconds)
    pub exp: usize,
    /// Issued at (Unix timestamp seconds)
    pub iat: usize,
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: UserRole,
}

impl Identity {
    /// Admins pass every role check
    pub fn require(&self, role: UserRole) -> Result<(), AppError> {
        if self.role == role || self.role == UserRole::Admin {
            return Ok(());
        }
        let code = if role == UserRole::Admin {
            ErrorCode::AdminRequired
        } else {
            ErrorCode::RoleRequired
        };
        Err(AppError::new(code).with_detail("requiredRole", format!("{role:?}").to_lowercase()))
    }
}

const TOKEN_EXPIRY_HOURS: i64 = 24;

/// Sign a token; used by tests and local tooling (the identity service issues real ones)
pub fn issue_token(
    user_id: i64,
    role: UserRole,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (now + chrono::Duration::hours(TOKEN_EXPIRY_HOURS)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn decode_identity(token: &str, secret: &str) -> Result<Identity, AppError> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("JWT validation failed: {e}");
        match e.kind() {
            ErrorKind::ExpiredSignature => AppError::token_expired(),
            _ => AppError::invalid_token("Invalid token"),
        }
    })?;

    let user_id = data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::invalid_token("Subject is not a user id"))?;
    Ok(Identity {
        user_id,
        role: data.claims.role,
    })
}

/// Verify the bearer token and insert [`Identity`] into the request
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized().into_response())?;

    let identity = decode_identity(token, &state.jwt_secret).map_err(IntoResponse::into_response)?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}
