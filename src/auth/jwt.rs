//! JWT issue and verification
//!
//! Tokens are HS256-signed with the server secret and carry the account id,
//! role and the role's permission list at the time of login. Permissions are
//! not re-read from the database per request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::auth::Permission;
use crate::types::{AccoladeError, Result};

/// Minimum accepted secret length
pub const MIN_SECRET_LEN: usize = 32;

/// Payload stored in the token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: Uuid,
    pub email: String,
    pub role_id: Uuid,
    pub role: String,
    pub permissions: Vec<Permission>,
    /// Unique per token so a refresh never reproduces a revoked token
    pub jti: Uuid,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiration time (Unix seconds)
    pub exp: u64,
}

/// Account facts needed to issue a token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub account_id: Uuid,
    pub email: String,
    pub role_id: Uuid,
    pub role: String,
    pub permissions: Vec<Permission>,
}

impl From<&Claims> for TokenInput {
    fn from(claims: &Claims) -> Self {
        Self {
            account_id: claims.sub,
            email: claims.email.clone(),
            role_id: claims.role_id,
            role: claims.role.clone(),
            permissions: claims.permissions.clone(),
        }
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| AccoladeError::Internal(format!("system time error: {e}")))
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Returns an error if the secret is empty or shorter than 32 characters
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(AccoladeError::Config(
                "JWT_SECRET is required outside dev mode".into(),
            ));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(AccoladeError::Config(format!(
                "JWT_SECRET must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Fixed secret for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: "accolade-dev-secret-not-for-production-use".into(),
            expiry_seconds: 24 * 60 * 60,
        }
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Sign a fresh token for `input`
    pub fn generate_token(&self, input: TokenInput) -> Result<(String, Claims)> {
        let now = unix_now()?;
        let claims = Claims {
            sub: input.account_id,
            email: input.email,
            role_id: input.role_id,
            role: input.role,
            permissions: input.permissions,
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AccoladeError::Internal(format!("failed to sign token: {e}")))?;

        Ok((token, claims))
    }

    /// Check signature and expiry and decode the claims
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidToken => "invalid token",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::Json(_) => "token claims are malformed",
                _ => "token validation failed",
            };
            AccoladeError::Unauthenticated(reason.into())
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}
