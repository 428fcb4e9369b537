//! Authorization gate
//!
//! Turns an `Authorization` header plus the permissions a route accepts into
//! the caller's identity, or `Unauthenticated` / `Forbidden`.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::jwt::{extract_token_from_header, Claims, JwtValidator};
use super::permissions::{Permission, PermissionSet};
use super::revocation::RevocationList;
use crate::types::{AccoladeError, Result};

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct Identity {
    pub account_id: Uuid,
    pub role_id: Uuid,
    pub role: String,
    pub permissions: PermissionSet,
    /// Raw token, kept for logout and refresh
    pub token: String,
    pub claims: Claims,
}

impl Identity {
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }
}

pub struct AuthorizationGate {
    jwt: JwtValidator,
    revoked: Arc<dyn RevocationList>,
}

impl AuthorizationGate {
    pub fn new(jwt: JwtValidator, revoked: Arc<dyn RevocationList>) -> Self {
        Self { jwt, revoked }
    }

    pub fn jwt(&self) -> &JwtValidator {
        &self.jwt
    }

    pub fn revocations(&self) -> &dyn RevocationList {
        self.revoked.as_ref()
    }

    /// Validate the bearer token without any permission requirement
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<Identity> {
        let token = extract_token_from_header(auth_header).ok_or_else(|| {
            AccoladeError::Unauthenticated("missing or malformed bearer token".into())
        })?;

        if self.revoked.is_revoked(token) {
            return Err(AccoladeError::Unauthenticated("token has been revoked".into()));
        }

        let claims = self.jwt.verify_token(token)?;
        Ok(Identity {
            account_id: claims.sub,
            role_id: claims.role_id,
            role: claims.role.clone(),
            permissions: claims.permissions.iter().copied().collect(),
            token: token.to_string(),
            claims,
        })
    }

    /// Authenticate and require at least one of `required`
    pub fn authorize(&self, auth_header: Option<&str>, required: &[Permission]) -> Result<Identity> {
        let identity = self.authenticate(auth_header)?;
        if !identity.permissions.any_of(required) {
            debug!(
                account = %identity.account_id,
                role = %identity.role,
                "Permission denied"
            );
            let wanted: Vec<String> = required.iter().map(|p| p.to_string()).collect();
            return Err(AccoladeError::Forbidden(format!(
                "requires one of: {}",
                wanted.join(", ")
            )));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenInput;
    use crate::auth::revocation::MemoryRevocationList;

    fn gate() -> (AuthorizationGate, Arc<MemoryRevocationList>) {
        let revoked = Arc::new(MemoryRevocationList::new());
        (
            AuthorizationGate::new(JwtValidator::new_dev(), revoked.clone()),
            revoked,
        )
    }

    fn student_token(gate: &AuthorizationGate) -> (String, Claims) {
        gate.jwt()
            .generate_token(TokenInput {
                account_id: Uuid::new_v4(),
                email: "student@campus.ac.id".into(),
                role_id: Uuid::new_v4(),
                role: "Mahasiswa".into(),
                permissions: vec![Permission::AchievementCreate, Permission::AchievementRead],
            })
            .unwrap()
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let (gate, _) = gate();
        let err = gate.authorize(None, &[Permission::AchievementRead]).unwrap_err();
        assert!(matches!(err, AccoladeError::Unauthenticated(_)));
        let err = gate
            .authorize(Some("Token abc"), &[Permission::AchievementRead])
            .unwrap_err();
        assert!(matches!(err, AccoladeError::Unauthenticated(_)));
    }

    #[test]
    fn test_permission_any_of() {
        let (gate, _) = gate();
        let (token, claims) = student_token(&gate);
        let header = format!("Bearer {token}");

        let identity = gate
            .authorize(Some(&header), &[Permission::ReportRead, Permission::AchievementCreate])
            .unwrap();
        assert_eq!(identity.account_id, claims.sub);
        assert!(identity.can(Permission::AchievementRead));

        let err = gate
            .authorize(Some(&header), &[Permission::AchievementVerify])
            .unwrap_err();
        assert!(matches!(err, AccoladeError::Forbidden(_)));
    }

    #[test]
    fn test_revoked_token_rejected() {
        let (gate, revoked) = gate();
        let (token, claims) = student_token(&gate);
        let header = format!("Bearer {token}");
        assert!(gate.authenticate(Some(&header)).is_ok());

        revoked.revoke(&token, claims.exp);
        let err = gate.authenticate(Some(&header)).unwrap_err();
        assert!(matches!(err, AccoladeError::Unauthenticated(_)));
    }
}
