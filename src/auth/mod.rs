//! Authentication and authorization
//!
//! Provides:
//! - JWT token generation and validation
//! - Closed `resource:action` permission set and role grants
//! - Token revocation for logout and refresh
//! - The authorization gate used by every protected route
//! - Password hashing with Argon2

pub mod gate;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod revocation;

pub use gate::{AuthorizationGate, Identity};
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput};
pub use password::{hash_password, verify_password};
pub use permissions::{roles, Permission, PermissionSet};
pub use revocation::{MemoryRevocationList, RevocationList};
