//! Identity provider integration
//!
//! Resolves the authenticated caller from a Clerk session token. The
//! verifier is constructed once from configuration and injected through
//! application state.

mod jwt;
mod middleware;

pub use jwt::{AuthError, ClerkVerifier, SessionClaims};
pub use middleware::{require_auth, AuthUser};
