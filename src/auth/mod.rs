//! Authentication module for the VaaniAI server
//!
//! Accounts, password hashing, token issuing/validation, request
//! extractors and the per-caller request rate limiter.

pub mod extract;
pub mod handlers;
mod password;
mod rate_limit;
mod service;

pub use extract::{AdminSession, AuthenticatedUser, Caller, GUEST_ID_HEADER};
pub use password::{hash_password, verify_password};
pub use service::{AuthService, Claims, Role};
pub use rate_limit::{RateLimiter, RateLimitConfig};
