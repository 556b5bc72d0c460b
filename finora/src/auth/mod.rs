//! Authentication: credentials, sessions and second factors.
//!
//! Finora uses two kinds of tokens:
//!
//! ## Access tokens
//!
//! Short-lived HS256 JWTs (see [`session`]) passed as `Authorization: Bearer <jwt>`.
//! The [`CurrentUser`](crate::api::models::users::CurrentUser) extractor in
//! [`current_user`] validates them on every protected route; nothing is looked up
//! in the database.
//!
//! ## Refresh tokens
//!
//! Opaque random strings (see [`tokens`]) issued at login, returned in the body
//! and as an HttpOnly cookie. Only their SHA-256 hash is stored. Each refresh
//! rotates the token; presenting an already revoked token revokes every session
//! of the user.
//!
//! Single-use emailed tokens (verification, password reset, email change) are
//! generated and hashed the same way.
//!
//! # Modules
//!
//! - [`current_user`]: Extractor for the authenticated user
//! - [`password`]: Argon2id hashing on blocking threads
//! - [`session`]: Access token signing and verification
//! - [`tokens`]: Random opaque tokens and their hashes
//! - [`totp`]: Time-based one-time passwords for two-factor login

pub mod current_user;
pub mod password;
pub mod session;
pub mod tokens;
pub mod totp;
