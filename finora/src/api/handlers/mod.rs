//! HTTP request handlers for all API endpoints.
//!
//! - [`auth`]: registration, login, sessions, email verification and password reset
//! - [`transactions`]: transaction CRUD, statistics, summary and export
//! - [`users`]: profile, preferences, credentials, two-factor setup and account deletion
//!
//! Handlers that need a logged-in caller take a
//! [`CurrentUser`](crate::api::models::users::CurrentUser) argument; the
//! extractor rejects the request with 401 before the handler runs.

pub mod auth;
pub mod transactions;
pub mod users;
