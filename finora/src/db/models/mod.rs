//! Database record models matching table schemas.
//!
//! Each module has the row type returned by its repository (`*DBResponse`)
//! and the request types accepted for inserts and updates.

pub mod refresh_tokens;
pub mod transactions;
pub mod user_tokens;
pub mod users;
