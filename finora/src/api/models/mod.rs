//! API request/response models.

pub mod auth;
pub mod pagination;
pub mod transactions;
pub mod users;
