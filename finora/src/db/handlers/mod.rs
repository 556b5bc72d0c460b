//! Repository implementations, one per table.

pub mod refresh_tokens;
pub mod repository;
pub mod transactions;
pub mod user_tokens;
pub mod users;

pub use refresh_tokens::RefreshTokens;
pub use repository::Repository;
pub use transactions::Transactions;
pub use user_tokens::UserTokens;
pub use users::Users;
