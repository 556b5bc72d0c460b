//! CRUD surface shared by the `users` and `transactions` repositories.

use crate::db::errors::Result;

/// Create/read/update/delete for one table.
///
/// Implementors borrow a connection, so the same calls work on a pooled
/// connection or inside an open transaction. Scoping (e.g. to the owning
/// user) is the implementor's business and is fixed when it is constructed.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    type Response;
    type Id: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// `None` when the row does not exist or is out of scope
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Fails with `DbError::NotFound` when there is no such row
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;

    /// `true` if a row was removed
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;
}
