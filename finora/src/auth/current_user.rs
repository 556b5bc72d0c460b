use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    errors::{Error, Result},
};

/// Pull the bearer token out of the Authorization header.
/// Returns None when the header is absent or not a Bearer credential.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = bearer_token(parts) else {
            trace!("No bearer token on request");
            return Err(Error::Unauthenticated { message: None });
        };

        let user = session::verify_access_token(token, &state.config)?;
        trace!("Authenticated user {}", user.id);
        Ok(user)
    }
}
