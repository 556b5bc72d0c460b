//! OpenAPI document served at `/api/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::{handlers, models};
use crate::errors::ErrorResponse;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token from `/api/auth/login` or `/api/auth/refresh`:\n\n\
                            ```\nAuthorization: Bearer ACCESS_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Finora API",
        description = "Backend of the Finora expense tracker: accounts, sessions and transactions.",
    ),
    modifiers(&SecurityAddon),
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::auth::me,
        handlers::auth::verify_email,
        handlers::auth::verify_email_link,
        handlers::auth::resend_verification,
        handlers::auth::forgot_password,
        handlers::auth::reset_password,
        handlers::transactions::list_transactions,
        handlers::transactions::create_transaction,
        handlers::transactions::get_transaction,
        handlers::transactions::update_transaction,
        handlers::transactions::delete_transaction,
        handlers::transactions::bulk_delete_transactions,
        handlers::transactions::transaction_stats,
        handlers::transactions::transaction_summary,
        handlers::transactions::list_categories,
        handlers::transactions::export_transactions,
        handlers::users::get_profile,
        handlers::users::update_profile,
        handlers::users::change_password,
        handlers::users::request_email_change,
        handlers::users::confirm_email_change,
        handlers::users::get_preferences,
        handlers::users::update_preferences,
        handlers::users::setup_two_factor,
        handlers::users::enable_two_factor,
        handlers::users::disable_two_factor,
        handlers::users::delete_account,
    ),
    components(schemas(
        ErrorResponse,
        models::auth::RegisterRequest,
        models::auth::RegisterResponse,
        models::auth::LoginRequest,
        models::auth::AuthResponse,
        models::auth::AuthTokens,
        models::auth::RefreshRequest,
        models::auth::TokenRequest,
        models::auth::EmailRequest,
        models::auth::ResetPasswordRequest,
        models::auth::MessageResponse,
        models::users::UserResponse,
        models::users::Preferences,
        models::users::Language,
        models::users::Theme,
        models::users::UpdateProfileRequest,
        models::users::ChangePasswordRequest,
        models::users::ChangeEmailRequest,
        models::users::ConfirmEmailChangeRequest,
        models::users::UpdatePreferencesRequest,
        models::users::TwoFactorSetupResponse,
        models::users::TwoFactorCodeRequest,
        models::users::DisableTwoFactorRequest,
        models::users::DeleteAccountRequest,
        models::transactions::TransactionType,
        models::transactions::SortField,
        models::transactions::SortOrder,
        models::transactions::ExportFormat,
        models::transactions::TransactionCreate,
        models::transactions::TransactionUpdate,
        models::transactions::TransactionResponse,
        models::transactions::BulkDeleteRequest,
        models::transactions::BulkDeleteResponse,
        models::transactions::TransactionStats,
        models::transactions::CategoryBreakdown,
        models::transactions::MonthlyTotals,
        models::transactions::TransactionSummary,
        models::transactions::PeriodSummary,
        models::transactions::CategoryUsage,
    )),
    tags(
        (name = "auth", description = "Registration, login and session lifecycle"),
        (name = "transactions", description = "Income and expense records"),
        (name = "users", description = "The caller's own account"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes_and_security() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/transactions/{id}"));
        assert!(doc.paths.paths.contains_key("/api/users/2fa/setup"));
        assert!(doc.paths.paths.contains_key("/api/auth/refresh"));
        let components = doc.components.expect("components are generated");
        assert!(components.security_schemes.contains_key("BearerAuth"));
        assert!(components.schemas.contains_key("TransactionResponse"));
    }
}
