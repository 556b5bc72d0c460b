//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`TransactionId`]: Transaction identifier
//! - [`RefreshTokenId`]: Login session identifier
//! - [`UserTokenId`]: One-time email token identifier
//!
//! [`abbrev_uuid`] shortens UUIDs to their first 8 chars for logging.

use uuid::Uuid;

pub type UserId = Uuid;
pub type TransactionId = Uuid;
pub type RefreshTokenId = Uuid;
pub type UserTokenId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let uuid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&uuid), "550e8400");
    }
}
