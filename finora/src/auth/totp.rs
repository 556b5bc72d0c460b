//! Time-based one-time passwords (RFC 6238) for two-factor login.
//!
//! Uses the parameters every common authenticator app assumes: HMAC-SHA1,
//! 6 digits, 30 second steps. Secrets are exchanged as unpadded base32.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::prelude::RngExt;
use rand::rng;
use sha1::Sha1;

use crate::errors::Error;

type HmacSha1 = Hmac<Sha1>;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;
/// Accepted clock drift in steps on either side of the current one.
const ALLOWED_DRIFT: u64 = 1;
const SECRET_BYTES: usize = 20;

/// Generate a new random secret, base32-encoded.
pub fn generate_secret() -> String {
    let mut secret = [0u8; SECRET_BYTES];
    rng().fill(&mut secret);
    BASE32_NOPAD.encode(&secret)
}

/// `otpauth://` URI understood by authenticator apps (usually rendered as QR code).
pub fn provisioning_uri(issuer: &str, account: &str, secret: &str) -> String {
    let label = format!("{}:{}", encode_label_part(issuer), encode_label_part(account));
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECONDS.to_string())
        .finish();
    format!("otpauth://totp/{label}?{query}")
}

fn encode_label_part(part: &str) -> String {
    url::form_urlencoded::byte_serialize(part.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Check `code` against the secret at `unix_time`, allowing one step of drift.
pub fn verify_code(secret: &str, code: &str, unix_time: u64) -> Result<bool, Error> {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }

    let key = base32_decode(secret).ok_or_else(|| Error::Internal {
        operation: "decode stored TOTP secret".to_string(),
    })?;

    let counter = unix_time / STEP_SECONDS;
    let first = counter.saturating_sub(ALLOWED_DRIFT);
    for candidate in first..=counter + ALLOWED_DRIFT {
        if code_at(&key, candidate)? == code {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check a code against the current system time.
pub fn verify_code_now(secret: &str, code: &str) -> Result<bool, Error> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    verify_code(secret, code, now)
}

/// Code an authenticator app would show right now.
#[cfg(test)]
pub(crate) fn current_code(secret: &str) -> String {
    let key = base32_decode(secret).expect("valid secret");
    let now = chrono::Utc::now().timestamp() as u64;
    code_at(&key, now / STEP_SECONDS).expect("hmac accepts any key")
}

/// HOTP value (RFC 4226) for a single counter.
fn code_at(key: &[u8], counter: u64) -> Result<String, Error> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| Error::Internal {
        operation: format!("create TOTP HMAC: {e}"),
    })?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([digest[offset] & 0x7f, digest[offset + 1], digest[offset + 2], digest[offset + 3]]);
    let value = binary % 10u32.pow(DIGITS);
    Ok(format!("{value:0width$}", width = DIGITS as usize))
}

/// Lenient decoding: ignores case, spaces and padding as typed by users.
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let normalized: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD.decode(normalized.as_bytes()).ok().filter(|key| !key.is_empty())
}
