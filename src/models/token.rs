use std::collections::HashMap;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The access/refresh pair issued by the backend on login and on every refresh.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        TokenPair {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// The subset of JWT claims the client looks at.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Claims {
    pub exp: Option<i64>,
    pub sub: Option<String>,
    /// Any additional claim fields we don't explicitly model.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Result of a local expiry check. Purely informational, nothing here is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid { expires_in: i64 },
    ExpiringSoon { expires_in: i64 },
    Expired,
    Malformed,
}

impl TokenStatus {
    /// Malformed tokens are reported as expired.
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenStatus::Expired | TokenStatus::Malformed)
    }
}

/// Decodes the payload segment of a JWT without checking its signature.
pub fn decode_claims(token: &str) -> Result<Claims, String> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
        _ => return Err("token does not have three segments".to_string()),
    };

    // Some issuers keep the base64 padding, the JWT form strips it.
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| format!("Failed to decode token payload: {}", e))?;

    serde_json::from_slice::<Claims>(&bytes)
        .map_err(|e| format!("Failed to parse token claims: {}", e))
}

/// Classifies `token` against `now` (Unix seconds).
///
/// A token whose `exp` is less than `threshold_seconds` away is `ExpiringSoon`.
/// A token without a usable `exp` claim, or one that cannot be decoded, is `Malformed`.
pub fn inspect(token: &str, now: i64, threshold_seconds: i64) -> TokenStatus {
    let exp = match decode_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) => exp,
        _ => return TokenStatus::Malformed,
    };

    let Some(expires_in) = exp.checked_sub(now) else {
        return TokenStatus::Malformed;
    };
    if expires_in <= 0 {
        TokenStatus::Expired
    } else if expires_in < threshold_seconds {
        TokenStatus::ExpiringSoon { expires_in }
    } else {
        TokenStatus::Valid { expires_in }
    }
}
