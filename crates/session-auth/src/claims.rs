//! Unverified access token payload decoding
//!
//! The client never verifies token signatures; it only reads the payload
//! segment to learn when the token expires and whose it is, saving a round
//! trip before each request. Anything that fails to decode is an `Err`,
//! which callers treat as "no usable token".

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Payload claims the client relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject identifier (`sub`, else `userId`, else `id`)
    pub subject: Option<String>,
    /// Expiry as unix seconds
    pub expires_at: u64,
}

impl Claims {
    /// Whether the token is expired at `now` once `margin` is applied.
    pub fn is_expired_at(&self, now: u64, margin: Duration) -> bool {
        self.expires_at <= now.saturating_add(margin.as_secs())
    }
}

/// Wire shape of the payload. The backend names the subject differently
/// across token generations.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: u64,
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default, rename = "userId")]
    user_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

impl TokenClaims {
    fn subject(&self) -> Option<String> {
        [&self.sub, &self.user_id, &self.id]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// Decode the payload of a `header.payload.signature` token without
/// checking its signature.
///
/// Expiry is read, not enforced; a payload without a numeric `exp` claim is
/// rejected.
pub fn decode(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    // Base64url segments never contain '=' other than padding.
    let token = token.replace('=', "");
    let data =
        jsonwebtoken::decode::<TokenClaims>(&token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;

    Ok(Claims {
        subject: data.claims.subject(),
        expires_at: data.claims.exp,
    })
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn token_with(payload: &str) -> String {
        format!(
            "eyJhbGciOiJIUzI1NiJ9.{}.c2ln",
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn decodes_subject_and_expiry() {
        let claims = decode(&token_with(r#"{"sub":"expert-42","exp":1900000000}"#)).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("expert-42"));
        assert_eq!(claims.expires_at, 1_900_000_000);
    }

    #[test]
    fn falls_back_to_user_id_and_stringifies_numbers() {
        let claims = decode(&token_with(r#"{"userId":17,"exp":1900000000}"#)).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("17"));

        let claims = decode(&token_with(r#"{"id":"u-9","exp":1900000000}"#)).unwrap();
        assert_eq!(claims.subject.as_deref(), Some("u-9"));
    }

    #[test]
    fn tolerates_padded_payload() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1900000000}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{padded}.c2ln");
        assert_eq!(decode(&token).unwrap().expires_at, 1_900_000_000);
    }

    #[test]
    fn missing_exp_is_an_error() {
        let result = decode(&token_with(r#"{"sub":"a"}"#));
        assert!(matches!(result, Err(Error::InvalidToken(_))));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(decode("").is_err());
        assert!(decode("a.b").is_err());
        assert!(decode("not-a-token").is_err());
        assert!(decode("a.!!!.c").is_err());
        assert!(decode(&token_with("[1,2,3]")).is_err());
    }

    #[test]
    fn expiry_margin_applies() {
        let claims = Claims {
            subject: None,
            expires_at: 1_000,
        };
        assert!(claims.is_expired_at(995, Duration::from_secs(5)));
        assert!(claims.is_expired_at(1_000, Duration::ZERO));
        assert!(!claims.is_expired_at(994, Duration::from_secs(5)));
    }
}
