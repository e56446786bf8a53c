//! Token issue and verification: short-lived access tokens and longer-lived,
//! revocable refresh tokens. Pure cryptographic computation, no I/O.
//!
//! Access and refresh tokens are signed with separate secrets under a fixed
//! algorithm. Verification failures are deliberately undifferentiated: expiry,
//! tampering and wrong-key failures all surface as the same error so the
//! response never leaks which check rejected the token.

use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::principal::Principal;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid or expired token")]
    InvalidOrExpired,
    #[error("invalid duration format: {0}")]
    InvalidDuration(String),
    #[error("token signing failed")]
    Signing,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a refresh token. `jti` is a fresh random identifier per
/// issue, so two tokens for the same claims in the same instant are still
/// distinct and individually revocable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

static DURATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([dhms])$").unwrap());

/// Parse a duration spec of the form `<integer><unit>` with unit in
/// {d, h, m, s}. Anything else is `InvalidDuration`.
pub fn parse_duration_spec(spec: &str) -> Result<chrono::Duration, TokenError> {
    let trimmed = spec.trim();
    let caps = DURATION_RE
        .captures(trimmed)
        .ok_or_else(|| TokenError::InvalidDuration(spec.to_string()))?;
    let n: i64 = caps[1].parse().map_err(|_| TokenError::InvalidDuration(spec.to_string()))?;
    match &caps[2] {
        "d" => Ok(chrono::Duration::days(n)),
        "h" => Ok(chrono::Duration::hours(n)),
        "m" => Ok(chrono::Duration::minutes(n)),
        "s" => Ok(chrono::Duration::seconds(n)),
        _ => Err(TokenError::InvalidDuration(spec.to_string())),
    }
}

/// Absolute expiry timestamp (unix seconds) for a duration spec, anchored at now.
pub fn expiry_from_spec(spec: &str) -> Result<i64, TokenError> {
    Ok((Utc::now() + parse_duration_spec(spec)?).timestamp())
}

fn gen_jti() -> String {
    // 128-bit random id, base64url without padding
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Issues and verifies both token kinds. Cheap to clone; handlers share one
/// instance through the server state.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
    validation: Validation,
}

impl TokenService {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl_spec: &str,
        refresh_ttl_spec: &str,
    ) -> Result<Self, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: expiry is enforced exactly, there is no revocation list
        // for access tokens to fall back on.
        validation.leeway = 0;
        Ok(Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl: parse_duration_spec(access_ttl_spec)?,
            refresh_ttl: parse_duration_spec(refresh_ttl_spec)?,
            validation,
        })
    }

    pub fn issue_access(&self, principal: &Principal) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: principal.user_id.clone(),
            email: principal.email.clone(),
            role: principal.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(|_| TokenError::Signing)
    }

    pub fn issue_refresh(&self, principal: &Principal) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub: principal.user_id.clone(),
            email: principal.email.clone(),
            role: principal.role.as_str().to_string(),
            jti: gen_jti(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.refresh_encoding)
            .map_err(|_| TokenError::Signing)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.access_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::InvalidOrExpired)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::InvalidOrExpired)
    }
}

impl From<TokenError> for crate::error::AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidOrExpired => {
                crate::error::AppError::auth("invalid_token", "invalid or expired token")
            }
            TokenError::InvalidDuration(spec) => crate::error::AppError::internal(
                "invalid_duration".to_string(),
                format!("invalid duration format: {spec}"),
            ),
            TokenError::Signing => {
                crate::error::AppError::internal("token_signing", "token signing failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_specs_parse_per_unit() {
        assert_eq!(parse_duration_spec("7d").unwrap(), chrono::Duration::days(7));
        assert_eq!(parse_duration_spec("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_duration_spec("15m").unwrap(), chrono::Duration::minutes(15));
        assert_eq!(parse_duration_spec("30s").unwrap(), chrono::Duration::seconds(30));
    }

    #[test]
    fn malformed_duration_specs_fail() {
        for bad in ["7", "xd", "d7", "", "7w", "7 d", "-7d", "7dd"] {
            match parse_duration_spec(bad) {
                Err(TokenError::InvalidDuration(_)) => {}
                other => panic!("expected InvalidDuration for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn expiry_is_anchored_at_now() {
        let now = Utc::now().timestamp();
        let exp = expiry_from_spec("1h").unwrap();
        let want = now + 3600;
        assert!((exp - want).abs() <= 2, "exp {exp} not within 2s of {want}");
    }

    #[test]
    fn jti_values_are_unique() {
        let a = gen_jti();
        let b = gen_jti();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
