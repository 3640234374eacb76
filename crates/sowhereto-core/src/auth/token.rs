//! Access token inspection.
//!
//! Tokens are three dot-separated base64url segments; the middle one is a
//! JSON payload with an `exp` claim in epoch seconds. Signatures are not
//! checked here, that is the backend's job. Nothing in this module returns an
//! error: an unreadable token simply has no payload.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Window before expiry in which a token counts as "expiring soon" (5 minutes)
const EXPIRING_SOON_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenClaims {
    /// NumericDate: epoch seconds, possibly fractional
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl TokenClaims {
    /// Expiry truncated to whole seconds. `None` when absent or out of range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.exp?.floor();
        if !exp.is_finite() || exp < i64::MIN as f64 || exp >= i64::MAX as f64 {
            return None;
        }
        Utc.timestamp_opt(exp as i64, 0).single()
    }
}

/// Decode the payload segment. `None` for anything malformed.
pub fn decode_token(token: &str) -> Option<TokenClaims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload.trim_end_matches('='),
        _ => return None,
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry instant of a token, if it can be read
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    decode_token(token).and_then(|claims| claims.expires_at())
}

/// Fails closed: a token whose expiry cannot be read is expired.
pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, Utc::now())
}

pub fn is_token_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match token_expiry(token) {
        Some(expiry) => now >= expiry,
        None => true,
    }
}

/// Readable expiry strictly in the future
pub fn is_token_valid(token: &str) -> bool {
    !is_token_expired(token)
}

/// Fails open: a token whose expiry cannot be read is not expiring soon.
pub fn is_token_expiring_soon(token: &str) -> bool {
    is_token_expiring_soon_at(token, Utc::now())
}

pub fn is_token_expiring_soon_at(token: &str, now: DateTime<Utc>) -> bool {
    match token_expiry(token) {
        Some(expiry) => match expiry.checked_sub_signed(Duration::minutes(EXPIRING_SOON_MINUTES)) {
            Some(window_start) => now > window_start,
            None => false,
        },
        None => false,
    }
}

/// Remaining lifetime, clamped at zero. `None` when unreadable.
pub fn time_until_expiry(token: &str) -> Option<Duration> {
    token_expiry(token).map(|expiry| (expiry - Utc::now()).max(Duration::zero()))
}
