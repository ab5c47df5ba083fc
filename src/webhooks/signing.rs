//! HMAC-SHA256 payload signing.
//!
//! Each delivery body is an [`Envelope`] serialized once per dispatch and
//! signed with the receiving subscription's secret. The hex digest travels
//! in `X-Webhook-Signature`; the envelope timestamp is repeated in
//! `X-Webhook-Timestamp` so receivers can reject replays.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";

/// Delivery body: `{ "event", "timestamp", "data" }`.
///
/// `timestamp` is epoch milliseconds as a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub timestamp: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(event: &str, at: DateTime<Utc>, data: Value) -> Self {
        Self {
            event: event.to_string(),
            timestamp: at.timestamp_millis().to_string(),
            data,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn keyed(secret: &str, body: &[u8]) -> HmacSha256 {
    // HMAC pads or hashes the key, so no length is rejected.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac
}

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mac = keyed(secret, body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature.
pub fn verify(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed(secret, body).verify_slice(&expected).is_ok()
}

/// Why a received delivery was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("signature does not match payload")]
    SignatureMismatch,

    #[error("timestamp header is not epoch milliseconds")]
    MalformedTimestamp,

    #[error("timestamp is {age_ms}ms away from now, outside tolerance")]
    OutsideTolerance { age_ms: i64 },
}

/// Receiver-side check of a signed delivery: signature, then timestamp freshness.
pub fn verify_delivery(
    body: &[u8],
    signature: &str,
    secret: &str,
    timestamp: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), VerifyError> {
    if !verify(body, signature, secret) {
        return Err(VerifyError::SignatureMismatch);
    }
    let sent_ms: i64 = timestamp.trim().parse().map_err(|_| VerifyError::MalformedTimestamp)?;
    let age_ms = now.timestamp_millis() - sent_ms;
    let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
    if age_ms.abs() > tolerance_ms {
        return Err(VerifyError::OutsideTolerance { age_ms });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SECRET: &str = "4f9a2c";

    #[test]
    fn test_sign_matches_known_vector() {
        // RFC 4231 test case 2
        let mac = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(mac, "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn test_signature_is_deterministic_and_sensitive() {
        let body = br#"{"event":"launch.imminent","timestamp":"1","data":{}}"#.to_vec();
        assert_eq!(sign(&body, SECRET), sign(&body, SECRET));

        let mut flipped = body.clone();
        flipped[10] ^= 0x01;
        assert_ne!(sign(&body, SECRET), sign(&flipped, SECRET));
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let body = br#"{"event":"launch.imminent"}"#;
        let signature = sign(body, SECRET);
        assert!(verify(body, &signature, SECRET));
        assert!(!verify(body, &signature, "other-secret"));
        assert!(!verify(b"tampered", &signature, SECRET));
        assert!(!verify(body, "not-hex", SECRET));
    }

    #[test]
    fn test_envelope_shape() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let envelope = Envelope::new("news.published", at, json!({ "title": "Starship" }));
        let parsed: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(
            parsed,
            json!({ "event": "news.published", "timestamp": "1700000000123", "data": { "title": "Starship" } })
        );
    }

    #[test]
    fn test_verify_delivery_tolerance() {
        let now = Utc.timestamp_millis_opt(1_700_000_300_000).unwrap();
        let body = b"{}";
        let signature = sign(body, SECRET);
        let tolerance = Duration::from_secs(300);

        assert!(verify_delivery(body, &signature, SECRET, "1700000000000", now, tolerance).is_ok());
        assert_eq!(
            verify_delivery(body, &signature, SECRET, "1699999999999", now, tolerance),
            Err(VerifyError::OutsideTolerance { age_ms: 300_001 })
        );
        assert_eq!(
            verify_delivery(body, &signature, SECRET, "yesterday", now, tolerance),
            Err(VerifyError::MalformedTimestamp)
        );
        assert_eq!(
            verify_delivery(body, "00", SECRET, "1700000000000", now, tolerance),
            Err(VerifyError::SignatureMismatch)
        );
    }
}
