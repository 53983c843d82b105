//! Standard Webhooks signature verification as used by Polar.
//!
//! The signed content is `"{webhook-id}.{webhook-timestamp}.{body}"`, signed
//! with HMAC-SHA256 and sent base64-encoded in `webhook-signature` as a
//! space-separated list of `v1,<signature>` entries.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use std::time::Duration;

use crate::config::WebhookConfig;
use crate::payments::error::{PaymentError, PaymentResult};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_ID: &str = "webhook-id";
pub const HEADER_TIMESTAMP: &str = "webhook-timestamp";
pub const HEADER_SIGNATURE: &str = "webhook-signature";

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

/// The three signature headers of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
}

impl WebhookHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> PaymentResult<Self> {
        let get = |name: &str| -> PaymentResult<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| PaymentError::MissingHeader {
                    header: name.to_string(),
                })
        };

        Ok(Self {
            id: get(HEADER_ID)?,
            timestamp: get(HEADER_TIMESTAMP)?,
            signature: get(HEADER_SIGNATURE)?,
        })
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// A `whsec_` secret carries a base64 key; any other secret is used as raw bytes.
    pub fn new(secret: &str, tolerance: Duration) -> PaymentResult<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(PaymentError::ConfigurationError {
                message: "webhook secret is empty".to_string(),
            });
        }

        let key = match secret.strip_prefix(SECRET_PREFIX) {
            Some(encoded) => BASE64.decode(encoded).map_err(|e| PaymentError::ConfigurationError {
                message: format!("webhook secret is not valid base64: {}", e),
            })?,
            None => secret.as_bytes().to_vec(),
        };

        Ok(Self { key, tolerance })
    }

    pub fn from_config(config: &WebhookConfig) -> PaymentResult<Self> {
        Self::new(&config.secret, config.tolerance())
    }

    pub fn verify(&self, headers: &WebhookHeaders, body: &[u8]) -> PaymentResult<()> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }

    /// Verification against an explicit clock, in unix seconds.
    pub fn verify_at(&self, headers: &WebhookHeaders, body: &[u8], now: i64) -> PaymentResult<()> {
        let timestamp: i64 = headers.timestamp.parse().map_err(|_| {
            PaymentError::WebhookVerificationError {
                message: "invalid webhook-timestamp".to_string(),
            }
        })?;

        let skew = now.saturating_sub(timestamp);
        if skew.unsigned_abs() > self.tolerance.as_secs() {
            return Err(PaymentError::TimestampOutOfTolerance { skew_secs: skew });
        }

        let expected = self.compute(&headers.id, timestamp, body)?;
        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .any(|(_, candidate)| secure_eq(candidate.as_bytes(), expected.as_bytes()));

        if matched {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "no matching v1 signature".to_string(),
            })
        }
    }

    /// Produces a `webhook-signature` header value for the given delivery.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> PaymentResult<String> {
        Ok(format!(
            "{},{}",
            SIGNATURE_VERSION,
            self.compute(id, timestamp, body)?
        ))
    }

    fn compute(&self, id: &str, timestamp: i64, body: &[u8]) -> PaymentResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| {
            PaymentError::ConfigurationError {
                message: format!("invalid webhook key: {}", e),
            }
        })?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

/// Constant-time byte comparison.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
