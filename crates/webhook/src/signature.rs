//! HMAC-SHA256 payload signing and verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Verifies provider signatures against a shared secret.
///
/// The provider signs the raw request body with HMAC-SHA256 and sends the
/// hex digest in the `X-Signature` header. Comparison happens inside the
/// `hmac` crate's constant-time `verify_slice`, never via string equality.
/// With no secret configured every delivery is rejected — the verifier
/// fails closed, not open.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
}

impl SignatureVerifier {
    /// Creates a verifier with the given signing secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Some(secret.into()),
        }
    }

    /// Creates a verifier with no secret. Every verification fails.
    pub fn unconfigured() -> Self {
        Self { secret: None }
    }

    /// Creates a verifier from an optional secret, e.g. straight from
    /// configuration.
    pub fn from_optional(secret: Option<String>) -> Self {
        match secret {
            Some(s) if !s.is_empty() => Self::new(s.into_bytes()),
            _ => Self::unconfigured(),
        }
    }

    /// Verifies a hex-encoded HMAC-SHA256 signature over the raw payload.
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> Result<()> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookError::SecretUnconfigured)?;

        let expected = hex::decode(signature_hex.trim())
            .map_err(|_| WebhookError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| WebhookError::SecretUnconfigured)?;
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::SignatureInvalid)
    }

    /// Signs a payload, returning the hex digest. Used by tests and by
    /// outbound calls that must prove their origin.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(WebhookError::SecretUnconfigured)?;

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| WebhookError::SecretUnconfigured)?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
