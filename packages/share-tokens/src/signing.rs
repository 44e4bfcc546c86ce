// ABOUTME: Cryptographic primitives for share tokens
// ABOUTME: Random payload minting, HMAC document binding, and keyed password hashing

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use crate::error::{ShareTokenError, ShareTokenResult};

/// Random payload length in bytes (hex-doubles on the wire).
const PAYLOAD_BYTES: usize = 32;

/// Domain separator so password digests can never collide with token
/// signatures under the same key.
const PASSWORD_CONTEXT: &[u8] = b"share-password:";

/// Result of checking a presented token string against a document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Well-formed and signed for this document.
    Valid,
    /// Not two non-empty dot-separated parts.
    Malformed,
    /// Well-formed but the signature does not match this document.
    Forged,
}

/// Signs and verifies share tokens with a single injected secret.
///
/// Constructed once at startup; tests construct their own with throwaway
/// secrets. Holding the key here (rather than a module-level constant)
/// lets multiple signers coexist, which is the shape key rotation needs.
#[derive(Clone)]
pub struct TokenSigner {
    key: hmac::Key,
    rng: SystemRandom,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            rng: SystemRandom::new(),
        }
    }

    /// Mint a fresh token string bound to `document_id`:
    /// `<hex-random-payload>.<hex-hmac-signature>`.
    pub fn mint_token(&self, document_id: &str) -> ShareTokenResult<String> {
        let mut payload = [0u8; PAYLOAD_BYTES];
        self.rng
            .fill(&mut payload)
            .map_err(|_| ShareTokenError::Crypto("failed to generate token payload".to_string()))?;

        let payload_hex = hex::encode(payload);
        let signature = self.sign(&payload_hex, document_id);
        Ok(format!("{payload_hex}.{signature}"))
    }

    /// Verify a presented token string against a document id.
    ///
    /// Pure computation, no storage access: a `Valid` result proves the
    /// token was issued for this specific document before any lookup runs.
    pub fn verify_token(&self, token: &str, document_id: &str) -> SignatureCheck {
        let Some((payload, signature)) = token.split_once('.') else {
            return SignatureCheck::Malformed;
        };
        if payload.is_empty() || signature.is_empty() || signature.contains('.') {
            return SignatureCheck::Malformed;
        }

        let expected = self.sign(payload, document_id);
        if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            SignatureCheck::Valid
        } else {
            SignatureCheck::Forged
        }
    }

    /// Keyed digest of a share password. The plaintext is never persisted.
    pub fn hash_password(&self, password: &str) -> String {
        let mut message = Vec::with_capacity(PASSWORD_CONTEXT.len() + password.len());
        message.extend_from_slice(PASSWORD_CONTEXT);
        message.extend_from_slice(password.as_bytes());
        hex::encode(hmac::sign(&self.key, &message).as_ref())
    }

    pub fn verify_password(&self, password: &str, stored_hash: &str) -> bool {
        let computed = self.hash_password(password);
        constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
    }

    fn sign(&self, payload: &str, document_id: &str) -> String {
        let message = format!("{payload}:{document_id}");
        hex::encode(hmac::sign(&self.key, message.as_bytes()).as_ref())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).unwrap_u8() == 1
}
