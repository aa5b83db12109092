//! Ed25519 envelope signature verification.
//!
//! Pure function, no I/O, no state. The signed message is the exact
//! concatenation `ascii(timestamp) || data` — `data` is never canonicalised,
//! so callers must sign the exact bytes they send.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

/// Default freshness window: 5 minutes.
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("timestamp outside the allowed freshness window")]
    StaleTimestamp,
    #[error("public key is malformed")]
    BadKey,
    #[error("signature does not verify")]
    BadSignature,
    #[error("envelope is malformed: {0}")]
    Malformed(String),
}

/// Verifies an envelope's signature and timestamp freshness.
///
/// `public_key_b64` and `signature_b64` are standard-alphabet base64 as
/// received over the wire (32 and 64 raw bytes respectively). `now` and
/// `timestamp` are unix seconds; the check is `|now - timestamp| <= window`.
pub fn verify(
    data: &[u8],
    public_key_b64: &str,
    signature_b64: &str,
    timestamp: i64,
    now: i64,
    freshness_window_secs: i64,
) -> Result<(), VerifyError> {
    if (now - timestamp).abs() > freshness_window_secs {
        return Err(VerifyError::StaleTimestamp);
    }

    let key_bytes = BASE64
        .decode(public_key_b64)
        .map_err(|e| VerifyError::Malformed(format!("public_key: {e}")))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| VerifyError::BadKey)?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| VerifyError::BadKey)?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| VerifyError::Malformed(format!("signature: {e}")))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| VerifyError::Malformed("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    let mut message = timestamp.to_string().into_bytes();
    message.extend_from_slice(data);

    verifying_key
        .verify(&message, &signature)
        .map_err(|_| VerifyError::BadSignature)
}

/// Signs `data` for `timestamp`, producing base64 signature bytes. Used by
/// tests and by trusted tooling that mints envelopes; never exposed on the
/// ingest path itself.
#[cfg(any(test, feature = "test-util"))]
pub fn sign(
    data: &[u8],
    timestamp: i64,
    signing_key: &ed25519_dalek::SigningKey,
) -> String {
    use ed25519_dalek::Signer;

    let mut message = timestamp.to_string().into_bytes();
    message.extend_from_slice(data);
    let signature = signing_key.sign(&message);
    BASE64.encode(signature.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_b64 = BASE64.encode(signing_key.verifying_key().to_bytes());
        (signing_key, public_b64)
    }

    #[test]
    fn valid_envelope_verifies() {
        let (signing_key, public_b64) = keypair();
        let data = b"hosts payload";
        let timestamp = 1_700_000_000;
        let sig = sign(data, timestamp, &signing_key);

        assert!(verify(data, &public_b64, &sig, timestamp, timestamp, DEFAULT_FRESHNESS_WINDOW_SECS).is_ok());
    }

    #[test]
    fn flipped_data_bit_fails() {
        let (signing_key, public_b64) = keypair();
        let mut data = b"hosts payload".to_vec();
        let timestamp = 1_700_000_000;
        let sig = sign(&data, timestamp, &signing_key);

        data[0] ^= 0x01;
        assert_eq!(
            verify(&data, &public_b64, &sig, timestamp, timestamp, DEFAULT_FRESHNESS_WINDOW_SECS),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn flipped_timestamp_fails() {
        let (signing_key, public_b64) = keypair();
        let data = b"hosts payload";
        let timestamp = 1_700_000_000;
        let sig = sign(data, timestamp, &signing_key);

        // Same signature, different claimed timestamp: message bytes differ.
        assert_eq!(
            verify(data, &public_b64, &sig, timestamp + 1, timestamp + 1, DEFAULT_FRESHNESS_WINDOW_SECS),
            Err(VerifyError::BadSignature)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected_before_signature_check() {
        let (signing_key, public_b64) = keypair();
        let data = b"hosts payload";
        let timestamp = 1_700_000_000;
        let sig = sign(data, timestamp, &signing_key);

        let now = timestamp + DEFAULT_FRESHNESS_WINDOW_SECS + 1;
        assert_eq!(
            verify(data, &public_b64, &sig, timestamp, now, DEFAULT_FRESHNESS_WINDOW_SECS),
            Err(VerifyError::StaleTimestamp)
        );
    }

    #[test]
    fn malformed_key_is_rejected() {
        let data = b"hosts payload";
        let timestamp = 1_700_000_000;
        let result = verify(data, "not-base64!!", "AAAA", timestamp, timestamp, DEFAULT_FRESHNESS_WINDOW_SECS);
        assert!(matches!(result, Err(VerifyError::Malformed(_))));
    }
}
