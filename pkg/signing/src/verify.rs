use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, Signature, Verifier, VerifyingKey};

use crate::sign::signing_input;

/// Maximum age of a callback timestamp (replay protection).
const MAX_AGE_SECS: i64 = 5 * 60;
/// Maximum clock skew into the future.
const MAX_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("timestamp outside allowed range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),

    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("signature verification failed")]
    SignatureMismatch,
}

/// Parse and bound-check a callback timestamp: accepted when
/// `-5 min <= now - ts <= +1 min`.
pub fn verify_timestamp(timestamp: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, VerifyError> {
    let ts = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| VerifyError::InvalidTimestamp(e.to_string()))?
        .with_timezone(&Utc);
    let age = now.signed_duration_since(ts).num_seconds();
    if age > MAX_AGE_SECS || -age > MAX_SKEW_SECS {
        return Err(VerifyError::TimestampOutOfRange(ts));
    }
    Ok(ts)
}

/// Verify a base64 Ed25519 signature over `<timestamp>.<body>` with a
/// base64-encoded public key.
pub fn verify_signature(
    public_key_b64: &str,
    timestamp: &str,
    body: &[u8],
    signature_b64: &str,
) -> Result<(), VerifyError> {
    let key_bytes = STANDARD
        .decode(public_key_b64)
        .map_err(|_| VerifyError::InvalidPublicKey)?;
    let key_array: [u8; PUBLIC_KEY_LENGTH] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::InvalidPublicKey)?;
    let key = VerifyingKey::from_bytes(&key_array).map_err(|_| VerifyError::InvalidPublicKey)?;

    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|_| VerifyError::InvalidSignatureEncoding)?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| VerifyError::InvalidSignatureEncoding)?;

    key.verify(&signing_input(timestamp, body), &signature)
        .map_err(|_| VerifyError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::encode_verifying_key;
    use crate::sign::sign_payload;
    use ed25519_dalek::SigningKey;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let public = encode_verifying_key(&key.verifying_key());
        let timestamp = Utc::now().to_rfc3339();
        let body = br#"{"deploymentId":"d-1","status":"success"}"#;

        let signature = sign_payload(&key, &timestamp, body);
        verify_signature(&public, &timestamp, body, &signature).unwrap();
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signer = SigningKey::from_bytes(&[1u8; 32]);
        let other = SigningKey::from_bytes(&[2u8; 32]);
        let timestamp = Utc::now().to_rfc3339();
        let body = b"payload";

        let signature = sign_payload(&signer, &timestamp, body);
        let err = verify_signature(
            &encode_verifying_key(&other.verifying_key()),
            &timestamp,
            body,
            &signature,
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::SignatureMismatch));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let public = encode_verifying_key(&key.verifying_key());
        let timestamp = Utc::now().to_rfc3339();

        let signature = sign_payload(&key, &timestamp, b"original");
        let err = verify_signature(&public, &timestamp, b"tampered", &signature).unwrap_err();
        assert!(matches!(err, VerifyError::SignatureMismatch));
    }

    #[test]
    fn test_timestamp_window() {
        let now = Utc::now();
        verify_timestamp(&now.to_rfc3339(), now).unwrap();
        verify_timestamp(&(now - chrono::Duration::minutes(4)).to_rfc3339(), now).unwrap();

        let stale = (now - chrono::Duration::minutes(6)).to_rfc3339();
        assert!(matches!(
            verify_timestamp(&stale, now),
            Err(VerifyError::TimestampOutOfRange(_))
        ));

        let future = (now + chrono::Duration::minutes(2)).to_rfc3339();
        assert!(matches!(
            verify_timestamp(&future, now),
            Err(VerifyError::TimestampOutOfRange(_))
        ));

        assert!(matches!(
            verify_timestamp("not-a-timestamp", now),
            Err(VerifyError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_garbage_encodings_rejected() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let public = encode_verifying_key(&key.verifying_key());
        let timestamp = Utc::now().to_rfc3339();
        let signature = sign_payload(&key, &timestamp, b"body");

        assert!(matches!(
            verify_signature("!!not-base64!!", &timestamp, b"body", &signature),
            Err(VerifyError::InvalidPublicKey)
        ));
        assert!(matches!(
            verify_signature(&public, &timestamp, b"body", "!!not-base64!!"),
            Err(VerifyError::InvalidSignatureEncoding)
        ));
    }
}
