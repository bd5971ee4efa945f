use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey};

/// The exact byte sequence that gets signed: `<timestamp>.<body>`.
pub fn signing_input(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(timestamp.len() + 1 + body.len());
    input.extend_from_slice(timestamp.as_bytes());
    input.push(b'.');
    input.extend_from_slice(body);
    input
}

/// Sign a callback body, returning the base64 signature.
pub fn sign_payload(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
    let signature = key.sign(&signing_input(timestamp, body));
    STANDARD.encode(signature.to_bytes())
}
