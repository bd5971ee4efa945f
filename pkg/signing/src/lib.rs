//! Ed25519-signed callback transport: key management on the broker
//! side, signature production, and verification with replay protection
//! on the control-plane side.

pub mod keys;
pub mod sign;
pub mod verify;

/// Headers attached to every signed callback.
pub const BROKER_NAME_HEADER: &str = "Broker-Name";
pub const TIMESTAMP_HEADER: &str = "Timestamp";
pub const SIGNATURE_HEADER: &str = "Signature";
/// Optional, for first-registration bootstrap only.
pub const PUBLIC_KEY_HEADER: &str = "Public-Key";

pub use keys::{encode_verifying_key, load_or_generate_key};
pub use sign::{sign_payload, signing_input};
pub use verify::{VerifyError, verify_signature, verify_timestamp};
