use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SECRET_KEY_LENGTH, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tracing::info;

/// Load the broker's Ed25519 private key from `path`, generating and
/// persisting a fresh keypair if no key exists yet.
///
/// The file may hold the raw 32-byte seed, a base64 encoding of it, or
/// a 64-byte seed+public concatenation; only the seed is used.
pub fn load_or_generate_key(path: &str) -> anyhow::Result<SigningKey> {
    let key_path = Path::new(path);
    if key_path.exists() {
        let bytes = std::fs::read(key_path)
            .map_err(|e| anyhow::anyhow!("failed to read private key {}: {}", path, e))?;
        return decode_private_key(&bytes)
            .ok_or_else(|| anyhow::anyhow!("invalid private key in {}: unrecognized size", path));
    }

    if let Some(dir) = key_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("failed to create key directory: {}", e))?;
    }

    let key = SigningKey::generate(&mut OsRng);
    std::fs::write(key_path, key.to_bytes())
        .map_err(|e| anyhow::anyhow!("failed to write private key to {}: {}", path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!("Generated new Ed25519 keypair at {}", path);
    Ok(key)
}

/// Interpret key file contents: raw seed, base64 seed, or seed+public.
fn decode_private_key(bytes: &[u8]) -> Option<SigningKey> {
    let raw = match seed_from_raw(bytes) {
        Some(seed) => Some(seed),
        None => {
            // Fall back to base64 of the raw forms.
            let text = std::str::from_utf8(bytes).ok()?;
            let decoded = STANDARD.decode(text.trim()).ok()?;
            seed_from_raw(&decoded)
        }
    };
    raw.map(|seed| SigningKey::from_bytes(&seed))
}

fn seed_from_raw(bytes: &[u8]) -> Option<[u8; SECRET_KEY_LENGTH]> {
    if bytes.len() == SECRET_KEY_LENGTH {
        return bytes.try_into().ok();
    }
    // Seed followed by the public key (64 bytes): use the seed half.
    if bytes.len() == SECRET_KEY_LENGTH * 2 {
        return bytes[..SECRET_KEY_LENGTH].try_into().ok();
    }
    None
}

/// Base64 encoding of a public key for the wire and the broker status.
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_reload() {
        let dir = std::env::temp_dir().join(format!("signing-test-{}", std::process::id()));
        let path = dir.join("private.key");
        let path_str = path.to_str().unwrap();

        let generated = load_or_generate_key(path_str).unwrap();
        let reloaded = load_or_generate_key(path_str).unwrap();
        assert_eq!(generated.to_bytes(), reloaded.to_bytes());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_base64_key_file_accepted() {
        let dir = std::env::temp_dir().join(format!("signing-test-b64-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("private.key");

        let key = SigningKey::from_bytes(&[7u8; 32]);
        std::fs::write(&path, STANDARD.encode(key.to_bytes())).unwrap();

        let loaded = load_or_generate_key(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.to_bytes(), key.to_bytes());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
