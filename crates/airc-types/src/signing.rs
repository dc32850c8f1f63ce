//! Ed25519 helpers shared by the codec and the client.
//!
//! Public keys travel as standard base64 of the raw 32 bytes. Signatures are
//! raw 64-byte Ed25519 signatures (`ed25519-dalek`) over exact byte
//! sequences; nothing here hashes before signing.

use crate::serde_compat::{decode_b64, encode_b64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Length of a raw Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of a raw Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Base64 form of a public key, as sent to the relay.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    encode_b64(key.as_bytes())
}

/// Parse a base64 public key.
pub fn decode_public_key(text: &str) -> Result<VerifyingKey, String> {
    let bytes = decode_b64(text).map_err(|e| format!("invalid base64 public key: {e}"))?;
    public_key_from_bytes(&bytes)
}

/// Reconstruct a public key from raw bytes.
pub fn public_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, String> {
    let pk_bytes: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| format!("invalid public key length (expected {PUBLIC_KEY_LEN} bytes)"))?;
    VerifyingKey::from_bytes(&pk_bytes).map_err(|e| format!("invalid public key: {e}"))
}

/// SHA-256 fingerprint of the raw public key, first 16 hex characters.
pub fn fingerprint(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Verify a detached signature over `message`.
pub fn verify_detached(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<(), String> {
    let sig_bytes: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| format!("invalid signature length (expected {SIGNATURE_LEN} bytes)"))?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature)
        .map_err(|e| format!("signature verification failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn test_public_key_text_form() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let text = encode_public_key(&key);
        assert_eq!(decode_public_key(&text).unwrap(), key);
    }

    #[test]
    fn test_public_key_wrong_length() {
        let err = decode_public_key(&encode_b64(&[1u8; 16])).unwrap_err();
        assert!(err.contains("expected 32 bytes"));
    }

    #[test]
    fn test_fingerprint_shape() {
        let key = SigningKey::generate(&mut OsRng).verifying_key();
        let fp = fingerprint(&key);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint(&key));
    }

    #[test]
    fn test_verify_detached() {
        let signing = SigningKey::generate(&mut OsRng);
        let sig = signing.sign(b"payload");
        let key = signing.verifying_key();
        assert!(verify_detached(&key, b"payload", &sig.to_bytes()).is_ok());
        assert!(verify_detached(&key, b"payloaD", &sig.to_bytes()).is_err());
        assert!(verify_detached(&key, b"payload", &[0u8; 10]).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let signing = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng).verifying_key();
        let sig = signing.sign(b"payload");
        let err = verify_detached(&other, b"payload", &sig.to_bytes()).unwrap_err();
        assert!(err.contains("signature verification failed"));
    }
}
