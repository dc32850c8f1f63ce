//! Recovery key: a second keypair for key rotation and identity revocation.
//!
//! Kept apart from the signing key (`{recovery_dir}/{agent_name}.key`) and
//! written read-only, since it must never change once created. Proofs are
//! signed over compact JSON with sorted keys.

use crate::keystore::{create_keypair, load_keypair};
use airc_types::config::ClientConfig;
use airc_types::serde_compat::encode_b64;
use airc_types::signing::{encode_public_key, fingerprint};
use airc_types::AircResult;
use airc_wire::message::PROTOCOL_VERSION;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A loaded recovery keypair.
pub struct RecoveryKey {
    agent_name: String,
    path: PathBuf,
    signing_key: SigningKey,
}

impl RecoveryKey {
    /// Load `{dir}/{agent_name}.key`, creating it (mode 0400) if absent.
    pub fn load_or_create(dir: &Path, agent_name: &str) -> AircResult<Self> {
        let path = dir.join(format!("{agent_name}.key"));
        let signing_key = if path.exists() {
            load_keypair(&path, agent_name)?.0
        } else {
            let (key, _) = create_keypair(&path, agent_name, 0o400)?;
            info!(
                agent = agent_name,
                fingerprint = %fingerprint(&key.verifying_key()),
                "Generated recovery key"
            );
            key
        };
        Ok(Self {
            agent_name: agent_name.to_string(),
            path,
            signing_key,
        })
    }

    /// Recovery key at the configured `recovery_dir`.
    pub fn from_config(config: &ClientConfig) -> AircResult<Self> {
        Self::load_or_create(
            &config.recovery_dir,
            config.agent_name.trim_start_matches('@'),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public_key())
    }

    /// Base64 signature over the canonical JSON of `payload`.
    pub fn sign_value(&self, payload: &Value) -> AircResult<String> {
        let canonical = canonical_json(payload)?;
        Ok(encode_b64(&self.signing_key.sign(&canonical).to_bytes()))
    }

    /// Proof authorizing `new_public_key` as this agent's next signing key.
    pub fn rotation_proof(&self, new_public_key: &str) -> AircResult<Value> {
        let mut proof = json!({
            "new_public_key": new_public_key,
            "timestamp": chrono::Utc::now().timestamp(),
            "nonce": random_nonce(),
        });
        let signature = self.sign_value(&proof)?;
        proof["signature"] = Value::String(signature);
        Ok(proof)
    }

    /// Proof revoking `handle` permanently.
    pub fn revocation_proof(&self, handle: &str, reason: &str) -> AircResult<Value> {
        let mut proof = json!({
            "v": PROTOCOL_VERSION,
            "handle": handle,
            "action": "revoke",
            "reason": reason,
            "timestamp": chrono::Utc::now().timestamp(),
            "nonce": random_nonce(),
        });
        let signature = self.sign_value(&proof)?;
        proof["proof"] = Value::String(signature);
        Ok(proof)
    }
}

impl fmt::Debug for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryKey")
            .field("agent_name", &self.agent_name)
            .field("path", &self.path)
            .field("fingerprint", &fingerprint(&self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Compact JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> AircResult<Vec<u8>> {
    let mut out = Vec::new();
    write_sorted(value, &mut out)?;
    Ok(out)
}

fn write_sorted(value: &Value, out: &mut Vec<u8>) -> AircResult<()> {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, &Value> = map.iter().collect();
            out.push(b'{');
            for (i, (key, item)) in ordered.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend(serde_json::to_vec(key)?);
                out.push(b':');
                write_sorted(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_sorted(item, out)?;
            }
            out.push(b']');
        }
        scalar => out.extend(serde_json::to_vec(scalar)?),
    }
    Ok(())
}

/// 16 random bytes, hex encoded.
fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airc_types::serde_compat::decode_b64;
    use airc_types::signing::verify_detached;

    fn strip(mut value: Value, field: &str) -> (Value, Vec<u8>) {
        let sig = value
            .as_object_mut()
            .unwrap()
            .remove(field)
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        (value, decode_b64(&sig).unwrap())
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = RecoveryKey::load_or_create(dir.path(), "scout").unwrap();
        let b = RecoveryKey::load_or_create(dir.path(), "scout").unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.path(), dir.path().join("scout.key"));
    }

    #[cfg(unix)]
    #[test]
    fn test_recovery_key_is_read_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let key = RecoveryKey::load_or_create(dir.path(), "scout").unwrap();
        let mode = std::fs::metadata(key.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
    }

    #[test]
    fn test_rotation_proof_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let key = RecoveryKey::load_or_create(dir.path(), "scout").unwrap();
        let proof = key.rotation_proof("bmV3LWtleQ==").unwrap();
        assert_eq!(proof["new_public_key"], "bmV3LWtleQ==");
        assert_eq!(proof["nonce"].as_str().unwrap().len(), 32);

        let (payload, sig) = strip(proof, "signature");
        let canonical = canonical_json(&payload).unwrap();
        assert!(canonical.starts_with(br#"{"new_public_key":"#));
        assert!(verify_detached(&key.public_key(), &canonical, &sig).is_ok());
    }

    #[test]
    fn test_revocation_proof_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let key = RecoveryKey::load_or_create(dir.path(), "scout").unwrap();
        let proof = key.revocation_proof("scout", "compromised").unwrap();
        assert_eq!(proof["v"], "0.2");
        assert_eq!(proof["action"], "revoke");

        let (payload, sig) = strip(proof, "proof");
        let canonical = canonical_json(&payload).unwrap();
        assert!(verify_detached(&key.public_key(), &canonical, &sig).is_ok());
    }

    #[test]
    fn test_canonical_json_sorted_and_compact() {
        let value = json!({"b": 1, "a": {"z": true, "c": [2, "x"]}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            br#"{"a":{"c":[2,"x"],"z":true},"b":1}"#.to_vec()
        );
    }

    #[test]
    fn test_nonces_differ() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
