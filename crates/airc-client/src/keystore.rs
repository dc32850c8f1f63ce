//! KeyStore: the agent's persistent Ed25519 identity.
//!
//! Key files live at `{key_dir}/{agent_name}.key` (private, 0600) with the
//! public half mirrored at `{agent_name}.pub`. The private key file records
//! both halves; every load re-derives the public key from the private key
//! and refuses to continue if they disagree. A damaged key file is never
//! silently replaced, since that would change the agent's identity.

use airc_types::config::ClientConfig;
use airc_types::signing::{encode_public_key, fingerprint};
use airc_types::{AircError, AircResult};
use airc_wire::EnvelopeSigner;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// On-disk key file format version.
const KEY_FILE_VERSION: u32 = 1;

/// Serialized key file.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyFile {
    version: u32,
    agent_name: String,
    /// Base64 raw public key.
    public_key: String,
    /// Hex raw 32-byte private key.
    private_key: String,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
}

/// The agent's loaded identity. The private key stays inside; callers sign
/// through [`Identity::sign`].
pub struct Identity {
    agent_name: String,
    signing_key: SigningKey,
    public_key: VerifyingKey,
    created_at: DateTime<Utc>,
}

impl Identity {
    fn from_signing_key(
        agent_name: impl Into<String>,
        signing_key: SigningKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        let public_key = signing_key.verifying_key();
        Self {
            agent_name: agent_name.into(),
            signing_key,
            public_key,
            created_at,
        }
    }

    /// A throwaway identity that is never persisted.
    pub fn ephemeral(agent_name: impl Into<String>) -> Self {
        Self::from_signing_key(agent_name, SigningKey::generate(&mut OsRng), Utc::now())
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.public_key
    }

    /// Base64 public key as registered with the relay.
    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public_key)
    }

    /// Short SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Deterministic signature over the exact bytes given.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl EnvelopeSigner for Identity {
    fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("agent_name", &self.agent_name)
            .field("fingerprint", &self.fingerprint())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Persistent storage for one agent's signing keypair.
#[derive(Debug, Clone)]
pub struct KeyStore {
    key_dir: PathBuf,
    agent_name: String,
}

impl KeyStore {
    /// Key store rooted at an explicit directory.
    pub fn new(key_dir: impl Into<PathBuf>, agent_name: impl Into<String>) -> Self {
        Self {
            key_dir: key_dir.into(),
            agent_name: agent_name.into(),
        }
    }

    /// Key store at the configured `key_dir`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.key_dir.clone(),
            config.agent_name.trim_start_matches('@'),
        )
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.key", self.agent_name))
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.pub", self.agent_name))
    }

    /// Where the outbound nonce counter for this identity is persisted.
    pub fn nonce_path(&self) -> PathBuf {
        self.key_dir.join(format!("{}.nonce", self.agent_name))
    }

    /// Load the persisted identity, or generate and persist a new one.
    ///
    /// Fails with `KeyStoreCorrupt` when key material exists but cannot be
    /// trusted.
    pub fn load_or_create(&self) -> AircResult<Identity> {
        let key_path = self.key_path();
        if key_path.exists() {
            let (signing_key, created_at) = load_keypair(&key_path, &self.agent_name)?;
            let identity = Identity::from_signing_key(&self.agent_name, signing_key, created_at);
            info!(
                agent = %self.agent_name,
                fingerprint = %identity.fingerprint(),
                "Loaded identity"
            );
            return Ok(identity);
        }

        if self.public_key_path().exists() {
            return Err(AircError::KeyStoreCorrupt(format!(
                "{} exists but private key {} is missing",
                self.public_key_path().display(),
                key_path.display()
            )));
        }

        let (signing_key, created_at) = create_keypair(&key_path, &self.agent_name, 0o600)?;
        let identity = Identity::from_signing_key(&self.agent_name, signing_key, created_at);
        std::fs::write(self.public_key_path(), identity.public_key_base64())?;
        info!(
            agent = %self.agent_name,
            fingerprint = %identity.fingerprint(),
            path = %key_path.display(),
            "Generated new identity"
        );
        Ok(identity)
    }
}

/// Generate a keypair and write it to `path` with the given unix mode.
pub(crate) fn create_keypair(
    path: &Path,
    agent_name: &str,
    mode: u32,
) -> AircResult<(SigningKey, DateTime<Utc>)> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
        restrict_dir_permissions(dir);
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let created_at = Utc::now();
    let file = KeyFile {
        version: KEY_FILE_VERSION,
        agent_name: agent_name.to_string(),
        public_key: encode_public_key(&signing_key.verifying_key()),
        private_key: hex::encode(signing_key.to_bytes()),
        created_at,
    };
    let body = Zeroizing::new(serde_json::to_vec_pretty(&file)?);
    write_private_file(path, &body, mode)?;
    Ok((signing_key, created_at))
}

/// Read and validate a key file.
pub(crate) fn load_keypair(
    path: &Path,
    agent_name: &str,
) -> AircResult<(SigningKey, DateTime<Utc>)> {
    warn_if_world_accessible(path);

    let corrupt =
        |reason: String| AircError::KeyStoreCorrupt(format!("{}: {reason}", path.display()));

    let text = Zeroizing::new(std::fs::read_to_string(path)?);
    let file: KeyFile =
        serde_json::from_str(&text).map_err(|e| corrupt(format!("unparseable key file: {e}")))?;

    if file.version != KEY_FILE_VERSION {
        return Err(corrupt(format!("unsupported key file version {}", file.version)));
    }
    if file.agent_name != agent_name {
        return Err(corrupt(format!(
            "key file belongs to '{}', expected '{agent_name}'",
            file.agent_name
        )));
    }

    let mut raw = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(file.private_key.as_bytes(), raw.as_mut_slice())
        .map_err(|e| corrupt(format!("invalid private key: {e}")))?;
    let signing_key = SigningKey::from_bytes(&raw);

    let derived = encode_public_key(&signing_key.verifying_key());
    let consistent: bool = derived.as_bytes().ct_eq(file.public_key.as_bytes()).into();
    if !consistent {
        return Err(corrupt(
            "public key is not derivable from private key".to_string(),
        ));
    }

    Ok((signing_key, file.created_at))
}

fn write_private_file(path: &Path, bytes: &[u8], mode: u32) -> AircResult<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Restrict directory permissions to owner-only (0700) on Unix.
#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}

#[cfg(unix)]
fn warn_if_world_accessible(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:o}"),
                "Key file is accessible to other users"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_accessible(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use airc_types::signing::verify_detached;

    #[test]
    fn test_create_then_load_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys"), "scout");
        let first = store.load_or_create().unwrap();
        assert!(store.key_path().exists());
        assert!(store.public_key_path().exists());

        let second = store.load_or_create().unwrap();
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.created_at(), second.created_at());
        assert_eq!(
            std::fs::read_to_string(store.public_key_path()).unwrap(),
            first.public_key_base64()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys"), "scout");
        store.load_or_create().unwrap();
        let mode = std::fs::metadata(store.key_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(dir.path().join("keys"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_signing_is_deterministic_and_verifiable() {
        let identity = Identity::ephemeral("scout");
        let a = identity.sign(b"message");
        let b = identity.sign(b"message");
        assert_eq!(a, b);
        assert!(verify_detached(&identity.public_key(), b"message", &a.to_bytes()).is_ok());
    }

    #[test]
    fn test_garbage_file_is_corrupt_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path(), "scout");
        std::fs::write(store.key_path(), "-----BEGIN nonsense-----").unwrap();
        let err = store.load_or_create().unwrap_err();
        assert!(matches!(err, AircError::KeyStoreCorrupt(_)));
        assert_eq!(
            std::fs::read_to_string(store.key_path()).unwrap(),
            "-----BEGIN nonsense-----"
        );
    }

    #[test]
    fn test_mismatched_public_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path(), "scout");
        store.load_or_create().unwrap();

        let text = std::fs::read_to_string(store.key_path()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["public_key"] = Identity::ephemeral("x").public_key_base64().into();
        std::fs::write(store.key_path(), serde_json::to_vec(&value).unwrap()).unwrap();

        let err = store.load_or_create().unwrap_err();
        assert!(err.to_string().contains("not derivable"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_truncated_private_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path(), "scout");
        store.load_or_create().unwrap();

        let text = std::fs::read_to_string(store.key_path()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["private_key"] = "abcd".into();
        std::fs::write(store.key_path(), serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            store.load_or_create(),
            Err(AircError::KeyStoreCorrupt(_))
        ));
    }

    #[test]
    fn test_orphan_public_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path(), "scout");
        std::fs::write(store.public_key_path(), "cHVi").unwrap();
        assert!(matches!(
            store.load_or_create(),
            Err(AircError::KeyStoreCorrupt(_))
        ));
        assert!(!store.key_path().exists());
    }

    #[test]
    fn test_key_file_for_other_agent_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        KeyStore::new(dir.path(), "scout").load_or_create().unwrap();
        std::fs::rename(dir.path().join("scout.key"), dir.path().join("ranger.key")).unwrap();
        let err = KeyStore::new(dir.path(), "ranger")
            .load_or_create()
            .unwrap_err();
        assert!(err.to_string().contains("belongs to 'scout'"));
    }

    #[test]
    fn test_from_config_strips_at() {
        let mut config = ClientConfig::for_agent("@scout");
        config.key_dir = PathBuf::from("/tmp/airc-keys");
        let store = KeyStore::from_config(&config);
        assert_eq!(store.key_path(), PathBuf::from("/tmp/airc-keys/scout.key"));
        assert_eq!(store.nonce_path(), PathBuf::from("/tmp/airc-keys/scout.nonce"));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let identity = Identity::ephemeral("scout");
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("scout"));
        assert!(rendered.contains(&identity.fingerprint()));
        assert!(!rendered.contains("signing_key"));
    }
}
