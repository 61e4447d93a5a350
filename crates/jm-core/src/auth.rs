//! Challenge-based caller authentication
//!
//! Every outgoing call carries `Authorization: Basic base64(user:challenge)`.
//! The challenge is `nonce:issued_at:signature`, where the signature is an
//! SSH signature (namespace [`SIGNATURE_NAMESPACE`]) of `nonce:issued_at`
//! made with the caller's Ed25519 key.
//!
//! # Key Files
//!
//! - `id_ed25519`: the local private key in OpenSSH format, created on first
//!   use with mode 0600 on Unix
//! - `authorized_keys`: one `<user> <openssh-public-key>` per line
//!
//! A receiver verifies a challenge from its own user against its own public
//! key, and from any other user against `authorized_keys`. Verification
//! failures never reject a request; they only leave it unauthenticated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey, SshSig};

use crate::error::AuthError;
use crate::time::unix_now_secs;

/// Namespace bound into every challenge signature
pub const SIGNATURE_NAMESPACE: &str = "jobmesh";

/// Private key file name
const PRIVATE_KEY_FILENAME: &str = "id_ed25519";

/// Authorized keys file name
const AUTHORIZED_KEYS_FILENAME: &str = "authorized_keys";

/// Location of the key pair and the authorized keys
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Key store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the private key
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILENAME)
    }

    /// Path of the authorized keys file
    pub fn authorized_keys_path(&self) -> PathBuf {
        self.dir.join(AUTHORIZED_KEYS_FILENAME)
    }

    /// Load the private key if it exists
    pub fn load(&self) -> Result<Option<PrivateKey>, AuthError> {
        let path = self.private_key_path();
        if !path.exists() {
            return Ok(None);
        }
        let pem = fs::read_to_string(&path)?;
        Ok(Some(PrivateKey::from_openssh(pem)?))
    }

    /// Load the private key, generating and persisting one if missing
    pub fn load_or_create(&self) -> Result<PrivateKey, AuthError> {
        if let Some(key) = self.load()? {
            return Ok(key);
        }

        let key = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)?;
        let path = self.private_key_path();
        write_private(&path, key.to_openssh(LineEnding::LF)?.as_bytes())?;
        tracing::info!("Generated new key pair at {:?}", path);
        Ok(key)
    }

    /// Public key registered for `user` in `authorized_keys`
    pub fn authorized_key(&self, user: &str) -> Result<Option<PublicKey>, AuthError> {
        let content = match fs::read_to_string(self.authorized_keys_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, key)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            if name != user {
                continue;
            }
            match PublicKey::from_openssh(key.trim()) {
                Ok(key) => return Ok(Some(key)),
                Err(e) => tracing::warn!("Ignoring unparsable key for {}: {}", user, e),
            }
        }
        Ok(None)
    }

    /// Append a `user key` line to `authorized_keys`
    pub fn authorize(&self, user: &str, key: &PublicKey) -> Result<(), AuthError> {
        use std::io::Write;

        if user.is_empty() || user.contains(char::is_whitespace) {
            return Err(AuthError::Malformed(format!("invalid user name {:?}", user)));
        }
        fs::create_dir_all(&self.dir)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.authorized_keys_path())?;
        writeln!(file, "{} {}", user, key.to_openssh()?)?;
        Ok(())
    }
}

/// Write a file readable only by its owner
fn write_private(path: &Path, content: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Identity used to sign outgoing challenges
#[derive(Clone)]
pub struct Credentials {
    user: String,
    key: PrivateKey,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Credentials for `user` signing with `key`
    pub fn new(user: impl Into<String>, key: PrivateKey) -> Self {
        Self {
            user: user.into(),
            key,
        }
    }

    /// Credentials of the local user from the key store
    pub fn local(store: &KeyStore) -> Result<Self, AuthError> {
        Ok(Self::new(crate::host::user_name(), store.load_or_create()?))
    }

    /// User name carried in the header
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Fresh one-time challenge
    pub fn challenge(&self) -> Result<String, AuthError> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.challenge_at(&nonce, unix_now_secs())
    }

    fn challenge_at(&self, nonce: &str, issued_at: u64) -> Result<String, AuthError> {
        let message = format!("{}:{}", nonce, issued_at);
        let signature = self
            .key
            .sign(SIGNATURE_NAMESPACE, HashAlg::Sha512, message.as_bytes())?;
        let encoded = STANDARD.encode(signature.to_pem(LineEnding::LF)?);
        Ok(format!("{}:{}", message, encoded))
    }

    /// Value of the `Authorization` header for one call
    pub fn authorization_header(&self) -> Result<String, AuthError> {
        let token = format!("{}:{}", self.user, self.challenge()?);
        Ok(format!("Basic {}", STANDARD.encode(token)))
    }
}

/// Receiving side of the challenge check
#[derive(Debug, Clone)]
pub struct Verifier {
    local_user: String,
    local_key: Option<PublicKey>,
    store: KeyStore,
    max_age: Duration,
}

impl Verifier {
    /// Verifier for this process, using the local key store
    pub fn new(store: KeyStore, max_age: Duration) -> Result<Self, AuthError> {
        let local_key = store.load()?.map(|key| key.public_key().clone());
        if local_key.is_none() {
            tracing::debug!("No local key in {:?}, own-user challenges will fail", store.dir);
        }
        Ok(Self {
            local_user: crate::host::user_name(),
            local_key,
            store,
            max_age,
        })
    }

    /// Override the user treated as "self"
    pub fn with_local_user(mut self, user: impl Into<String>) -> Self {
        self.local_user = user.into();
        self
    }

    /// Check an `Authorization` header value, returning the caller's user name
    pub fn verify_header(&self, header: &str) -> Result<String, AuthError> {
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| AuthError::Malformed("not a Basic credential".to_string()))?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let decoded =
            String::from_utf8(decoded).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let (user, challenge) = decoded
            .split_once(':')
            .ok_or_else(|| AuthError::Malformed("missing challenge".to_string()))?;

        self.verify(user, challenge)?;
        Ok(user.to_string())
    }

    /// Check one challenge for `user`
    pub fn verify(&self, user: &str, challenge: &str) -> Result<(), AuthError> {
        let mut parts = challenge.splitn(3, ':');
        let (Some(nonce), Some(issued_at), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed("challenge needs three parts".to_string()));
        };

        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| AuthError::Malformed(format!("bad timestamp {:?}", issued_at)))?;
        let age = unix_now_secs().abs_diff(issued_at);
        if age > self.max_age.as_secs() {
            return Err(AuthError::Expired);
        }

        let key = self.key_for(user)?;
        let pem = STANDARD
            .decode(signature)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let pem = String::from_utf8(pem).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let signature = SshSig::from_pem(pem)?;

        let message = format!("{}:{}", nonce, issued_at);
        key.verify(SIGNATURE_NAMESPACE, message.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)
    }

    fn key_for(&self, user: &str) -> Result<PublicKey, AuthError> {
        if user == self.local_user {
            if let Some(key) = &self.local_key {
                return Ok(key.clone());
            }
        }
        self.store
            .authorized_key(user)?
            .ok_or_else(|| AuthError::UnknownUser(user.to_string()))
    }
}
