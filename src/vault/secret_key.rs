use crate::error::PhaseError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Raw key length: 16 bytes HMAC signing key followed by 16 bytes AES key.
pub const KEY_LEN: usize = 32;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Parse key-file text: url-safe base64 of 32 bytes, surrounding whitespace ignored.
    pub fn from_encoded(text: &[u8]) -> Result<Self, PhaseError> {
        let decoded = Zeroizing::new(
            URL_SAFE
                .decode(text.trim_ascii())
                .map_err(|e| PhaseError::InvalidKey(format!("key is not url-safe base64: {e}")))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(PhaseError::InvalidKey(format!(
                "key must decode to {KEY_LEN} bytes, got {}",
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Key-file text for this key.
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.bytes))
    }

    pub(crate) fn signing_key(&self) -> &[u8] {
        &self.bytes[..16]
    }

    pub(crate) fn encryption_key(&self) -> &[u8] {
        &self.bytes[16..]
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Read the symmetric key from `path`.
pub fn load_key(path: &Path) -> Result<SecretKey, PhaseError> {
    let raw = Zeroizing::new(fs::read(path).map_err(|source| PhaseError::KeyUnavailable {
        path: path.to_path_buf(),
        source,
    })?);
    SecretKey::from_encoded(&raw)
}

/// Write a key file readable only by its owner.
pub fn store_key(path: &Path, key: &SecretKey) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key.encode().as_bytes())?;
    file.sync_all()
}
