//! Fernet token codec used for the encrypted config blob.
//!
//! Token layout (url-safe base64 on disk):
//! `0x80 | timestamp u64 BE | IV (16) | AES-128-CBC ciphertext | HMAC-SHA256 (32)`.
//! The HMAC covers every byte before it and is checked before any decryption.

use super::secret_key::SecretKey;
use crate::error::PhaseError;
use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const VERSION: u8 = 0x80;
const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const MAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + IV_LEN;

/// Verify and decrypt a token. Nothing is returned unless the whole token checks out.
pub fn decrypt(key: &SecretKey, token: &[u8]) -> Result<Zeroizing<Vec<u8>>, PhaseError> {
    let data = URL_SAFE
        .decode(token.trim_ascii())
        .map_err(|_| PhaseError::DecryptionFailed("token is not url-safe base64"))?;

    if data.len() < HEADER_LEN + BLOCK_LEN + MAC_LEN {
        return Err(PhaseError::DecryptionFailed("token is truncated"));
    }
    if data[0] != VERSION {
        return Err(PhaseError::DecryptionFailed("unsupported token version"));
    }

    let (signed, tag) = data.split_at(data.len() - MAC_LEN);
    let mut mac = signer(key)?;
    mac.update(signed);
    mac.verify_slice(tag)
        .map_err(|_| PhaseError::DecryptionFailed("token signature mismatch"))?;

    let iv = &signed[1 + TIMESTAMP_LEN..HEADER_LEN];
    let ciphertext = &signed[HEADER_LEN..];
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(PhaseError::DecryptionFailed("ciphertext is not block aligned"));
    }

    let plaintext = Aes128CbcDec::new_from_slices(key.encryption_key(), iv)
        .map_err(|_| PhaseError::DecryptionFailed("invalid cipher parameters"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| PhaseError::DecryptionFailed("invalid padding"))?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `plaintext` with a fresh IV and the current time.
pub fn encrypt(key: &SecretKey, plaintext: &[u8]) -> Result<String, PhaseError> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    encrypt_with(key, plaintext, iv, timestamp)
}

pub(crate) fn encrypt_with(
    key: &SecretKey,
    plaintext: &[u8],
    iv: [u8; IV_LEN],
    timestamp: u64,
) -> Result<String, PhaseError> {
    let ciphertext = Aes128CbcEnc::new_from_slices(key.encryption_key(), &iv)
        .map_err(|_| PhaseError::InvalidKey("invalid cipher parameters".to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + MAC_LEN);
    token.push(VERSION);
    token.extend_from_slice(&timestamp.to_be_bytes());
    token.extend_from_slice(&iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = signer(key)?;
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    Ok(URL_SAFE.encode(token))
}

fn signer(key: &SecretKey) -> Result<HmacSha256, PhaseError> {
    HmacSha256::new_from_slice(key.signing_key())
        .map_err(|_| PhaseError::InvalidKey("invalid signing key length".to_string()))
}
