//! AES-256-GCM sealing with an IV-prefixed, base64 wire format.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DataKey;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// GCM IV length in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Smallest decodable payload: an IV and a tag around empty plaintext.
pub const MIN_PAYLOAD_SIZE: usize = IV_SIZE + TAG_SIZE;

/// Encrypts `plaintext` under a fresh random IV.
///
/// Output is `base64(iv || ciphertext || tag)`.
pub fn encrypt_with_aes_gcm(plaintext: &str, key: &DataKey) -> CryptoResult<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encryption)?;

    let mut payload = Vec::with_capacity(IV_SIZE + sealed.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&sealed);
    Ok(STANDARD.encode(payload))
}

/// Decrypts a payload produced by [`encrypt_with_aes_gcm`].
///
/// Whitespace inside the base64 text is ignored. A tag mismatch is always
/// [`CryptoError::Decryption`], never an empty result.
pub fn decrypt_with_aes_gcm(encoded: &str, key: &DataKey) -> CryptoResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let payload = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| CryptoError::InvalidCiphertext("not valid base64".into()))?;
    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(CryptoError::InvalidCiphertext(format!(
            "payload is {} bytes, need at least {MIN_PAYLOAD_SIZE}",
            payload.len()
        )));
    }

    let (iv, sealed) = payload.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| CryptoError::Decryption)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::InvalidCiphertext("plaintext is not valid UTF-8".into()))
}
