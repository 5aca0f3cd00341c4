use crate::cipher::{decrypt_with_aes_gcm, encrypt_with_aes_gcm};
use crate::error::CryptoResult;
use crate::kdf::{derive_aes_key_from_password, KdfParams};

/// Seals the remote API token under the password-derived key.
pub fn encrypt_token(token: &str, password: &str, params: &KdfParams) -> CryptoResult<String> {
    let key = derive_aes_key_from_password(password, params)?;
    encrypt_with_aes_gcm(token, &key)
}

/// Opens a token sealed by [`encrypt_token`]. A wrong password yields
/// [`crate::CryptoError::Decryption`].
pub fn decrypt_token(sealed: &str, password: &str, params: &KdfParams) -> CryptoResult<String> {
    let key = derive_aes_key_from_password(password, params)?;
    decrypt_with_aes_gcm(sealed, &key)
}
