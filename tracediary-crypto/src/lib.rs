//! Envelope crypto for TraceDiary.
//!
//! - PBKDF2-SHA256 derives a 256-bit AES key from the master password, with
//!   iteration counts calibrated to a target latency on the current device
//! - AES-256-GCM seals payloads as `base64(iv || ciphertext || tag)`
//! - The remote API token is stored sealed under the password-derived key
//!
//! The master password is never persisted. Only a one-way verifier
//! (`hash_master_password`) and the [`KdfParams`] used to derive it are.

mod cipher;
mod error;
pub mod kdf;
mod key;
mod token;

pub use cipher::{decrypt_with_aes_gcm, encrypt_with_aes_gcm, IV_SIZE, MIN_PAYLOAD_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{
    calibrate_kdf_params, calibrate_kdf_params_with, derive_aes_key_from_password,
    hash_master_password, verify_master_password, CalibrationOptions, KdfAlgorithm, KdfHash,
    KdfParams,
};
pub use key::{DataKey, KEY_SIZE};
pub use token::{decrypt_token, encrypt_token};
