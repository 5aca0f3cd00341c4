//! PBKDF2-SHA256 key derivation with on-device latency calibration.
//!
//! Calibration measures how long a derivation takes at a candidate iteration
//! count and scales the count toward the middle of a target window. The
//! measurement function is injectable so calibration can be replayed
//! deterministically in tests.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DataKey, KEY_SIZE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

pub const DEFAULT_TARGET_MIN_MS: u64 = 200;
pub const DEFAULT_TARGET_MAX_MS: u64 = 500;
pub const DEFAULT_MIN_ITERATIONS: u32 = 150_000;
pub const DEFAULT_MAX_ITERATIONS: u32 = 1_000_000;
pub const DEFAULT_INITIAL_ITERATIONS: u32 = 300_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_SALT_LEN: usize = 16;

const VERIFIER_DOMAIN: &[u8] = b"tracediary-verifier-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    #[serde(rename = "PBKDF2")]
    Pbkdf2,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfHash {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(other)]
    Unsupported,
}

/// Parameters persisted alongside the password verifier.
///
/// Immutable once written: rotating the password produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub hash: KdfHash,
    pub iterations: u32,
    /// Base64-encoded salt.
    pub salt: String,
}

impl KdfParams {
    pub fn pbkdf2_sha256(iterations: u32, salt: &[u8]) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2,
            hash: KdfHash::Sha256,
            iterations,
            salt: STANDARD.encode(salt),
        }
    }

    /// Checks the parameters and returns the decoded salt.
    pub fn validate(&self) -> CryptoResult<Vec<u8>> {
        if self.algorithm != KdfAlgorithm::Pbkdf2 || self.hash != KdfHash::Sha256 {
            return Err(CryptoError::InvalidKdfParams(
                "unsupported algorithm or hash".into(),
            ));
        }
        if self.iterations == 0 {
            return Err(CryptoError::InvalidKdfParams(
                "iterations must be positive".into(),
            ));
        }
        if self.salt.is_empty() {
            return Err(CryptoError::InvalidKdfParams("salt must not be empty".into()));
        }
        let salt = STANDARD
            .decode(self.salt.trim())
            .map_err(|_| CryptoError::InvalidKdfParams("salt is not valid base64".into()))?;
        if salt.is_empty() {
            return Err(CryptoError::InvalidKdfParams("salt must not be empty".into()));
        }
        Ok(salt)
    }
}

/// Bounds for [`calibrate_kdf_params`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub target_min_ms: u64,
    pub target_max_ms: u64,
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub initial_iterations: u32,
    pub max_attempts: u32,
    pub salt_len: usize,
    /// Fixed base64 salt. A random salt of `salt_len` bytes is drawn when absent.
    pub salt: Option<String>,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            target_min_ms: DEFAULT_TARGET_MIN_MS,
            target_max_ms: DEFAULT_TARGET_MAX_MS,
            min_iterations: DEFAULT_MIN_ITERATIONS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            initial_iterations: DEFAULT_INITIAL_ITERATIONS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            salt_len: DEFAULT_SALT_LEN,
            salt: None,
        }
    }
}

impl CalibrationOptions {
    fn validate(&self) -> CryptoResult<()> {
        if self.target_min_ms == 0 || self.target_max_ms < self.target_min_ms {
            return Err(CryptoError::InvalidCalibration("invalid target window".into()));
        }
        if self.min_iterations == 0 || self.max_iterations < self.min_iterations {
            return Err(CryptoError::InvalidCalibration(
                "invalid iteration range".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CryptoError::InvalidCalibration(
                "max_attempts must be positive".into(),
            ));
        }
        if self.salt.is_none() && self.salt_len == 0 {
            return Err(CryptoError::InvalidCalibration(
                "salt_len must be positive".into(),
            ));
        }
        Ok(())
    }

    fn resolve_salt(&self) -> CryptoResult<Vec<u8>> {
        match &self.salt {
            Some(encoded) => {
                let salt = STANDARD.decode(encoded.trim()).map_err(|_| {
                    CryptoError::InvalidCalibration("salt is not valid base64".into())
                })?;
                if salt.is_empty() {
                    return Err(CryptoError::InvalidCalibration(
                        "salt must not be empty".into(),
                    ));
                }
                Ok(salt)
            }
            None => {
                let mut salt = vec![0u8; self.salt_len];
                rand::rng().fill_bytes(&mut salt);
                Ok(salt)
            }
        }
    }
}

fn clamp_iterations(value: f64, min: u32, max: u32) -> u32 {
    let rounded = value.round();
    if rounded.is_nan() || rounded <= f64::from(min) {
        min
    } else if rounded >= f64::from(max) {
        max
    } else {
        rounded as u32
    }
}

fn derive_bits(password: &str, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

/// Calibrates iterations using real PBKDF2 timings on this device.
///
/// CPU-bound; async callers should run it on a blocking thread.
pub fn calibrate_kdf_params(
    password: &str,
    options: &CalibrationOptions,
) -> CryptoResult<KdfParams> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    options.validate()?;
    let salt = options.resolve_salt()?;
    let timing_salt = salt.clone();
    calibrate_with_salt(options, salt, move |iterations| {
        let started = Instant::now();
        let mut bits = derive_bits(password, &timing_salt, iterations);
        bits.zeroize();
        started.elapsed()
    })
}

/// Calibrates iterations using a caller-supplied measurement function.
///
/// Given the same options (including a fixed salt) and the same measurement
/// function, the result is identical across runs.
pub fn calibrate_kdf_params_with<F>(
    password: &str,
    options: &CalibrationOptions,
    measure: F,
) -> CryptoResult<KdfParams>
where
    F: FnMut(u32) -> Duration,
{
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    options.validate()?;
    let salt = options.resolve_salt()?;
    calibrate_with_salt(options, salt, measure)
}

fn calibrate_with_salt<F>(
    options: &CalibrationOptions,
    salt: Vec<u8>,
    mut measure: F,
) -> CryptoResult<KdfParams>
where
    F: FnMut(u32) -> Duration,
{
    let min = options.min_iterations;
    let max = options.max_iterations;
    let target_min = options.target_min_ms as f64;
    let target_max = options.target_max_ms as f64;
    let target_mid = (target_min + target_max) / 2.0;

    let mut iterations = clamp_iterations(f64::from(options.initial_iterations), min, max);
    let mut measured = measure(iterations).as_secs_f64() * 1000.0;

    for _ in 1..options.max_attempts {
        if measured >= target_min && measured <= target_max {
            break;
        }

        let safe_ms = measured.max(1.0);
        let mut next = clamp_iterations(f64::from(iterations) * target_mid / safe_ms, min, max);

        // Scaling stalled at the current count: nudge by 10% instead.
        if next == iterations {
            let step = ((f64::from(iterations) * 0.1).round() as u32).max(1);
            next = if measured < target_min {
                iterations.saturating_add(step).min(max)
            } else {
                iterations.saturating_sub(step).max(min)
            };
        }

        if next == iterations {
            break;
        }

        iterations = next;
        measured = measure(iterations).as_secs_f64() * 1000.0;
    }

    Ok(KdfParams::pbkdf2_sha256(iterations, &salt))
}

/// Derives the AES-256-GCM data key. Pure function of its inputs.
pub fn derive_aes_key_from_password(password: &str, params: &KdfParams) -> CryptoResult<DataKey> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let salt = params.validate()?;
    Ok(DataKey::from_bytes(derive_bits(password, &salt, params.iterations)))
}

/// One-way verifier for the master password, base64-encoded.
///
/// Runs the same PBKDF2 derivation as the data key, then hashes it under a
/// separate domain so the stored verifier never equals the key.
pub fn hash_master_password(password: &str, params: &KdfParams) -> CryptoResult<String> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let salt = params.validate()?;
    let mut bits = derive_bits(password, &salt, params.iterations);
    let verifier = domain_verifier(&bits);
    bits.zeroize();
    Ok(verifier)
}

fn domain_verifier(bits: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(VERIFIER_DOMAIN);
    hasher.update(bits);
    STANDARD.encode(hasher.finalize())
}

/// Constant-time check of a password against a stored verifier.
///
/// Also accepts the legacy verifier format, base64 of the raw PBKDF2 bits,
/// which older configs carry.
pub fn verify_master_password(
    password: &str,
    params: &KdfParams,
    verifier: &str,
) -> CryptoResult<bool> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let salt = params.validate()?;
    let mut bits = derive_bits(password, &salt, params.iterations);
    let current = domain_verifier(&bits);
    let mut legacy = STANDARD.encode(bits);
    bits.zeroize();

    let stored = verifier.trim().as_bytes();
    let matches = current.as_bytes().ct_eq(stored) | legacy.as_bytes().ct_eq(stored);
    legacy.zeroize();
    Ok(matches.into())
}
