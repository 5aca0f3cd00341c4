//! Session and credential core for TraceDiary.
//!
//! [`AuthMachine`] owns the lock/unlock lifecycle:
//!
//! ```text
//! checking ─┬─> needs-setup ──initialize──────────────┐
//!           ├─> needs-unlock ──unlock──┬──────────────>├─> ready
//!           ├─> needs-token-refresh <──┘ ─update_token─┘     │
//!           └─> ready <───────────── silent restore          │
//!                needs-unlock <──────────── lock_now ────────┘
//! ```
//!
//! The master password is kept only in process memory. What reaches disk is
//! the verifier, the KDF parameters, the sealed remote token, two lock flags
//! and (through [`SecretCache`]) a session record sealed under a device-local
//! ephemeral key.

pub mod availability;
pub mod clock;
pub mod cloud_mirror;
pub mod config;
pub mod error;
pub mod machine;
pub mod password;
pub mod persistence;
pub mod secret_cache;
pub mod state;
pub mod validator;

pub use availability::SyncAvailability;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cloud_mirror::{
    CloudConfigMirror, CloudConfigRow, IdentitySession, NoopConfigMirror, RestConfigMirror,
    StaticIdentity,
};
pub use config::{AppConfig, AuthSettings, TokenCipherVersion};
pub use error::{AuthError, AuthResult};
pub use machine::{AuthDeps, AuthMachine, ConnectionSettings, SetupRequest};
pub use password::master_password_error;
pub use persistence::ConfigStore;
pub use secret_cache::{CachedSession, LocalSecretCache, SecretCache};
pub use state::{AuthEvent, AuthPhase, AuthStage, AuthState, TokenRefreshReason, UnlockedSession};
pub use validator::{HttpRepoValidator, RepoAccessValidator};
