use chrono::{TimeZone, Utc};
use tracediary_auth::{
    AppConfig, AuthEvent, AuthState, SyncAvailability, TokenCipherVersion, TokenRefreshReason,
    UnlockedSession,
};
use tracediary_crypto::{DataKey, KdfParams};

fn config(owner: &str) -> AppConfig {
    AppConfig {
        gitee_repo: format!("https://gitee.com/{owner}/diary"),
        gitee_owner: owner.into(),
        gitee_repo_name: "diary".into(),
        gitee_branch: None,
        password_hash: "verifier".into(),
        password_expiry: Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).unwrap(),
        kdf_params: KdfParams::pbkdf2_sha256(1_000, b"salt-salt"),
        encrypted_token: Some("sealed".into()),
        token_cipher_version: TokenCipherVersion::V1,
    }
}

fn ready(owner: &str, token: &str) -> AuthState {
    AuthState::default().reduce(AuthEvent::Unlocked {
        config: config(owner),
        session: UnlockedSession::new(token, DataKey::from_bytes([3; 32])),
    })
}

#[test]
fn ready_session_can_sync() {
    let availability = SyncAvailability::from_state(&ready("alice", "tok"));
    assert!(availability.can_sync);
    assert_eq!(availability.disabled_message, None);
}

#[test]
fn locked_states_cannot_sync() {
    let checking = AuthState::default();
    assert!(!SyncAvailability::from_state(&checking).can_sync);

    let refresh = checking.reduce(AuthEvent::TokenRefreshRequired {
        config: config("alice"),
        reason: TokenRefreshReason::TokenInvalid,
        needs_master_password: false,
        message: None,
    });
    let availability = SyncAvailability::from_state(&refresh);
    assert!(!availability.can_sync);
    assert_eq!(
        availability.disabled_message,
        Some("Cloud sync unavailable: unlock first.")
    );
}

#[test]
fn missing_repo_or_token_is_reported() {
    let no_repo = SyncAvailability::from_state(&ready("  ", "tok"));
    assert_eq!(
        no_repo.disabled_message,
        Some("Cloud sync unavailable: configure a repository first.")
    );

    let blank_token = SyncAvailability::from_state(&ready("alice", "   "));
    assert_eq!(
        blank_token.disabled_message,
        Some("Cloud sync unavailable: this session has no usable token.")
    );
}
