use crate::state::{AuthStage, AuthState};

/// Whether remote sync can run right now, and why not when it can't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAvailability {
    pub can_sync: bool,
    pub disabled_message: Option<&'static str>,
}

impl SyncAvailability {
    pub fn from_state(state: &AuthState) -> Self {
        let disabled = |message| Self {
            can_sync: false,
            disabled_message: Some(message),
        };

        if state.stage() != AuthStage::Ready {
            return disabled("Cloud sync unavailable: unlock first.");
        }
        let has_repo = state
            .config()
            .is_some_and(|c| !c.gitee_owner.trim().is_empty() && !c.gitee_repo_name.trim().is_empty());
        if !has_repo {
            return disabled("Cloud sync unavailable: configure a repository first.");
        }
        if state.token().is_none_or(|t| t.trim().is_empty()) {
            return disabled("Cloud sync unavailable: this session has no usable token.");
        }
        if state.data_key().is_none() {
            return disabled("Cloud sync unavailable: this session has no data key, unlock again.");
        }
        Self {
            can_sync: true,
            disabled_message: None,
        }
    }
}
