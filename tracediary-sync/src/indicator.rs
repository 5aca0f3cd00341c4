//! One-word summary of sync state for a status badge.

use crate::engine::{SyncState, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncIndicator {
    /// Remote sync is not configured or the session is locked.
    NotReady,
    Conflict,
    PendingRetry,
    Syncing,
    Synced,
    Failed,
    /// Nothing attempted yet.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Muted,
    Success,
    Warning,
    Danger,
}

/// The inputs the indicator depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncIndicatorInput {
    pub can_sync: bool,
    pub has_conflict: bool,
    pub is_offline: bool,
    pub has_pending_retry: bool,
    pub status: SyncStatus,
}

impl SyncIndicator {
    /// Conflict outranks offline, which outranks status.
    pub fn from_parts(input: SyncIndicatorInput) -> Self {
        if !input.can_sync {
            return SyncIndicator::NotReady;
        }
        if input.has_conflict {
            return SyncIndicator::Conflict;
        }
        if input.is_offline || input.has_pending_retry {
            return SyncIndicator::PendingRetry;
        }
        match input.status {
            SyncStatus::Syncing => SyncIndicator::Syncing,
            SyncStatus::Success => SyncIndicator::Synced,
            SyncStatus::Error => SyncIndicator::Failed,
            SyncStatus::Idle => SyncIndicator::Pending,
        }
    }

    pub fn from_state(can_sync: bool, state: &SyncState) -> Self {
        Self::from_parts(SyncIndicatorInput {
            can_sync,
            has_conflict: state.conflict.is_some(),
            is_offline: state.is_offline,
            has_pending_retry: state.has_pending_retry,
            status: state.status,
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncIndicator::NotReady => "Cloud not ready",
            SyncIndicator::Conflict => "Conflict detected",
            SyncIndicator::PendingRetry => "Offline, will retry",
            SyncIndicator::Syncing => "Syncing",
            SyncIndicator::Synced => "Synced",
            SyncIndicator::Failed => "Sync failed",
            SyncIndicator::Pending => "Not synced yet",
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            SyncIndicator::Synced => Tone::Success,
            SyncIndicator::Conflict | SyncIndicator::Failed => Tone::Danger,
            SyncIndicator::NotReady | SyncIndicator::PendingRetry | SyncIndicator::Syncing => {
                Tone::Warning
            }
            SyncIndicator::Pending => Tone::Muted,
        }
    }
}
