//! Unlock Session
//!
//! Owns [`UnlockState`] and a monotonic auto-lock timer. Recovery on cold
//! start follows the four-branch rule in the design doc precisely: given a
//! persisted snapshot and the moment it was captured, decide whether to
//! lock, reschedule, or leave the controller's current state untouched.

use tokio::sync::RwLock;

use crate::types::UnlockState;

/// Why a lock happened, threaded through to the messenger event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Manual,
    Timeout,
    Suspend,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LockReason::Manual => "manual",
            LockReason::Timeout => "timeout",
            LockReason::Suspend => "suspend",
        };
        write!(f, "{}", s)
    }
}

/// A snapshot of [`UnlockState`] plus the moment it was captured, as
/// recovered from persisted vault metadata at process startup.
#[derive(Debug, Clone, Copy)]
pub struct UnlockStateSnapshot {
    pub state: UnlockState,
    pub captured_at: i64,
}

/// The action cold-start recovery decides to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Lock immediately; the auto-lock deadline already passed.
    LockWithReason(RecoveryLockReason),
    /// Reschedule the auto-lock timer to fire after the given delay.
    RescheduleAfterMs(u64),
    /// Leave the controller's current state as-is.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLockReason {
    Timeout,
    Suspend,
}

/// Holds the session state behind a lock so multiple dApp ports can await
/// it concurrently; call sites serialize through this lock the way a
/// single-threaded event loop would serialize through its task queue.
pub struct UnlockSession {
    state: RwLock<UnlockState>,
}

impl UnlockSession {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            state: RwLock::new(UnlockState {
                timeout_ms,
                ..UnlockState::default()
            }),
        }
    }

    pub async fn get_state(&self) -> UnlockState {
        *self.state.read().await
    }

    pub async fn unlock(&self, now_ms: i64) -> UnlockState {
        let mut state = self.state.write().await;
        state.is_unlocked = true;
        state.last_unlocked_at = Some(now_ms);
        state.next_auto_lock_at = Some(now_ms + state.timeout_ms as i64);
        *state
    }

    pub async fn lock(&self) -> UnlockState {
        let mut state = self.state.write().await;
        state.is_unlocked = false;
        state.next_auto_lock_at = None;
        *state
    }

    /// Re-arm the auto-lock deadline from `now_ms`. Called on every
    /// state-changing UI request while unlocked.
    pub async fn schedule_auto_lock(&self, now_ms: i64) {
        let mut state = self.state.write().await;
        if state.is_unlocked {
            state.next_auto_lock_at = Some(now_ms + state.timeout_ms as i64);
        }
    }

    pub async fn set_auto_lock_duration(&self, timeout_ms: u64) {
        let mut state = self.state.write().await;
        state.timeout_ms = timeout_ms;
    }

    /// Decide, but do not perform, the recovery action for a cold start.
    /// `controller_is_unlocked` reflects the live vault's current state,
    /// which may already disagree with the persisted snapshot (e.g. the
    /// vault was never successfully restored).
    pub fn plan_recovery(
        snapshot: &UnlockStateSnapshot,
        now_ms: i64,
        controller_is_unlocked: bool,
    ) -> RecoveryAction {
        // Negative elapsed (clock skew, snapshot captured in the "future")
        // clamps to zero rather than producing a negative reschedule delay.
        let _elapsed = (now_ms - snapshot.captured_at).max(0);

        if snapshot.state.is_unlocked && !controller_is_unlocked {
            return RecoveryAction::NoOp;
        }

        if !snapshot.state.is_unlocked && controller_is_unlocked {
            return RecoveryAction::LockWithReason(RecoveryLockReason::Suspend);
        }

        if snapshot.state.is_unlocked && controller_is_unlocked {
            match snapshot.state.next_auto_lock_at {
                Some(deadline) if deadline <= now_ms => {
                    return RecoveryAction::LockWithReason(RecoveryLockReason::Timeout);
                }
                Some(deadline) => {
                    let remaining = (deadline - now_ms).max(0) as u64;
                    let capped = remaining.min(snapshot.state.timeout_ms);
                    return RecoveryAction::RescheduleAfterMs(capped);
                }
                None => return RecoveryAction::NoOp,
            }
        }

        RecoveryAction::NoOp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlock_arms_auto_lock_deadline() {
        let session = UnlockSession::new(900_000);
        let state = session.unlock(1_000).await;
        assert!(state.is_unlocked);
        assert_eq!(state.next_auto_lock_at, Some(901_000));
    }

    #[tokio::test]
    async fn lock_clears_auto_lock_deadline() {
        let session = UnlockSession::new(900_000);
        session.unlock(1_000).await;
        let state = session.lock().await;
        assert!(!state.is_unlocked);
        assert_eq!(state.next_auto_lock_at, None);
    }

    #[test]
    fn recovery_locks_with_timeout_when_deadline_passed() {
        let snapshot = UnlockStateSnapshot {
            state: UnlockState {
                is_unlocked: true,
                timeout_ms: 900_000,
                last_unlocked_at: Some(0),
                next_auto_lock_at: Some(500),
            },
            captured_at: 0,
        };
        let action = UnlockSession::plan_recovery(&snapshot, 10_000, true);
        assert_eq!(
            action,
            RecoveryAction::LockWithReason(RecoveryLockReason::Timeout)
        );
    }

    #[test]
    fn recovery_reschedules_when_deadline_is_in_the_future() {
        let snapshot = UnlockStateSnapshot {
            state: UnlockState {
                is_unlocked: true,
                timeout_ms: 900_000,
                last_unlocked_at: Some(0),
                next_auto_lock_at: Some(20_000),
            },
            captured_at: 0,
        };
        let action = UnlockSession::plan_recovery(&snapshot, 10_000, true);
        assert_eq!(action, RecoveryAction::RescheduleAfterMs(10_000));
    }

    #[test]
    fn recovery_leaves_locked_controller_alone_even_if_snapshot_was_unlocked() {
        let snapshot = UnlockStateSnapshot {
            state: UnlockState {
                is_unlocked: true,
                timeout_ms: 900_000,
                last_unlocked_at: Some(0),
                next_auto_lock_at: Some(20_000),
            },
            captured_at: 0,
        };
        let action = UnlockSession::plan_recovery(&snapshot, 10_000, false);
        assert_eq!(action, RecoveryAction::NoOp);
    }

    #[test]
    fn recovery_locks_with_suspend_when_snapshot_locked_but_controller_unlocked() {
        let snapshot = UnlockStateSnapshot {
            state: UnlockState {
                is_unlocked: false,
                timeout_ms: 900_000,
                last_unlocked_at: None,
                next_auto_lock_at: None,
            },
            captured_at: 0,
        };
        let action = UnlockSession::plan_recovery(&snapshot, 10_000, true);
        assert_eq!(
            action,
            RecoveryAction::LockWithReason(RecoveryLockReason::Suspend)
        );
    }

    #[test]
    fn recovery_clamps_negative_elapsed_to_zero() {
        let snapshot = UnlockStateSnapshot {
            state: UnlockState {
                is_unlocked: true,
                timeout_ms: 900_000,
                last_unlocked_at: Some(0),
                next_auto_lock_at: Some(50_000),
            },
            captured_at: 100_000,
        };
        // now_ms is earlier than captured_at - a clock skew case.
        let action = UnlockSession::plan_recovery(&snapshot, 10_000, true);
        assert_eq!(action, RecoveryAction::RescheduleAfterMs(40_000));
    }
}
