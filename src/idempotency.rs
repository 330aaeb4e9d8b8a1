//! Claim-once semantics for logical operation keys.
//!
//! The booking path claims a key before doing any work; a second request with
//! the same key inside the TTL window sees the claim and collapses onto the
//! first outcome instead of re-executing. The store is abstracted behind
//! [`ClaimStore`] so the production backend is swappable and tests can run
//! against the in-memory implementation or a failing double.

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Ms;

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The key was absent (or expired) — this caller should proceed.
    Acquired,
    /// Another request holds the key and has not finished yet.
    InFlight,
    /// The operation already completed; the recorded outcome is returned.
    Completed(Ulid),
}

/// The external store is unreachable. Callers fail open on this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimStoreUnavailable;

impl std::fmt::Display for ClaimStoreUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idempotency store unreachable")
    }
}

impl std::error::Error for ClaimStoreUnavailable {}

/// Atomic claim/complete/release/expire semantics over an external store.
///
/// `claim` must be a single atomic check-and-insert: two concurrent callers
/// with the same key must never both see `Acquired`.
pub trait ClaimStore: Send + Sync {
    fn claim(&self, key: &str, ttl_ms: Ms, now: Ms) -> Result<ClaimOutcome, ClaimStoreUnavailable>;

    /// Record the outcome so a replayed request inside the TTL gets it back.
    /// The original expiry is kept — completed claims expire naturally.
    fn complete(&self, key: &str, appointment_id: Ulid) -> Result<(), ClaimStoreUnavailable>;

    /// Delete the key so a legitimate retry is not blocked for the full TTL.
    /// Used on definitive failure paths, never after success.
    fn release(&self, key: &str) -> Result<(), ClaimStoreUnavailable>;

    /// Drop expired entries. Returns how many were removed.
    fn sweep(&self, now: Ms) -> usize;
}

#[derive(Debug, Clone)]
enum ClaimState {
    InFlight { expires_at: Ms },
    Completed { appointment_id: Ulid, expires_at: Ms },
}

impl ClaimState {
    fn expires_at(&self) -> Ms {
        match self {
            ClaimState::InFlight { expires_at } | ClaimState::Completed { expires_at, .. } => {
                *expires_at
            }
        }
    }
}

/// DashMap-backed store. The entry API holds the shard lock across the
/// check-and-insert, which is what makes `claim` atomic.
pub struct InMemoryClaimStore {
    entries: DashMap<String, ClaimState>,
}

impl Default for InMemoryClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn claim(&self, key: &str, ttl_ms: Ms, now: Ms) -> Result<ClaimOutcome, ClaimStoreUnavailable> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(ClaimState::InFlight {
                    expires_at: now + ttl_ms,
                });
                Ok(ClaimOutcome::Acquired)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at() <= now {
                    // Expired marker — treat as absent.
                    slot.insert(ClaimState::InFlight {
                        expires_at: now + ttl_ms,
                    });
                    return Ok(ClaimOutcome::Acquired);
                }
                match slot.get() {
                    ClaimState::InFlight { .. } => Ok(ClaimOutcome::InFlight),
                    ClaimState::Completed { appointment_id, .. } => {
                        Ok(ClaimOutcome::Completed(*appointment_id))
                    }
                }
            }
        }
    }

    fn complete(&self, key: &str, appointment_id: Ulid) -> Result<(), ClaimStoreUnavailable> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            let expires_at = entry.expires_at();
            *entry = ClaimState::Completed {
                appointment_id,
                expires_at,
            };
        }
        Ok(())
    }

    fn release(&self, key: &str) -> Result<(), ClaimStoreUnavailable> {
        self.entries.remove(key);
        Ok(())
    }

    fn sweep(&self, now: Ms) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| state.expires_at() > now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Ms = 3_600_000;

    #[test]
    fn claim_once_then_in_flight() {
        let store = InMemoryClaimStore::new();
        assert_eq!(store.claim("k", TTL, 0), Ok(ClaimOutcome::Acquired));
        assert_eq!(store.claim("k", TTL, 1), Ok(ClaimOutcome::InFlight));
    }

    #[test]
    fn completed_claim_replays_outcome() {
        let store = InMemoryClaimStore::new();
        let appt = Ulid::new();
        store.claim("k", TTL, 0).unwrap();
        store.complete("k", appt).unwrap();
        assert_eq!(store.claim("k", TTL, 1), Ok(ClaimOutcome::Completed(appt)));
    }

    #[test]
    fn release_allows_retry() {
        let store = InMemoryClaimStore::new();
        store.claim("k", TTL, 0).unwrap();
        store.release("k").unwrap();
        assert_eq!(store.claim("k", TTL, 1), Ok(ClaimOutcome::Acquired));
    }

    #[test]
    fn expired_claim_treated_as_absent() {
        let store = InMemoryClaimStore::new();
        store.claim("k", TTL, 0).unwrap();
        assert_eq!(store.claim("k", TTL, TTL + 1), Ok(ClaimOutcome::Acquired));
    }

    #[test]
    fn completed_claim_expires_too() {
        let store = InMemoryClaimStore::new();
        store.claim("k", TTL, 0).unwrap();
        store.complete("k", Ulid::new()).unwrap();
        assert_eq!(store.claim("k", TTL, TTL + 1), Ok(ClaimOutcome::Acquired));
    }

    #[test]
    fn complete_keeps_original_expiry() {
        let store = InMemoryClaimStore::new();
        store.claim("k", TTL, 0).unwrap();
        // Completing at the eleventh hour does not extend the window.
        store.complete("k", Ulid::new()).unwrap();
        assert!(matches!(
            store.claim("k", TTL, TTL - 1),
            Ok(ClaimOutcome::Completed(_))
        ));
        assert_eq!(store.claim("k", TTL, TTL), Ok(ClaimOutcome::Acquired));
    }

    #[test]
    fn sweep_drops_expired_only() {
        let store = InMemoryClaimStore::new();
        store.claim("old", TTL, 0).unwrap();
        store.claim("new", TTL, TTL).unwrap();
        let removed = store.sweep(TTL + 1);
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.claim("new", TTL, TTL + 2), Ok(ClaimOutcome::InFlight));
    }

    #[test]
    fn concurrent_claims_only_one_acquires() {
        let store = Arc::new(InMemoryClaimStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.claim("contested", TTL, 0).unwrap()
            }));
        }
        let outcomes: Vec<ClaimOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let acquired = outcomes
            .iter()
            .filter(|o| **o == ClaimOutcome::Acquired)
            .count();
        assert_eq!(acquired, 1);
    }
}
