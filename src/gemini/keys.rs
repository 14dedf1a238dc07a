//! Provider key rotation and health tracking.
//!
//! Round-robin selection with skip-on-cooldown: a key that failed severely
//! (or three times in a row) is quarantined for five minutes, then lazily
//! rehabilitated the next time the rotation passes over it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

pub const KEY_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

#[derive(Debug)]
struct KeyState {
    key: String,
    healthy: bool,
    cooldown_until: Option<Instant>,
    consecutive_errors: u32,
    last_used: Option<Instant>,
}

/// Masked diagnostic view; never exposes the raw credential.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStateView {
    pub key: String,
    pub healthy: bool,
    pub cooldown_remaining_secs: Option<u64>,
    pub consecutive_errors: u32,
}

struct Ring {
    states: Vec<KeyState>,
    pointer: usize,
}

pub struct KeyManager {
    inner: Mutex<Ring>,
}

impl KeyManager {
    /// The key set is fixed for process lifetime.
    pub fn new(keys: Vec<String>) -> Self {
        let states = keys
            .into_iter()
            .map(|key| KeyState {
                key,
                healthy: true,
                cooldown_until: None,
                consecutive_errors: 0,
                last_used: None,
            })
            .collect();
        Self {
            inner: Mutex::new(Ring { states, pointer: 0 }),
        }
    }

    /// Picks the next eligible key, continuing the rotation from wherever
    /// it left off. Returns `None` only when every key is cooling down.
    pub fn pick_key(&self) -> Option<String> {
        self.pick_key_at(Instant::now())
    }

    fn pick_key_at(&self, now: Instant) -> Option<String> {
        let mut ring = self.inner.lock().expect("key ring lock poisoned");
        let len = ring.states.len();
        for offset in 0..len {
            let idx = (ring.pointer + offset) % len;
            let state = &mut ring.states[idx];
            if !state.healthy {
                match state.cooldown_until {
                    Some(until) if until > now => continue,
                    _ => {
                        // cooldown elapsed: one more chance, counter reset
                        state.healthy = true;
                        state.consecutive_errors = 0;
                        state.cooldown_until = None;
                    }
                }
            }
            state.last_used = Some(now);
            let key = state.key.clone();
            ring.pointer = idx + 1;
            return Some(key);
        }
        None
    }

    /// Resets the error counter and re-marks the key healthy. Idempotent.
    pub fn report_success(&self, key: &str) {
        let mut ring = self.inner.lock().expect("key ring lock poisoned");
        if let Some(state) = ring.states.iter_mut().find(|s| s.key == key) {
            state.consecutive_errors = 0;
            state.healthy = true;
            state.cooldown_until = None;
        }
    }

    /// Counts a failure. A severe failure, or the third consecutive one,
    /// quarantines the key for [`KEY_COOLDOWN`].
    pub fn report_error(&self, key: &str, severe: bool) {
        self.report_error_at(key, severe, Instant::now());
    }

    fn report_error_at(&self, key: &str, severe: bool, now: Instant) {
        let mut ring = self.inner.lock().expect("key ring lock poisoned");
        let Some(state) = ring.states.iter_mut().find(|s| s.key == key) else {
            return;
        };
        state.consecutive_errors += 1;
        if severe || state.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            state.healthy = false;
            state.cooldown_until = Some(now + KEY_COOLDOWN);
            tracing::warn!(
                key = %mask(&state.key),
                severe,
                consecutive_errors = state.consecutive_errors,
                "Provider key quarantined"
            );
        }
    }

    pub fn list_key_states(&self) -> Vec<KeyStateView> {
        self.list_key_states_at(Instant::now())
    }

    fn list_key_states_at(&self, now: Instant) -> Vec<KeyStateView> {
        let ring = self.inner.lock().expect("key ring lock poisoned");
        ring.states
            .iter()
            .map(|state| KeyStateView {
                key: mask(&state.key),
                healthy: state.healthy,
                cooldown_remaining_secs: state
                    .cooldown_until
                    .and_then(|until| until.checked_duration_since(now))
                    .map(|d| d.as_secs()),
                consecutive_errors: state.consecutive_errors,
            })
            .collect()
    }
}

/// Short non-reversible display form: first 4 and last 4 characters.
/// Counts characters, not bytes, so multibyte keys cannot slice mid-char.
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager(n: usize) -> KeyManager {
        KeyManager::new((0..n).map(|i| format!("test-key-{:04}", i)).collect())
    }

    #[test]
    fn round_robin_returns_distinct_keys_before_repeating() {
        let mgr = manager(3);
        let now = Instant::now();
        let picks: Vec<_> = (0..3).map(|_| mgr.pick_key_at(now).unwrap()).collect();
        assert_eq!(
            picks,
            vec!["test-key-0000", "test-key-0001", "test-key-0002"]
        );
        // rotation wraps, continuing from where it left off
        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0000");
    }

    #[test]
    fn severe_error_quarantines_immediately() {
        let mgr = manager(2);
        let now = Instant::now();
        mgr.report_error_at("test-key-0000", true, now);

        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0001");
        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0001");
    }

    #[test]
    fn third_consecutive_error_quarantines() {
        let mgr = manager(2);
        let now = Instant::now();
        mgr.report_error_at("test-key-0000", false, now);
        mgr.report_error_at("test-key-0000", false, now);
        let states = mgr.list_key_states_at(now);
        assert!(states[0].healthy, "two errors are not yet a quarantine");

        mgr.report_error_at("test-key-0000", false, now);
        let states = mgr.list_key_states_at(now);
        assert!(!states[0].healthy);
        assert_eq!(states[0].cooldown_remaining_secs, Some(KEY_COOLDOWN.as_secs()));
    }

    #[test]
    fn success_resets_error_counter() {
        let mgr = manager(1);
        let now = Instant::now();
        mgr.report_error_at("test-key-0000", false, now);
        mgr.report_error_at("test-key-0000", false, now);
        mgr.report_success("test-key-0000");
        mgr.report_error_at("test-key-0000", false, now);

        let states = mgr.list_key_states_at(now);
        assert!(states[0].healthy);
        assert_eq!(states[0].consecutive_errors, 1);
    }

    #[test]
    fn cooldown_elapses_and_key_is_rehabilitated() {
        let mgr = manager(1);
        let t0 = Instant::now();
        mgr.report_error_at("test-key-0000", true, t0);
        assert!(mgr.pick_key_at(t0).is_none());

        // still cooling just before the boundary
        let almost = t0 + KEY_COOLDOWN - Duration::from_secs(1);
        assert!(mgr.pick_key_at(almost).is_none());

        // eligible again once the cooldown has elapsed, counter reset
        let after = t0 + KEY_COOLDOWN;
        assert_eq!(mgr.pick_key_at(after).unwrap(), "test-key-0000");
        let states = mgr.list_key_states_at(after);
        assert!(states[0].healthy);
        assert_eq!(states[0].consecutive_errors, 0);
    }

    #[test]
    fn exhaustion_returns_none_without_panicking() {
        let mgr = manager(3);
        let now = Instant::now();
        for i in 0..3 {
            mgr.report_error_at(&format!("test-key-{:04}", i), true, now);
        }
        assert!(mgr.pick_key_at(now).is_none());
    }

    #[test]
    fn rotation_skips_cooling_keys() {
        let mgr = manager(3);
        let now = Instant::now();
        mgr.report_error_at("test-key-0001", true, now);

        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0000");
        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0002");
        assert_eq!(mgr.pick_key_at(now).unwrap(), "test-key-0000");
    }

    #[test]
    fn snapshot_masks_credentials() {
        let mgr = KeyManager::new(vec![
            "AIzaSyExampleExampleKey1".to_string(),
            "short".to_string(),
        ]);
        let states = mgr.list_key_states();
        assert_eq!(states[0].key, "AIza...Key1");
        assert_eq!(states[1].key, "****");
    }

    #[test]
    fn masking_handles_multibyte_keys() {
        assert_eq!(mask("clé-secrète-αβγδ"), "clé-...αβγδ");
        assert_eq!(mask("αβγδεζη"), "****");
    }
}
