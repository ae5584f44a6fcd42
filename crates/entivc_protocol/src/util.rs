//! Id and timestamp helpers.

use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of generated ids.
pub const ID_LEN: usize = 8;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static DETERMINISTIC_IDS: AtomicBool = AtomicBool::new(false);
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a fresh id.
///
/// Ids are random strings over `[a-z0-9]` of length [`ID_LEN`]. They are
/// never content-derived. With deterministic mode enabled (tests), ids are
/// zero-padded counter values instead.
#[must_use]
pub fn new_id() -> String {
    if DETERMINISTIC_IDS.load(Ordering::Relaxed) {
        let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        return format!("{:0width$}", n, width = ID_LEN);
    }

    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Switches id generation between random and counter-based.
///
/// Counter-based ids make test output reproducible. The counter is
/// process-wide; call [`reset_id_counter`] between test cases that
/// assert on concrete id values.
pub fn set_deterministic_ids(enabled: bool) {
    DETERMINISTIC_IDS.store(enabled, Ordering::Relaxed);
}

/// Resets the deterministic id counter to zero.
pub fn reset_id_counter() {
    ID_COUNTER.store(0, Ordering::Relaxed);
}

/// Returns the current wall-clock time as epoch milliseconds.
///
/// Used for commit timestamps. Timestamps are informational; ordering on
/// a branch is defined by the parent walk, never by time.
#[must_use]
pub fn timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_have_expected_shape() {
        set_deterministic_ids(false);
        let id = new_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn random_ids_are_unique() {
        set_deterministic_ids(false);
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_ids_count_up() {
        set_deterministic_ids(true);
        reset_id_counter();
        assert_eq!(new_id(), "00000001");
        assert_eq!(new_id(), "00000002");
        set_deterministic_ids(false);
    }

    #[test]
    fn timestamp_is_positive() {
        assert!(timestamp_now() > 0);
    }
}
