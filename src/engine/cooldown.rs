//! Per-action cooldown.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

/// Admits fires of one action instance no closer together than `cooldown`.
///
/// The check and the timestamp update happen under one lock, so two
/// concurrent callers can never both be admitted inside the same window.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_fire: Mutex<Option<Instant>>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fire: Mutex::new(None),
        }
    }

    /// Admit and record `now`, or reject without touching state.
    pub fn try_admit(&self, now: Instant) -> bool {
        let mut last_fire = self.last_fire.lock();
        if let Some(previous) = *last_fire
            && now.saturating_duration_since(previous) < self.cooldown
        {
            return false;
        }
        *last_fire = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cooldown_window() {
        let gate = CooldownGate::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(gate.try_admit(t0));
        assert!(!gate.try_admit(t0 + Duration::from_secs(2)));
        // The rejected attempt did not restart the window
        assert!(gate.try_admit(t0 + Duration::from_secs(5)));
        assert!(!gate.try_admit(t0 + Duration::from_secs(9)));
        assert!(gate.try_admit(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_exact_boundary_is_admitted() {
        let gate = CooldownGate::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(gate.try_admit(t0));
        assert!(gate.try_admit(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_cooldown_admits_everything() {
        let gate = CooldownGate::new(Duration::ZERO);
        let t0 = Instant::now();
        for _ in 0..10 {
            assert!(gate.try_admit(t0));
        }
    }

    #[test]
    fn test_concurrent_admits_in_one_window() {
        let gate = Arc::new(CooldownGate::new(Duration::from_secs(60)));
        let admitted = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    if gate.try_admit(now) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn test_admits_never_closer_than_cooldown(
            cooldown_ms in 0u64..10_000,
            mut offsets in prop::collection::vec(0u64..60_000, 1..100),
        ) {
            offsets.sort_unstable();
            let gate = CooldownGate::new(Duration::from_millis(cooldown_ms));
            let start = Instant::now();

            let admitted: Vec<u64> = offsets
                .iter()
                .copied()
                .filter(|ms| gate.try_admit(start + Duration::from_millis(*ms)))
                .collect();
            prop_assert_eq!(admitted.first(), offsets.first());
            for pair in admitted.windows(2) {
                prop_assert!(pair[1] - pair[0] >= cooldown_ms);
            }
        }

        #[test]
        fn test_identical_gates_keep_separate_state(
            cooldown_ms in 1u64..10_000,
            mut requests in prop::collection::vec((any::<bool>(), 0u64..60_000), 1..100),
        ) {
            requests.sort_unstable_by_key(|(_, ms)| *ms);
            let gates = [
                CooldownGate::new(Duration::from_millis(cooldown_ms)),
                CooldownGate::new(Duration::from_millis(cooldown_ms)),
            ];
            let mut last_admit: [Option<u64>; 2] = [None, None];
            let start = Instant::now();

            for (first, ms) in requests {
                let which = usize::from(!first);
                let expected = last_admit[which].is_none_or(|last| ms - last >= cooldown_ms);
                let admitted = gates[which].try_admit(start + Duration::from_millis(ms));
                prop_assert_eq!(admitted, expected);
                if admitted {
                    last_admit[which] = Some(ms);
                }
            }
        }
    }
}
