//! Per-trigger debounce state machine.
//!
//! ```text
//!            enter band (edge ok)           exit band
//!   Idle ──────────────────────────► Fired ───────────► Idle
//!    │  │                                               ▲
//!    │  └─ enter band (wrong edge) ─► Armed ── exit ────┤
//!    │                                  │ edge ok       │
//!    │                                  ▼               │
//!    └─ enter band, continuous ────► Periodic ── exit ──┘
//!                                    (re-fires every interval)
//! ```
//!
//! Time is passed in, never read, so the machine is deterministic under test.

use crate::claim::{Edge, PinValue, Trigger, TriggerType};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// Last sample was outside the band.
    Idle,
    /// Inside the band, waiting for an edge in the configured direction.
    Armed,
    /// Fired on entry; must leave the band before it can fire again.
    Fired,
    /// Continuous trigger inside the band; fires again at `next_due`.
    Periodic { next_due: Instant },
    /// Misconfigured; never fires.
    Disabled,
}

/// A trigger fire, handed on to the trigger's actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fire {
    pub at: Instant,
    pub voltage: f64,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    band: PinValue,
    kind: TriggerType,
    edge: Edge,
    repeat: Option<Duration>,
    state: DebounceState,
    previous: Option<f64>,
}

impl Debouncer {
    pub fn new(band: PinValue, kind: TriggerType, edge: Edge, repeat: Option<Duration>) -> Self {
        Self {
            band,
            kind,
            edge,
            repeat,
            state: DebounceState::Idle,
            previous: None,
        }
    }

    /// Build from a trigger declaration; fails if its continuous interval
    /// cannot be used.
    pub fn from_trigger(trigger: &Trigger, edge: Edge) -> Result<Self, String> {
        let repeat = trigger.repeat_interval()?;
        Ok(Self::new(trigger.target, trigger.kind, edge, repeat))
    }

    pub fn disabled(trigger: &Trigger, edge: Edge) -> Self {
        let mut debouncer = Self::new(trigger.target, trigger.kind, edge, None);
        debouncer.state = DebounceState::Disabled;
        debouncer
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// When the next periodic fire is due, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Periodic { next_due } => Some(next_due),
            _ => None,
        }
    }

    /// Feed one sample. Returns a fire event if this sample causes one.
    pub fn observe(&mut self, voltage: f64, now: Instant) -> Option<Fire> {
        let inside = self.band.contains(voltage);
        let on_edge = self.is_edge(voltage);
        self.previous = Some(voltage);

        match (self.state, inside) {
            (DebounceState::Disabled, _) | (DebounceState::Idle, false) => None,
            (DebounceState::Idle | DebounceState::Armed, true) => {
                if on_edge {
                    Some(self.enter(voltage, now))
                } else {
                    self.state = DebounceState::Armed;
                    None
                }
            }
            (DebounceState::Fired, true) => None,
            (DebounceState::Periodic { .. }, true) => self.poll_due(now),
            (DebounceState::Armed | DebounceState::Fired | DebounceState::Periodic { .. }, false) => {
                self.state = DebounceState::Idle;
                None
            }
        }
    }

    /// Emit the pending periodic fire if its time has come.
    pub fn poll_due(&mut self, now: Instant) -> Option<Fire> {
        let DebounceState::Periodic { next_due } = self.state else {
            return None;
        };
        if now < next_due {
            return None;
        }
        let period = self.repeat?;
        let mut next = next_due + period;
        if next <= now {
            next = now + period;
        }
        self.state = DebounceState::Periodic { next_due: next };
        Some(Fire {
            at: now,
            voltage: self.previous.unwrap_or(self.band.voltage),
        })
    }

    fn enter(&mut self, voltage: f64, now: Instant) -> Fire {
        self.state = match self.repeat {
            Some(period) => DebounceState::Periodic {
                next_due: now + period,
            },
            None => DebounceState::Fired,
        };
        Fire { at: now, voltage }
    }

    /// Digital samples only count as an entry when they moved in the
    /// configured direction. The very first sample always counts.
    fn is_edge(&self, voltage: f64) -> bool {
        if self.kind == TriggerType::Analog {
            return true;
        }
        match self.previous {
            None => true,
            Some(previous) => match self.edge {
                Edge::Rising => voltage > previous,
                Edge::Falling => voltage < previous,
                Edge::Both => voltage != previous,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn edge_trigger(kind: TriggerType, edge: Edge) -> Debouncer {
        Debouncer::new(PinValue::new(3.3, 0.1), kind, edge, None)
    }

    fn count_fires(debouncer: &mut Debouncer, samples: &[f64]) -> usize {
        let start = Instant::now();
        samples
            .iter()
            .enumerate()
            .filter(|(i, v)| {
                debouncer
                    .observe(**v, start + Duration::from_millis(*i as u64 * 10))
                    .is_some()
            })
            .count()
    }

    #[test]
    fn test_digital_edge_trigger_fires_once_per_entry() {
        let mut debouncer = edge_trigger(TriggerType::Digital, Edge::Rising);
        let start = Instant::now();
        let fired: Vec<usize> = [3.0, 3.31, 3.35, 3.0, 3.32]
            .iter()
            .enumerate()
            .filter_map(|(i, v)| {
                debouncer
                    .observe(*v, start + Duration::from_millis(i as u64))
                    .map(|_| i)
            })
            .collect();
        assert_eq!(fired, vec![1, 4]);
        assert_eq!(debouncer.state(), DebounceState::Fired);
    }

    #[test]
    fn test_continuous_trigger_refires_every_interval() {
        let mut debouncer = Debouncer::new(
            PinValue::new(3.3, 0.1),
            TriggerType::Digital,
            Edge::Rising,
            Some(Duration::from_secs(1)),
        );
        let start = Instant::now();
        let mut fires = Vec::new();

        fires.extend(debouncer.observe(3.3, start));
        let mut t = start;
        while t < start + Duration::from_millis(2500) {
            t += Duration::from_millis(100);
            fires.extend(debouncer.poll_due(t));
            fires.extend(debouncer.observe(3.31, t));
        }
        assert!(debouncer.observe(0.0, t).is_none());

        let offsets: Vec<u64> = fires
            .iter()
            .map(|f| (f.at - start).as_millis() as u64)
            .collect();
        assert_eq!(offsets, vec![0, 1000, 2000]);
        assert_eq!(debouncer.state(), DebounceState::Idle);
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[test]
    fn test_exit_cancels_pending_periodic_fire() {
        let mut debouncer = Debouncer::new(
            PinValue::new(1.0, 0.2),
            TriggerType::Analog,
            Edge::Both,
            Some(Duration::from_secs(1)),
        );
        let start = Instant::now();
        assert!(debouncer.observe(1.0, start).is_some());
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_secs(1))
        );

        debouncer.observe(2.0, start + Duration::from_millis(500));
        assert!(
            debouncer
                .poll_due(start + Duration::from_secs(1))
                .is_none()
        );
    }

    #[test]
    fn test_wrong_direction_entry_parks_armed() {
        let mut debouncer = edge_trigger(TriggerType::Digital, Edge::Rising);
        let start = Instant::now();

        assert!(debouncer.observe(5.0, start).is_none());
        // Falling into the band is not a rising edge
        assert!(debouncer.observe(3.35, start).is_none());
        assert_eq!(debouncer.state(), DebounceState::Armed);
        // Still inside, now rising
        assert!(debouncer.observe(3.38, start).is_some());
        assert_eq!(debouncer.state(), DebounceState::Fired);
    }

    #[test]
    fn test_falling_edge_trigger() {
        let mut debouncer = edge_trigger(TriggerType::Digital, Edge::Falling);
        assert_eq!(count_fires(&mut debouncer, &[5.0, 3.3, 5.0, 3.25, 0.0]), 2);

        let mut rising_only = edge_trigger(TriggerType::Digital, Edge::Rising);
        assert_eq!(count_fires(&mut rising_only, &[5.0, 3.3, 5.0, 3.25, 0.0]), 0);
    }

    #[test]
    fn test_analog_ignores_edge_direction() {
        let mut debouncer = edge_trigger(TriggerType::Analog, Edge::Rising);
        assert_eq!(count_fires(&mut debouncer, &[5.0, 3.3, 5.0, 3.25, 0.0]), 2);
    }

    #[test]
    fn test_first_sample_in_band_fires() {
        let mut debouncer = edge_trigger(TriggerType::Digital, Edge::Falling);
        assert!(debouncer.observe(3.3, Instant::now()).is_some());
    }

    #[test]
    fn test_disabled_never_fires() {
        let trigger = Trigger {
            target: PinValue::new(3.3, 0.1),
            kind: TriggerType::Analog,
            actions: vec![],
            continuous: true,
            continuous_interval: "whenever".into(),
        };
        assert!(Debouncer::from_trigger(&trigger, Edge::Both).is_err());

        let mut debouncer = Debouncer::disabled(&trigger, Edge::Both);
        assert_eq!(count_fires(&mut debouncer, &[0.0, 3.3, 0.0, 3.3]), 0);
    }

    proptest! {
        #[test]
        fn test_fire_count_matches_band_entries(
            samples in prop::collection::vec(prop_oneof![3.2f64..=3.4, 0.0f64..3.0], 1..200),
        ) {
            let band = PinValue::new(3.3, 0.1);
            let entries = samples
                .iter()
                .enumerate()
                .filter(|(i, v)| band.contains(**v) && (*i == 0 || !band.contains(samples[i - 1])))
                .count();

            let mut debouncer = Debouncer::new(band, TriggerType::Analog, Edge::Both, None);
            prop_assert_eq!(count_fires(&mut debouncer, &samples), entries);
        }

        #[test]
        fn test_continuous_fire_count_follows_hold_time(
            hold_ms in 0u64..20_000,
            interval_ms in 100u64..5_000,
            step_ms in 10u64..250,
        ) {
            let start = Instant::now();
            let end = start + Duration::from_millis(hold_ms);
            let mut debouncer = Debouncer::new(
                PinValue::new(3.3, 0.1),
                TriggerType::Analog,
                Edge::Both,
                Some(Duration::from_millis(interval_ms)),
            );

            // Samples every step, with deadlines served in between
            let mut fires = 0;
            let mut next_sample = start;
            loop {
                let due = debouncer.next_deadline().filter(|d| *d < next_sample);
                let now = due.unwrap_or(next_sample);
                if now > end {
                    break;
                }
                let fire = match due {
                    Some(_) => debouncer.poll_due(now),
                    None => {
                        next_sample += Duration::from_millis(step_ms);
                        debouncer.observe(3.3, now)
                    }
                };
                if fire.is_some() {
                    fires += 1;
                }
            }
            prop_assert_eq!(fires, hold_ms / interval_ms + 1);
        }
    }
}
