//! Hashed timing wheel with `SLOTS` buckets and per-entry rotation counts.
//!
//! A timer `ticks` ticks away lands in slot `(cursor + ticks) % SLOTS` with
//! `(ticks - 1) / SLOTS` full rotations left to wait. Each `advance` moves the
//! cursor one slot and visits that bucket: entries with no rotations left fire,
//! the rest count one rotation down. Scheduling, cancellation and advancing are
//! all O(1) apart from the linear scan of a single bucket.
//!
//! `Wheel` knows nothing about threads or wall-clock time; `dispatch` puts it
//! behind a lock and drives it from a ticker.
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::error;

use crate::DispatchError;

use super::{TimerId, TimerState};

/// Where a scheduled timer currently lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub slot: usize,
    pub rotation: u64,
}

#[derive(Debug)]
struct TimerEntry<T> {
    id: TimerId,
    rotation: u64,
    state: TimerState,
    payload: T,
}

impl<T> TimerEntry<T> {
    fn transition(&mut self, to: TimerState) {
        debug_assert_eq!(
            self.state,
            TimerState::Scheduled,
            "{} left the wheel twice (now {to:?})",
            self.id
        );
        self.state = to;
    }
}

#[derive(Debug)]
pub struct Wheel<T, const SLOTS: usize> {
    slots: [Vec<TimerEntry<T>>; SLOTS],
    index: FxHashMap<TimerId, Position>,
    cursor: usize,
    elapsed: u64,
    next_id: u64,
}

impl<T, const SLOTS: usize> Wheel<T, SLOTS> {
    pub fn new() -> Result<Self, DispatchError> {
        if SLOTS == 0 {
            return Err(DispatchError::NoSlots);
        }
        Ok(Self {
            slots: array_init::array_init(|_| Vec::new()),
            index: FxHashMap::default(),
            cursor: 0,
            elapsed: 0,
            next_id: 1,
        })
    }

    /// Store `payload` to fire `ticks` advances from now. Zero is treated as one.
    pub fn schedule(&mut self, ticks: u64, payload: T) -> TimerId {
        let ticks = ticks.max(1);
        let slots = SLOTS as u64;
        let rotation = (ticks - 1) / slots;
        let slot = (self.cursor + (ticks % slots) as usize) % SLOTS;

        let id = TimerId(self.next_id);
        self.next_id += 1;

        self.slots[slot].push(TimerEntry {
            id,
            rotation,
            state: TimerState::Scheduled,
            payload,
        });
        let previous = self.index.insert(id, Position { slot, rotation });
        debug_assert!(previous.is_none(), "{id} issued twice");
        id
    }

    /// Remove a timer that has not fired yet and hand back its payload.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let position = self.index.get(&id).copied()?;
        let bucket = &mut self.slots[position.slot];
        let Some(at) = bucket.iter().position(|entry| entry.id == id) else {
            debug_assert!(false, "{id} indexed at {position:?} but missing from its bucket");
            error!(timer = id.get(), slot = position.slot, "timer index out of sync with buckets");
            self.index.remove(&id);
            return None;
        };
        debug_assert_eq!(
            bucket[at].rotation, position.rotation,
            "{id} rotation diverged from its index entry"
        );

        let mut entry = bucket.remove(at);
        entry.transition(TimerState::Cancelled);
        self.index.remove(&id);
        Some(entry.payload)
    }

    /// Move the cursor to the next slot and collect everything due there into `fired`,
    /// in insertion order.
    pub fn advance(&mut self, fired: &mut Vec<(TimerId, T)>) {
        self.cursor = (self.cursor + 1) % SLOTS;
        self.elapsed += 1;

        let bucket = std::mem::take(&mut self.slots[self.cursor]);
        let mut kept = Vec::with_capacity(bucket.len());
        for mut entry in bucket {
            if entry.rotation == 0 {
                entry.transition(TimerState::Fired);
                let removed = self.index.remove(&entry.id);
                debug_assert!(removed.is_some(), "{} fired without an index entry", entry.id);
                fired.push((entry.id, entry.payload));
            } else {
                entry.rotation -= 1;
                match self.index.get_mut(&entry.id) {
                    Some(position) => position.rotation = entry.rotation,
                    None => debug_assert!(false, "{} pending without an index entry", entry.id),
                }
                kept.push(entry);
            }
        }
        self.slots[self.cursor] = kept;
    }

    /// Remove every pending timer without firing it.
    pub fn drain(&mut self) -> Vec<(TimerId, T)> {
        self.index.clear();
        self.slots
            .iter_mut()
            .flat_map(std::mem::take)
            .map(|mut entry| {
                entry.transition(TimerState::Cancelled);
                (entry.id, entry.payload)
            })
            .collect()
    }

    /// Slot visited by the most recent `advance`.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of `advance` calls so far.
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn position(&self, id: TimerId) -> Option<Position> {
        self.index.get(&id).copied()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let mut entries = 0;
        for (slot, bucket) in self.slots.iter().enumerate() {
            for entry in bucket {
                entries += 1;
                assert_eq!(entry.state, TimerState::Scheduled);
                assert_eq!(
                    self.index.get(&entry.id),
                    Some(&Position {
                        slot,
                        rotation: entry.rotation
                    }),
                    "{} out of sync",
                    entry.id
                );
            }
        }
        assert_eq!(entries, self.index.len());
    }
}

/// Number of ticks needed to cover `delay`, rounded up and never below one.
///
/// `None` when the count does not fit in a `u64`, which puts the largest
/// representable delay at `tick * u64::MAX`.
pub fn ticks_for(delay: Duration, tick: Duration) -> Option<u64> {
    let tick = tick.as_nanos();
    if tick == 0 {
        return None;
    }
    u64::try_from(delay.as_nanos().div_ceil(tick).max(1)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    fn advance_n<T, const S: usize>(wheel: &mut Wheel<T, S>, n: u64) -> Vec<(TimerId, T)> {
        let mut fired = Vec::new();
        for _ in 0..n {
            wheel.advance(&mut fired);
        }
        fired
    }

    #[test]
    fn zero_slots_rejected() {
        assert_eq!(Wheel::<(), 0>::new().unwrap_err(), DispatchError::NoSlots);
    }

    #[test]
    fn tick_rounding() {
        let tick = Duration::from_millis(100);
        assert_eq!(ticks_for(Duration::ZERO, tick), Some(1));
        assert_eq!(ticks_for(Duration::from_millis(30), tick), Some(1));
        assert_eq!(ticks_for(Duration::from_millis(100), tick), Some(1));
        assert_eq!(ticks_for(Duration::from_millis(101), tick), Some(2));
        assert_eq!(ticks_for(Duration::from_millis(250), tick), Some(3));
        assert_eq!(ticks_for(Duration::from_millis(1050), tick), Some(11));
        assert_eq!(ticks_for(Duration::from_secs(1), Duration::ZERO), None);
        assert_eq!(ticks_for(Duration::MAX, Duration::from_nanos(1)), None);
    }

    #[test]
    fn short_delay_lands_in_current_rotation() {
        // 100ms ticks, 10 slots, 250ms delay
        let mut wheel = Wheel::<&str, 10>::new().unwrap();
        let ticks = ticks_for(Duration::from_millis(250), Duration::from_millis(100)).unwrap();
        let id = wheel.schedule(ticks, "a");
        assert_eq!(wheel.position(id), Some(Position { slot: 3, rotation: 0 }));

        assert!(advance_n(&mut wheel, 2).is_empty());
        let fired = advance_n(&mut wheel, 1);
        assert_eq!(fired, vec![(id, "a")]);
        assert_eq!(wheel.elapsed(), 3);
        assert!(wheel.is_empty());
    }

    #[test]
    fn long_delay_waits_out_a_full_rotation() {
        // 100ms ticks, 10 slots, 1050ms delay
        let mut wheel = Wheel::<&str, 10>::new().unwrap();
        let ticks = ticks_for(Duration::from_millis(1050), Duration::from_millis(100)).unwrap();
        let id = wheel.schedule(ticks, "b");
        assert_eq!(wheel.position(id), Some(Position { slot: 1, rotation: 1 }));

        // first pass over slot 1 only spends the rotation
        assert!(advance_n(&mut wheel, 1).is_empty());
        assert_eq!(wheel.position(id), Some(Position { slot: 1, rotation: 0 }));

        assert!(advance_n(&mut wheel, 9).is_empty());
        assert_eq!(advance_n(&mut wheel, 1), vec![(id, "b")]);
        assert_eq!(wheel.elapsed(), 11);
    }

    #[test]
    fn exact_multiple_of_wheel_size_is_not_late() {
        let mut wheel = Wheel::<u8, 4>::new().unwrap();
        let once = wheel.schedule(4, 1);
        let twice = wheel.schedule(8, 2);
        assert_eq!(wheel.position(once), Some(Position { slot: 0, rotation: 0 }));
        assert_eq!(wheel.position(twice), Some(Position { slot: 0, rotation: 1 }));

        assert!(advance_n(&mut wheel, 3).is_empty());
        assert_eq!(advance_n(&mut wheel, 1), vec![(once, 1)]);
        assert!(advance_n(&mut wheel, 3).is_empty());
        assert_eq!(advance_n(&mut wheel, 1), vec![(twice, 2)]);
    }

    #[test]
    fn slot_is_relative_to_cursor() {
        let mut wheel = Wheel::<(), 10>::new().unwrap();
        advance_n(&mut wheel, 7);
        assert_eq!(wheel.cursor(), 7);

        let id = wheel.schedule(5, ());
        assert_eq!(wheel.position(id), Some(Position { slot: 2, rotation: 0 }));
        assert!(advance_n(&mut wheel, 4).is_empty());
        assert_eq!(advance_n(&mut wheel, 1).len(), 1);
    }

    #[test]
    fn zero_ticks_fire_on_next_advance() {
        let mut wheel = Wheel::<(), 8>::new().unwrap();
        let id = wheel.schedule(0, ());
        assert_eq!(advance_n(&mut wheel, 1), vec![(id, ())]);
    }

    #[test]
    fn same_slot_fires_in_insertion_order() {
        let mut wheel = Wheel::<u32, 8>::new().unwrap();
        let ids: Vec<_> = (0..5).map(|i| wheel.schedule(3, i)).collect();
        let late = wheel.schedule(11, 99);
        let fired = advance_n(&mut wheel, 3);
        assert_eq!(fired.iter().map(|(id, _)| *id).collect::<Vec<_>>(), ids);
        assert_eq!(fired.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(wheel.contains(late));
    }

    #[test]
    fn ids_increase_from_one() {
        let mut wheel = Wheel::<(), 4>::new().unwrap();
        let a = wheel.schedule(1, ());
        let b = wheel.schedule(1, ());
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert!(a.is_valid());
        assert!(!TimerId::INVALID.is_valid());
    }

    #[test]
    fn cancel_before_fire() {
        let mut wheel = Wheel::<&str, 10>::new().unwrap();
        let id = wheel.schedule(3, "gone");
        let other = wheel.schedule(3, "kept");

        assert_eq!(wheel.cancel(id), Some("gone"));
        assert_eq!(wheel.cancel(id), None);
        assert!(!wheel.contains(id));

        // several rotations later only the survivor ever fired
        let fired = advance_n(&mut wheel, 35);
        assert_eq!(fired, vec![(other, "kept")]);
    }

    #[test]
    fn cancel_after_rotation_spent() {
        let mut wheel = Wheel::<(), 4>::new().unwrap();
        let id = wheel.schedule(10, ());
        advance_n(&mut wheel, 2);
        assert_eq!(wheel.position(id), Some(Position { slot: 2, rotation: 1 }));
        assert!(advance_n(&mut wheel, 4).is_empty());
        assert_eq!(wheel.position(id), Some(Position { slot: 2, rotation: 0 }));
        assert_eq!(wheel.cancel(id), Some(()));
        assert!(advance_n(&mut wheel, 8).is_empty());
    }

    #[test]
    fn cancel_after_fire_or_unknown() {
        let mut wheel = Wheel::<(), 4>::new().unwrap();
        let id = wheel.schedule(1, ());
        assert_eq!(advance_n(&mut wheel, 1).len(), 1);
        assert_eq!(wheel.cancel(id), None);
        assert_eq!(wheel.cancel(TimerId::INVALID), None);
        assert_eq!(wheel.cancel(TimerId(12345)), None);
    }

    #[test]
    fn drain_empties_everything() {
        let mut wheel = Wheel::<u32, 4>::new().unwrap();
        for i in 0..10 {
            wheel.schedule(u64::from(i) + 1, i);
        }
        let mut drained: Vec<u32> = wheel.drain().into_iter().map(|(_, v)| v).collect();
        drained.sort_unstable();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(wheel.is_empty());
        assert!(advance_n(&mut wheel, 20).is_empty());
        wheel.assert_consistent();
    }

    #[test]
    fn random_operations_fire_exactly_on_schedule() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut wheel = Wheel::<u64, 16>::new().unwrap();
        // id -> tick it must fire on
        let mut due: HashMap<TimerId, u64> = HashMap::new();
        let mut fired_ids = Vec::new();
        let mut fired = Vec::new();

        for _ in 0..20_000 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let ticks = rng.gen_range(0..100);
                    let id = wheel.schedule(ticks, wheel.elapsed() + ticks.max(1));
                    due.insert(id, wheel.elapsed() + ticks.max(1));
                }
                5..=6 if !due.is_empty() => {
                    let pick = *due.keys().nth(rng.gen_range(0..due.len())).unwrap();
                    assert!(wheel.cancel(pick).is_some());
                    due.remove(&pick);
                    assert!(wheel.cancel(pick).is_none());
                }
                _ => {
                    wheel.advance(&mut fired);
                    for (id, expected) in fired.drain(..) {
                        assert_eq!(expected, wheel.elapsed(), "{id} fired off schedule");
                        assert_eq!(due.remove(&id), Some(expected));
                        fired_ids.push(id);
                    }
                    assert!(due.values().all(|&tick| tick > wheel.elapsed()));
                }
            }
            wheel.assert_consistent();
        }

        let total = fired_ids.len();
        fired_ids.sort_unstable();
        fired_ids.dedup();
        assert_eq!(fired_ids.len(), total, "a timer fired twice");
        assert_eq!(wheel.len(), due.len());
    }
}
