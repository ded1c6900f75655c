//! Timer ownership for the board.
//!
//! One timer per key. Scheduling a key again replaces its previous timer,
//! cancelling removes it, and due timers are popped one at a time so that a
//! handler can cancel timers that would otherwise fire in the same batch.

use std::collections::{BTreeMap, HashMap};

use fragment_core::types::{Millis, PairKey};

use crate::events::RequestToken;

/// What a timer is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Next autonomous turn of a pairing.
    Turn(PairKey),
    /// Reveal a user-facing reply after its typing delay.
    Reveal(RequestToken),
}

/// Identity of one scheduled timer; changes every time a key is rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deadline-ordered timer table.
#[derive(Debug, Default)]
pub struct Scheduler {
    by_key: HashMap<TimerKey, (Millis, TimerId)>,
    by_deadline: BTreeMap<(Millis, TimerId), TimerKey>,
    next_id: u64,
}

impl Scheduler {
    /// Empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `deadline`, replacing any existing timer for it.
    pub fn schedule(&mut self, key: TimerKey, deadline: Millis) -> TimerId {
        self.cancel(&key);
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.by_deadline.insert((deadline, id), key.clone());
        self.by_key.insert(key, (deadline, id));
        id
    }

    /// Disarm `key`. Returns whether a timer was armed.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.by_key.remove(key) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer whose key matches `pred`. Returns how many.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&TimerKey) -> bool) -> usize {
        let keys: Vec<TimerKey> = self.by_key.keys().filter(|k| pred(k)).cloned().collect();
        for key in &keys {
            self.cancel(key);
        }
        keys.len()
    }

    /// Disarm every timer.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_deadline.clear();
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Millis> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at `now`, if any.
    pub fn pop_due(&mut self, now: Millis) -> Option<(TimerKey, TimerId)> {
        let (&(deadline, id), _) = self.by_deadline.iter().next()?;
        if deadline > now {
            return None;
        }
        let key = self.by_deadline.remove(&(deadline, id))?;
        self.by_key.remove(&key);
        Some((key, id))
    }

    /// Deadline of `key`, if armed.
    #[must_use]
    pub fn deadline(&self, key: &TimerKey) -> Option<Millis> {
        self.by_key.get(key).map(|(deadline, _)| *deadline)
    }

    /// Whether `id` is still the live timer for `key`.
    #[must_use]
    pub fn is_current(&self, key: &TimerKey, id: TimerId) -> bool {
        self.by_key.get(key).is_some_and(|(_, live)| *live == id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether nothing is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
