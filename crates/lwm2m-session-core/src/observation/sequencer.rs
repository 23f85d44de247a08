//! Per-observation reorder buffer

use super::Payload;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Result of offering a notification to the sequencer
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accepted {
    /// Notifications ready to publish, in increasing sequence order
    Released(Vec<(u64, Payload)>),
    /// Held until the gap before it closes, the window overflows or the hold expires
    Buffered,
    /// At or below the last published sequence, or already pending
    Duplicate,
}

#[derive(Debug, Clone)]
struct Held {
    payload: Payload,
    received_at: DateTime<Utc>,
}

/// Orders notifications of one observation by sequence number
///
/// The first notification is released immediately and fixes the baseline.
/// After that a notification is released when it directly follows the last
/// published one; anything further ahead waits in a buffer of at most
/// `window` entries. On overflow the lowest pending entry is released and the
/// gap before it is skipped. [`Sequencer::release_expired`] does the same for
/// entries that waited too long.
#[derive(Debug, Clone)]
pub(crate) struct Sequencer {
    last_published: Option<u64>,
    pending: BTreeMap<u64, Held>,
    window: usize,
}

impl Sequencer {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            last_published: None,
            pending: BTreeMap::new(),
            window,
        }
    }

    /// Offer a notification
    ///
    /// A notification without a sequence number flushes the buffer and is
    /// numbered right after the last released entry. Once `u64::MAX` has been
    /// published nothing can follow it, so further notifications are
    /// duplicates.
    pub(crate) fn accept(&mut self, sequence: Option<u64>, payload: Payload) -> Accepted {
        let Some(sequence) = sequence else {
            let mut released = self.drain_all();
            match self.next_sequence() {
                Some(next) => {
                    self.last_published = Some(next);
                    released.push((next, payload));
                }
                None if released.is_empty() => return Accepted::Duplicate,
                None => {}
            }
            return Accepted::Released(released);
        };

        let Some(last) = self.last_published else {
            self.last_published = Some(sequence);
            return Accepted::Released(vec![(sequence, payload)]);
        };

        if sequence <= last || self.pending.contains_key(&sequence) {
            return Accepted::Duplicate;
        }

        if last.checked_add(1) == Some(sequence) || self.window == 0 {
            self.last_published = Some(sequence);
            let mut released = vec![(sequence, payload)];
            released.extend(self.drain_consecutive());
            return Accepted::Released(released);
        }

        self.pending.insert(
            sequence,
            Held {
                payload,
                received_at: Utc::now(),
            },
        );
        if self.pending.len() <= self.window {
            return Accepted::Buffered;
        }

        // Overflow: give up on the gap before the lowest pending entry
        let mut released = Vec::new();
        if let Some((lowest, held)) = self.pending.pop_first() {
            self.last_published = Some(lowest);
            released.push((lowest, held.payload));
        }
        released.extend(self.drain_consecutive());
        Accepted::Released(released)
    }

    /// Release pending entries that directly follow the last published one
    pub(crate) fn drain_consecutive(&mut self) -> Vec<(u64, Payload)> {
        let mut released = Vec::new();
        while let Some(last) = self.last_published {
            let Some(next) = last.checked_add(1) else {
                break;
            };
            let Some(held) = self.pending.remove(&next) else {
                break;
            };
            self.last_published = Some(next);
            released.push((next, held.payload));
        }
        released
    }

    /// Release every pending entry in order, skipping gaps
    pub(crate) fn drain_all(&mut self) -> Vec<(u64, Payload)> {
        let released: Vec<(u64, Payload)> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(sequence, held)| (sequence, held.payload))
            .collect();
        if let Some((last, _)) = released.last() {
            self.last_published = Some(*last);
        }
        released
    }

    /// Give up on gaps in front of entries received at or before `deadline`
    ///
    /// Every pending entry up to the newest expired one is released in order,
    /// followed by whatever is consecutive after it.
    pub(crate) fn release_expired(&mut self, deadline: DateTime<Utc>) -> Vec<(u64, Payload)> {
        let Some(cutoff) = self
            .pending
            .iter()
            .filter(|(_, held)| held.received_at <= deadline)
            .map(|(sequence, _)| *sequence)
            .max()
        else {
            return Vec::new();
        };

        let rest = match cutoff.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let mut released: Vec<(u64, Payload)> = std::mem::replace(&mut self.pending, rest)
            .into_iter()
            .map(|(sequence, held)| (sequence, held.payload))
            .collect();
        self.last_published = Some(cutoff);
        released.extend(self.drain_consecutive());
        released
    }

    /// When the longest-waiting pending entry arrived
    pub(crate) fn held_since(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|held| held.received_at).min()
    }

    /// Drop pending entries, returning how many were dropped
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn next_sequence(&self) -> Option<u64> {
        match self.last_published {
            Some(last) => last.checked_add(1),
            None => Some(1),
        }
    }
}
