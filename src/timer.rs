//! Software timers of the owner task
//!
//! Timers are keyed by `TimerId`: a kind plus, for per-device timers, the
//! `RecordHandle` of the owning Connection Record. Removing a record goes through
//! [`TimerRegistry::cancel_owned_by`], and because handles carry a generation a timer
//! can never act on a slot that was reused for another device.

use crate::{ServiceError, constants::MAX_TIMERS, rdm::RecordHandle};
use heapless::Vec;

/// Milliseconds since the owner task's time base
pub type Millis = u64;

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TimerKind {
    /// Sniff controller tick
    SniffTick,
    /// Link-time adjuster tick
    LinkAdjustTick,
    /// Debounced scan policy re-evaluation
    ScanUpdate,
    /// A2DP stop/call wait check
    A2dpCheck,
    /// Prompt tone filter play-position poll
    PromptToneCheck,
    /// Deferred AVRCP absolute volume
    AvrcpVolume,
    /// Stream start waiting for AVRCP to connect
    AvrcpConnectingPending,
    /// Stream start waiting for AVRCP to report playing
    AvrcpPlayingPending,
    /// Deferred disconnect waiting for a sniff exit or a pause
    DisconnectWait,
}

/// Timer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct TimerId {
    /// Timer kind
    pub kind: TimerKind,
    /// Owning record for per-device timers
    pub owner: Option<RecordHandle>,
}

impl TimerId {
    /// A service-wide timer
    #[must_use]
    pub const fn global(kind: TimerKind) -> Self {
        Self { kind, owner: None }
    }

    /// A timer owned by one Connection Record
    #[must_use]
    pub const fn owned(kind: TimerKind, owner: RecordHandle) -> Self {
        Self {
            kind,
            owner: Some(owner),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: TimerId,
    deadline: Millis,
    period: Option<u32>,
}

/// Registry of armed timers
#[derive(Debug, Default)]
pub struct TimerRegistry {
    entries: Vec<Entry, MAX_TIMERS>,
}

impl TimerRegistry {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Arm a one-shot timer, restarting it if it is already armed
    ///
    /// # Errors
    /// Returns `OutOfResources` if every timer slot is in use
    pub fn start(&mut self, id: TimerId, now: Millis, delay_ms: u32) -> Result<(), ServiceError> {
        self.arm(id, now + Millis::from(delay_ms), None)
    }

    /// Arm a periodic timer, restarting it if it is already armed
    ///
    /// # Errors
    /// Returns `OutOfResources` if every timer slot is in use
    pub fn start_periodic(
        &mut self,
        id: TimerId,
        now: Millis,
        period_ms: u32,
    ) -> Result<(), ServiceError> {
        self.arm(id, now + Millis::from(period_ms), Some(period_ms))
    }

    /// Arm a periodic timer unless it is already running
    ///
    /// # Errors
    /// Returns `OutOfResources` if every timer slot is in use
    pub fn ensure_periodic(
        &mut self,
        id: TimerId,
        now: Millis,
        period_ms: u32,
    ) -> Result<(), ServiceError> {
        if self.is_armed(id) {
            return Ok(());
        }
        self.start_periodic(id, now, period_ms)
    }

    fn arm(&mut self, id: TimerId, deadline: Millis, period: Option<u32>) -> Result<(), ServiceError> {
        let entry = Entry {
            id,
            deadline,
            period,
        };
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == id) {
            *existing = entry;
            return Ok(());
        }
        self.entries.push(entry).map_err(|_| {
            defmt::warn!("[TIMER] No free slot for {}", id);
            ServiceError::OutOfResources
        })
    }

    /// Disarm a timer; returns whether it was armed
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer owned by a record; returns how many were armed
    pub fn cancel_owned_by(&mut self, owner: RecordHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.id.owner != Some(owner));
        before - self.entries.len()
    }

    /// Whether a timer is armed
    #[must_use]
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Milliseconds until a timer fires
    #[must_use]
    pub fn remaining(&self, id: TimerId, now: Millis) -> Option<Millis> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.deadline.saturating_sub(now))
    }

    /// Earliest deadline of all armed timers
    #[must_use]
    pub fn next_deadline(&self) -> Option<Millis> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Remove and return the timers due at `now`, earliest first.
    ///
    /// Periodic timers are re-armed one period after `now`; missed periods are not replayed.
    pub fn take_expired(&mut self, now: Millis) -> Vec<TimerId, MAX_TIMERS> {
        let mut due: Vec<Entry, MAX_TIMERS> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            let entry = self.entries[i];
            if entry.deadline > now {
                i += 1;
                continue;
            }
            due.push(entry).ok();
            match entry.period {
                Some(period) => {
                    self.entries[i].deadline = now + Millis::from(period);
                    i += 1;
                }
                None => {
                    self.entries.swap_remove(i);
                }
            }
        }
        due.sort_unstable_by_key(|e| e.deadline);
        due.iter().map(|e| e.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: u8, generation: u16) -> RecordHandle {
        RecordHandle::from_parts(index, generation)
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut timers = TimerRegistry::new();
        let id = TimerId::global(TimerKind::ScanUpdate);
        timers.start(id, 1000, 200).unwrap();

        assert!(timers.take_expired(1199).is_empty());
        let fired = timers.take_expired(1200);
        assert_eq!(fired.as_slice(), &[id]);
        assert!(!timers.is_armed(id));
        assert!(timers.take_expired(5000).is_empty());
    }

    #[test]
    fn test_restart_pushes_deadline() {
        let mut timers = TimerRegistry::new();
        let id = TimerId::global(TimerKind::ScanUpdate);
        timers.start(id, 0, 200).unwrap();
        timers.start(id, 150, 200).unwrap();

        assert!(timers.take_expired(200).is_empty());
        assert_eq!(timers.remaining(id, 200), Some(150));
        assert_eq!(timers.take_expired(350).len(), 1);
    }

    #[test]
    fn test_periodic_rearms() {
        let mut timers = TimerRegistry::new();
        let id = TimerId::global(TimerKind::SniffTick);
        timers.start_periodic(id, 0, 100).unwrap();

        assert_eq!(timers.take_expired(100).len(), 1);
        assert_eq!(timers.next_deadline(), Some(200));
        // a late wake-up does not replay the missed periods
        assert_eq!(timers.take_expired(450).len(), 1);
        assert_eq!(timers.next_deadline(), Some(550));
    }

    #[test]
    fn test_ensure_periodic_keeps_phase() {
        let mut timers = TimerRegistry::new();
        let id = TimerId::global(TimerKind::A2dpCheck);
        timers.ensure_periodic(id, 0, 50).unwrap();
        timers.ensure_periodic(id, 30, 50).unwrap();
        assert_eq!(timers.next_deadline(), Some(50));
    }

    #[test]
    fn test_cancel_owned_by_record() {
        let mut timers = TimerRegistry::new();
        let first = handle(0, 1);
        let second = handle(1, 1);
        timers
            .start(TimerId::owned(TimerKind::AvrcpVolume, first), 0, 50)
            .unwrap();
        timers
            .start(TimerId::owned(TimerKind::AvrcpPlayingPending, first), 0, 1000)
            .unwrap();
        timers
            .start(TimerId::owned(TimerKind::AvrcpVolume, second), 0, 50)
            .unwrap();
        timers
            .start_periodic(TimerId::global(TimerKind::SniffTick), 0, 100)
            .unwrap();

        assert_eq!(timers.cancel_owned_by(first), 2);
        assert!(timers.is_armed(TimerId::owned(TimerKind::AvrcpVolume, second)));
        assert!(timers.is_armed(TimerId::global(TimerKind::SniffTick)));
    }

    #[test]
    fn test_generation_distinguishes_owners() {
        let mut timers = TimerRegistry::new();
        let old = handle(0, 1);
        let reused = handle(0, 2);
        timers
            .start(TimerId::owned(TimerKind::AvrcpVolume, old), 0, 50)
            .unwrap();
        assert_eq!(timers.cancel_owned_by(reused), 0);
        assert!(timers.is_armed(TimerId::owned(TimerKind::AvrcpVolume, old)));
    }

    #[test]
    fn test_expired_in_deadline_order() {
        let mut timers = TimerRegistry::new();
        let late = TimerId::global(TimerKind::LinkAdjustTick);
        let early = TimerId::global(TimerKind::ScanUpdate);
        timers.start(late, 0, 90).unwrap();
        timers.start(early, 0, 10).unwrap();
        let fired = timers.take_expired(100);
        assert_eq!(fired.as_slice(), &[early, late]);
    }

    #[test]
    fn test_registry_capacity() {
        let mut timers = TimerRegistry::new();
        for i in 0..MAX_TIMERS {
            let owner = handle(0, u16::try_from(i).unwrap());
            timers
                .start(TimerId::owned(TimerKind::AvrcpVolume, owner), 0, 10)
                .unwrap();
        }
        let extra = TimerId::global(TimerKind::ScanUpdate);
        assert_eq!(timers.start(extra, 0, 10), Err(ServiceError::OutOfResources));
    }
}
