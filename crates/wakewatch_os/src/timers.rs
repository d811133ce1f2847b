#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use wakewatch_kernel_contracts::ph1sess::SessionId;
use wakewatch_kernel_contracts::MonotonicTimeNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    VoteCountdown,
    GrantExpiry,
}

impl TimerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerKind::VoteCountdown => "vote_countdown",
            TimerKind::GrantExpiry => "grant_expiry",
        }
    }
}

/// Deadlines keyed by session. Nothing fires by itself: the owner polls `due`
/// from its tick, and cancels entries on every transition that supersedes them.
#[derive(Debug, Clone, Default)]
pub struct SessionTimers {
    entries: BTreeMap<(SessionId, TimerKind), MonotonicTimeNs>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier deadline for the same key.
    pub fn schedule(&mut self, session_id: SessionId, kind: TimerKind, deadline: MonotonicTimeNs) {
        self.entries.insert((session_id, kind), deadline);
    }

    pub fn cancel(&mut self, session_id: SessionId, kind: TimerKind) -> Option<MonotonicTimeNs> {
        self.entries.remove(&(session_id, kind))
    }

    pub fn cancel_session(&mut self, session_id: SessionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(sid, _), _| *sid != session_id);
        before - self.entries.len()
    }

    pub fn deadline(&self, session_id: SessionId, kind: TimerKind) -> Option<MonotonicTimeNs> {
        self.entries.get(&(session_id, kind)).copied()
    }

    /// Removes and returns every entry whose deadline has passed, earliest first.
    pub fn take_due(&mut self, now: MonotonicTimeNs) -> Vec<(SessionId, TimerKind)> {
        let mut due: Vec<((SessionId, TimerKind), MonotonicTimeNs)> = self
            .entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, d)| (*k, *d))
            .collect();
        due.sort_by_key(|(k, d)| (*d, *k));
        for (k, _) in &due {
            self.entries.remove(k);
        }
        due.into_iter().map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
