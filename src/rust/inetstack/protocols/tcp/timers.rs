// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    network::consts::TCP_PERSIST_INITIAL_BACKOFF,
    timer::SharedTimer,
    QDesc,
};
use ::std::time::{
    Duration,
    Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TimerKind {
    Retransmit,
    Persist,
    MslWait,
}

/// Identifies a timer in the peer's clock: the connection it belongs to and which of its timers it is.
pub type TimerKey = (QDesc, TimerKind);

/// Per-connection deadlines. Every armed deadline is mirrored into the shared clock. Entries in the clock are never
/// removed, so an entry only counts if it still matches the deadline recorded here.
pub struct Timers {
    qd: QDesc,
    clock: SharedTimer<TimerKey>,
    retransmit: Option<Instant>,
    persist: Option<Instant>,
    persist_backoff: Duration,
    msl_wait: Option<Instant>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Timers {
    pub fn new(qd: QDesc, clock: SharedTimer<TimerKey>) -> Self {
        Self {
            qd,
            clock,
            retransmit: None,
            persist: None,
            persist_backoff: TCP_PERSIST_INITIAL_BACKOFF,
            msl_wait: None,
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Arms `kind` to fire `timeout` from now, replacing any earlier deadline. The retransmit and persist timers are
    /// mutually exclusive, so arming one of them disarms the other.
    pub fn arm(&mut self, kind: TimerKind, timeout: Duration) -> Instant {
        let deadline: Instant = self.clock.schedule(timeout, (self.qd, kind));
        trace!("arm(): qd={} timer={:?} deadline={:?}", self.qd, kind, deadline);
        match kind {
            TimerKind::Retransmit => {
                self.persist = None;
                self.retransmit = Some(deadline);
            },
            TimerKind::Persist => {
                self.retransmit = None;
                self.persist = Some(deadline);
            },
            TimerKind::MslWait => self.msl_wait = Some(deadline),
        }
        deadline
    }

    pub fn disarm(&mut self, kind: TimerKind) {
        *self.slot(kind) = None;
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        match kind {
            TimerKind::Retransmit => self.retransmit,
            TimerKind::Persist => self.persist,
            TimerKind::MslWait => self.msl_wait,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadline(kind).is_some()
    }

    /// Consumes the deadline of `kind` if `expiry` is the one currently armed. Returns false for stale entries.
    pub fn expire(&mut self, kind: TimerKind, expiry: Instant) -> bool {
        let slot: &mut Option<Instant> = self.slot(kind);
        if *slot == Some(expiry) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn persist_backoff(&self) -> Duration {
        self.persist_backoff
    }

    pub fn back_off_persist(&mut self) {
        self.persist_backoff *= 2;
    }

    pub fn reset_persist_backoff(&mut self) {
        self.persist_backoff = TCP_PERSIST_INITIAL_BACKOFF;
    }

    pub fn cancel_all(&mut self) {
        self.retransmit = None;
        self.persist = None;
        self.msl_wait = None;
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Instant> {
        match kind {
            TimerKind::Retransmit => &mut self.retransmit,
            TimerKind::Persist => &mut self.persist,
            TimerKind::MslWait => &mut self.msl_wait,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
