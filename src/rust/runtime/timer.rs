// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::SharedObject;
use ::core::cmp::Reverse;
use ::std::{
    collections::BinaryHeap,
    ops::{
        Deref,
        DerefMut,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

struct TimerQueueEntry<K> {
    expiry: Instant,
    /// Insertion order, so that entries with the same expiry fire in the order they were scheduled.
    seqno: u64,
    key: K,
}

/// Timer that holds one or more events for future wake up. Each event carries a key that identifies what should
/// happen once it expires.
pub struct Timer<K> {
    now: Instant,
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry<K>>>,
    next_seqno: u64,
}

pub struct SharedTimer<K>(SharedObject<Timer<K>>);

//==============================================================================
// Associate Functions
//==============================================================================

impl<K> SharedTimer<K> {
    pub fn new(now: Instant) -> Self {
        Self(SharedObject::<Timer<K>>::new(Timer {
            now,
            heap: BinaryHeap::new(),
            next_seqno: 0,
        }))
    }

    /// Moves the clock forward and returns every event that expired on the way, earliest first.
    pub fn advance_clock(&mut self, now: Instant) -> Vec<(Instant, K)> {
        if now < self.now {
            warn!("advance_clock(): clock moved backwards, ignoring");
            return Vec::new();
        }
        self.now = now;

        let mut expired: Vec<(Instant, K)> = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if now < entry.expiry {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                expired.push((entry.expiry, entry.key));
            }
        }
        expired
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Schedules `key` to expire `timeout` from now and returns the deadline.
    pub fn schedule(&mut self, timeout: Duration, key: K) -> Instant {
        let expiry: Instant = self.now + timeout;
        self.schedule_at(expiry, key);
        expiry
    }

    pub fn schedule_at(&mut self, expiry: Instant, key: K) {
        let seqno: u64 = self.next_seqno;
        self.next_seqno += 1;
        self.heap.push(Reverse(TimerQueueEntry { expiry, seqno, key }));
    }

    /// Number of events still pending, including ones that the owner no longer cares about.
    pub fn num_pending(&self) -> usize {
        self.heap.len()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<K> Clone for SharedTimer<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> Deref for SharedTimer<K> {
    type Target = Timer<K>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K> DerefMut for SharedTimer<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl<K> PartialEq for TimerQueueEntry<K> {
    fn eq(&self, other: &TimerQueueEntry<K>) -> bool {
        self.expiry == other.expiry && self.seqno == other.seqno
    }
}

impl<K> Eq for TimerQueueEntry<K> {}

impl<K> PartialOrd for TimerQueueEntry<K> {
    fn partial_cmp(&self, other: &TimerQueueEntry<K>) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for TimerQueueEntry<K> {
    fn cmp(&self, other: &TimerQueueEntry<K>) -> core::cmp::Ordering {
        // Compare timer queue entries by expiration time, then by insertion order.
        self.expiry
            .cmp(&other.expiry)
            .then_with(|| self.seqno.cmp(&other.seqno))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
