// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// TCP sequence numbers live in a 2^32 space that wraps around (RFC 793, Section 3.3), so every addition, subtraction
// and comparison is done modulo 2^32. Comparisons are only meaningful between numbers less than 2^31 apart, which is
// why this type is not `Ord`.

use ::std::{
    cmp::Ordering,
    convert::From,
    fmt,
    ops::{
        Add,
        Sub,
    },
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct SeqNumber {
    value: u32,
}

impl SeqNumber {
    /// Signed distance from `other` to `self`.
    #[inline]
    fn delta(self, other: SeqNumber) -> i32 {
        self.value.wrapping_sub(other.value) as i32
    }

    /// Returns the later of two sequence numbers.
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Checks whether `self` lies within `[low, high]`, inclusive on both ends.
    pub fn is_between(self, low: SeqNumber, high: SeqNumber) -> bool {
        low <= self && self <= high
    }

    /// Number of sequence numbers from `other` up to `self`. Callers must ensure that `other <= self`.
    pub fn distance_from(self, other: SeqNumber) -> u32 {
        self.value.wrapping_sub(other.value)
    }
}

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.value
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber { value: item }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl Add for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_add(other.value)).into()
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: u32) -> SeqNumber {
        (self.value.wrapping_add(other)).into()
    }
}

impl Sub for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: SeqNumber) -> SeqNumber {
        (self.value.wrapping_sub(other.value)).into()
    }
}

// `partial_cmp` answers relative to the 2^31 half-space, so the relation is not transitive over more than two values.
impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.delta(*other).cmp(&0))
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        self.delta(*other) < 0
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        self.delta(*other) <= 0
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        self.delta(*other) > 0
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        self.delta(*other) >= 0
    }
}
