// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod none;
mod slow_start;

use crate::runtime::network::config::CongestionControlType;
use ::std::fmt::Debug;

pub use self::{
    none::None,
    slow_start::SlowStart,
};

pub trait CongestionControl: Debug {
    fn new(mss: usize) -> Box<dyn CongestionControl>
    where
        Self: Sized;

    /// Congestion window, in bytes.
    fn get_cwnd(&self) -> u32;

    /// Slow start threshold, in bytes.
    fn get_ssthresh(&self) -> u32;

    // Called for every ACK that acknowledges new data, with the number of payload bytes it covered.
    fn on_ack_received(&mut self, _acked_bytes: u32) {}

    // Called immediately before retransmitting after a retransmission timeout caused by genuine loss.
    fn on_rto(&mut self, _flight_size: u32) {}
}

pub type CongestionControlConstructor = fn(usize) -> Box<dyn CongestionControl>;

/// Maps the configured algorithm to its constructor.
pub fn constructor_for(cc_type: CongestionControlType) -> CongestionControlConstructor {
    match cc_type {
        CongestionControlType::SlowStart => SlowStart::new,
        CongestionControlType::None => None::new,
    }
}
