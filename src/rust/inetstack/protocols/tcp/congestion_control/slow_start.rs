// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::CongestionControl;
use crate::runtime::network::consts::MAX_WINDOW;
use ::std::cmp;

/// Slow start and congestion avoidance (RFC 5681), without fast retransmit.
#[derive(Debug)]
pub struct SlowStart {
    mss: u32,
    cwnd: u32,
    ssthresh: u32,
}

impl CongestionControl for SlowStart {
    fn new(mss: usize) -> Box<dyn CongestionControl> {
        Box::new(Self::with_ssthresh(mss, MAX_WINDOW))
    }

    fn get_cwnd(&self) -> u32 {
        self.cwnd
    }

    fn get_ssthresh(&self) -> u32 {
        self.ssthresh
    }

    fn on_ack_received(&mut self, acked_bytes: u32) {
        if acked_bytes == 0 {
            return;
        }
        let increment: u32 = if self.in_slow_start() {
            cmp::min(acked_bytes, self.mss)
        } else {
            cmp::max(1, self.mss * self.mss / self.cwnd)
        };
        self.cwnd = cmp::min(self.cwnd.saturating_add(increment), MAX_WINDOW);
        trace!(
            "on_ack_received(): cwnd={} ssthresh={} acked={}",
            self.cwnd,
            self.ssthresh,
            acked_bytes
        );
    }

    fn on_rto(&mut self, flight_size: u32) {
        self.ssthresh = cmp::max(flight_size / 2, 2 * self.mss);
        self.cwnd = Self::loss_window(self.mss);
        debug!("on_rto(): cwnd={} ssthresh={}", self.cwnd, self.ssthresh);
    }
}

impl SlowStart {
    /// Starts with a one-segment window and the given slow start threshold.
    pub fn with_ssthresh(mss: usize, ssthresh: u32) -> Self {
        let mss: u32 = mss as u32;
        Self {
            mss,
            cwnd: mss,
            ssthresh,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.cwnd <= self.ssthresh
    }

    /// Window after a loss, per RFC 5681 Section 3.1.
    fn loss_window(mss: u32) -> u32 {
        if mss > 2190 {
            2 * mss
        } else if mss > 1095 {
            3 * mss
        } else {
            4 * mss
        }
    }
}
