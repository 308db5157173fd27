// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::runtime::network::consts::TCP_INITIAL_RTO;
use ::std::time::Duration;

// TCP Retransmission Timeout (RTO) Calculator.
// See RFC 6298 for details.

/// Number of consecutive back offs after which the round-trip estimate is considered stale and discarded.
const MAX_BACKOFFS_BEFORE_RESET: u32 = 8;

#[derive(Debug)]
pub struct RtoCalculator {
    // Smoothed round-trip time.
    srtt: f64,

    // Round-trip time variation.
    rttvar: f64,

    // Retransmission timeout.
    rto: f64,

    // Whether a RTT (round-trip-time) sample has been received yet.
    received_sample: bool,

    // Back offs since the last RTT sample.
    backoffs: u32,
}

impl RtoCalculator {
    /// Initializes an RTO Calculator.
    pub fn new() -> Self {
        // The initial values for SRTT and RTTVAR are arbitrary as they aren't used until after the first sample has
        // been received.
        Self {
            srtt: 0.0,
            rttvar: 0.0,
            rto: TCP_INITIAL_RTO.as_secs_f64(),
            received_sample: false,
            backoffs: 0,
        }
    }

    /// Adds an RTT sample to the calculator.
    pub fn add_sample(&mut self, rtt: Duration) {
        // RFC 6298's suggested value for alpha is 1/8.
        const ALPHA: f64 = 0.125;
        // RFC 6298's suggested value for beta is 1/4.
        const BETA: f64 = 0.25;
        // Floor for the variance term, coarser than any realistic clock granularity.
        const GRANULARITY: f64 = 0.100f64;

        let rtt: f64 = rtt.as_secs_f64();

        if !self.received_sample {
            // Initial sample formula from RFC 6298 Section 2.2:
            self.srtt = rtt;
            self.rttvar = rtt / 2.;
            self.received_sample = true;
        } else {
            // Subsequent sample formula from RFC 6298 Section 2.3:
            self.rttvar = (1.0 - BETA) * self.rttvar + BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
        }
        self.backoffs = 0;

        // The new RTO value is the smoothed RTT plus the maximum of the granularity and 4 times the RTT variance.
        let rto: f64 = self.srtt + GRANULARITY.max(4.0 * self.rttvar);

        self.update_rto(rto);
    }

    /// Updates the stored RTO value while keeping it above the lower bound of RFC 6298 Section 2.4. There is no upper
    /// bound, since retransmissions never give up.
    fn update_rto(&mut self, new_rto: f64) {
        const LOWER_BOUND_SEC: f64 = 1.0f64;
        self.rto = new_rto.max(LOWER_BOUND_SEC);
    }

    /// Performs an exponential "back off" of the RTO (doubles the current timeout). Too many back offs in a row
    /// discard the round-trip estimate, so that the next sample starts it over.
    pub fn back_off(&mut self) {
        self.update_rto(self.rto * 2.0);
        self.backoffs += 1;
        if self.backoffs >= MAX_BACKOFFS_BEFORE_RESET && self.received_sample {
            debug!("back_off(): discarding round-trip estimate after {} back offs", self.backoffs);
            self.srtt = 0.0;
            self.rttvar = 0.0;
            self.received_sample = false;
        }
    }

    /// Overrides the current RTO, as done when a connection is established after its SYN was retransmitted.
    pub fn set_rto(&mut self, rto: Duration) {
        self.update_rto(rto.as_secs_f64());
    }

    /// Gets the current RTO value.
    pub fn rto(&self) -> Duration {
        Duration::from_secs_f64(self.rto)
    }

    /// Gets the smoothed round-trip time, if any sample was taken since the estimate was last discarded.
    #[cfg(test)]
    pub fn srtt(&self) -> Option<Duration> {
        self.received_sample.then(|| Duration::from_secs_f64(self.srtt))
    }

    /// Gets the round-trip time variation, if any sample was taken since the estimate was last discarded.
    #[cfg(test)]
    pub fn rttvar(&self) -> Option<Duration> {
        self.received_sample.then(|| Duration::from_secs_f64(self.rttvar))
    }

    #[cfg(test)]
    pub fn backoffs(&self) -> u32 {
        self.backoffs
    }
}
