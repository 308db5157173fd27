// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::protocols::tcp::{
        congestion_control::{
            CongestionControl,
            CongestionControlConstructor,
        },
        rto::RtoCalculator,
        SeqNumber,
    },
    runtime::network::consts::{
        FALLBACK_MSS,
        TCP_SYN_RETRANSMITTED_RTO,
    },
};
use ::std::{
    cmp,
    collections::VecDeque,
    fmt,
    time::{
        Duration,
        Instant,
    },
};

/// An entry of the send queue. Segments are created right before their first transmission and stay queued until
/// they are fully acknowledged.
pub struct Segment {
    pub seq: SeqNumber,
    pub data: Vec<u8>,
    pub syn: bool,
    pub fin: bool,
    pub psh: bool,
    // Last time this segment went out, `None` if it never did.
    pub when: Option<Instant>,
    // Set on retransmission. Such segments are never used for RTT samples (Karn's algorithm).
    pub retransmitted: bool,
}

impl Segment {
    fn new(seq: SeqNumber, data: Vec<u8>) -> Self {
        Self {
            seq,
            data,
            syn: false,
            fin: false,
            psh: false,
            when: None,
            retransmitted: false,
        }
    }

    /// Sequence space consumed by this segment. SYN and FIN count as one byte each.
    pub fn seq_len(&self) -> u32 {
        self.data.len() as u32 + self.syn as u32 + self.fin as u32
    }

    /// Last sequence number covered by this segment.
    pub fn end_seq(&self) -> SeqNumber {
        self.seq + self.seq_len().saturating_sub(1)
    }
}

/// What an acceptable ACK did to the send side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    /// Whether SND.UNA moved forward.
    pub advanced: bool,
    /// Payload bytes that left the send queue.
    pub acked_bytes: u32,
    /// Whether our FIN is among the acknowledged sequence numbers.
    pub fin_acked: bool,
}

pub struct Sender {
    //
    // Send Sequence Space:
    //
    //                     |<-----------------send window size----------------->|
    //                     |                                                    |
    //                  snd_una                   snd_nxt                snd_una + snd_wnd
    //                     v                         v                          v
    // ... ----------------|-------------------------|--------------------------|--------------------------------
    //       acknowledged  |      unacknowledged     |     allowed to send      |  future sequence number space
    //
    // Here snd_nxt is the highest sequence number sent so far. After a retransmission timeout the next segment to go
    // out is the one at `next` in the send queue, which may be below snd_nxt.
    //
    snd_iss: SeqNumber,
    snd_una: SeqNumber,
    snd_nxt: SeqNumber,
    snd_wnd: u32,

    // Maximum segment size announced by the remote, and the one we announced.
    snd_mss: usize,
    rcv_mss: usize,

    // Retransmission queue, in transmission order, and the index of the next segment to (re)send.
    queue: VecDeque<Segment>,
    next: usize,

    // Sum of the payload lengths in `queue`.
    flight_size: u32,

    // Bytes written by the application but not cut into segments yet.
    pending: VecDeque<u8>,
    // Stream offsets at which application writes end, so that each write's last segment carries PSH.
    write_ends: VecDeque<u64>,
    bytes_written: u64,
    bytes_segmented: u64,

    fin_requested: bool,
    fin_queued: bool,

    // Send time and end sequence number of the segment being timed, if any.
    rtt_sample: Option<(Instant, SeqNumber)>,
    rto_calculator: RtoCalculator,

    cc_constructor: CongestionControlConstructor,
    cc: Box<dyn CongestionControl>,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sender")
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("snd_wnd", &self.snd_wnd)
            .field("snd_mss", &self.snd_mss)
            .field("queued", &self.queue.len())
            .field("next", &self.next)
            .field("flight_size", &self.flight_size)
            .field("pending", &self.pending.len())
            .field("cc", &self.cc)
            .finish()
    }
}

impl Sender {
    pub fn new(iss: SeqNumber, rcv_mss: usize, cc_constructor: CongestionControlConstructor) -> Self {
        Self {
            snd_iss: iss,
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            snd_mss: FALLBACK_MSS,
            rcv_mss,
            queue: VecDeque::new(),
            next: 0,
            flight_size: 0,
            pending: VecDeque::new(),
            write_ends: VecDeque::new(),
            bytes_written: 0,
            bytes_segmented: 0,
            fin_requested: false,
            fin_queued: false,
            rtt_sample: None,
            rto_calculator: RtoCalculator::new(),
            cc_constructor,
            cc: cc_constructor(FALLBACK_MSS),
        }
    }

    pub fn snd_una(&self) -> SeqNumber {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> SeqNumber {
        self.snd_nxt
    }

    pub fn snd_wnd(&self) -> u32 {
        self.snd_wnd
    }

    pub fn snd_mss(&self) -> usize {
        self.snd_mss
    }

    pub fn flight_size(&self) -> u32 {
        self.flight_size
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.get_cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.get_ssthresh()
    }

    pub fn rto(&self) -> Duration {
        self.rto_calculator.rto()
    }

    #[cfg(test)]
    pub fn rto_calculator(&self) -> &RtoCalculator {
        &self.rto_calculator
    }

    #[cfg(test)]
    pub fn rtt_sample(&self) -> Option<(Instant, SeqNumber)> {
        self.rtt_sample
    }

    pub fn bytes_segmented(&self) -> u64 {
        self.bytes_segmented
    }

    pub fn has_pending_data(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_fin_requested(&self) -> bool {
        self.fin_requested
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.queue.get(index)
    }

    /// Payload bytes still sitting in the send queue.
    pub fn unacked_payload(&self) -> u32 {
        self.queue.iter().map(|segment| segment.data.len() as u32).sum()
    }

    /// Largest payload a segment may carry on this connection.
    fn segment_size(&self) -> usize {
        cmp::min(self.snd_mss, self.rcv_mss)
    }

    /// Sequence number of the next segment to go out, retransmissions included.
    fn next_seq(&self) -> SeqNumber {
        self.queue.get(self.next).map_or(self.snd_nxt, |segment| segment.seq)
    }

    /// Sequence number the next new segment starts at.
    fn tail_seq(&self) -> SeqNumber {
        self.queue
            .back()
            .map_or(self.snd_nxt, |segment| segment.seq + segment.seq_len())
    }

    /// Bytes that may be sent in one pass. Both the congestion window and the remote's window bound the data in
    /// flight, so whatever is already outstanding counts against each of them.
    pub fn usable_window(&self) -> u32 {
        let in_flight: u32 = self.next_seq().distance_from(self.snd_una);
        cmp::min(
            self.cc.get_cwnd().saturating_sub(in_flight),
            self.snd_wnd.saturating_sub(in_flight),
        )
    }

    /// Appends application data to the send buffer. Returns the stream offset at which this write ends.
    pub fn push(&mut self, buf: &[u8]) -> u64 {
        if !buf.is_empty() {
            self.pending.extend(buf.iter());
            self.bytes_written += buf.len() as u64;
            self.write_ends.push_back(self.bytes_written);
        }
        self.bytes_written
    }

    /// Asks for a FIN to be sent once all pending data has been segmented.
    pub fn request_fin(&mut self) {
        self.fin_requested = true;
    }

    /// Queues the SYN.
    pub fn queue_syn(&mut self) -> usize {
        let mut segment: Segment = Segment::new(self.snd_iss, Vec::new());
        segment.syn = true;
        self.queue.push_back(segment);
        self.queue.len() - 1
    }

    /// Cuts a new segment of at most `max_bytes` from the pending data. A segment never spans two writes.
    pub fn segment_pending(&mut self, max_bytes: usize) -> Option<usize> {
        let write_end: u64 = *self.write_ends.front()?;
        let to_boundary: usize = (write_end - self.bytes_segmented) as usize;
        let nbytes: usize = cmp::min(cmp::min(self.segment_size(), to_boundary), max_bytes);
        if nbytes == 0 {
            return None;
        }

        let data: Vec<u8> = self.pending.drain(..nbytes).collect();
        self.bytes_segmented += nbytes as u64;
        let mut segment: Segment = Segment::new(self.tail_seq(), data);
        if self.bytes_segmented == write_end {
            segment.psh = true;
            self.write_ends.pop_front();
        }
        self.flight_size += nbytes as u32;
        self.queue.push_back(segment);
        Some(self.queue.len() - 1)
    }

    /// Queues the FIN, once requested and only behind every pending byte.
    pub fn queue_fin(&mut self) -> Option<usize> {
        if !self.fin_requested || self.fin_queued || !self.pending.is_empty() {
            return None;
        }
        let mut segment: Segment = Segment::new(self.tail_seq(), Vec::new());
        segment.fin = true;
        self.fin_queued = true;
        self.queue.push_back(segment);
        Some(self.queue.len() - 1)
    }

    /// Index of the next queued segment that is due for (re)transmission.
    pub fn next_to_send(&self) -> Option<usize> {
        (self.next < self.queue.len()).then_some(self.next)
    }

    /// Records that the segment at `index` went out at `now`.
    pub fn mark_sent(&mut self, index: usize, now: Instant) {
        let segment: &mut Segment = &mut self.queue[index];
        let first_transmission: bool = segment.when.is_none();
        segment.when = Some(now);
        let end: SeqNumber = segment.seq + segment.seq_len();
        if first_transmission && !segment.retransmitted && segment.seq_len() > 0 && self.rtt_sample.is_none() {
            self.rtt_sample = Some((now, segment.end_seq()));
        }
        self.next = cmp::max(self.next, index + 1);
        self.snd_nxt = self.snd_nxt.max(end);
    }

    /// Processes the acknowledgement number and window of an inbound segment. Callers must have checked that
    /// `ack <= snd_nxt`.
    pub fn process_ack(&mut self, ack: SeqNumber, window: u16, now: Instant) -> AckOutcome {
        let mut outcome: AckOutcome = AckOutcome::default();
        if ack < self.snd_una {
            trace!("process_ack(): old ack (ack={}, snd_una={})", ack, self.snd_una);
            return outcome;
        }

        if ack > self.snd_una {
            outcome.advanced = true;
            while let Some(segment) = self.queue.front_mut() {
                if ack > segment.end_seq() {
                    // Fully acknowledged.
                    let nbytes: u32 = segment.data.len() as u32;
                    outcome.acked_bytes += nbytes;
                    outcome.fin_acked |= segment.fin;
                    self.flight_size -= nbytes;
                    self.queue.pop_front();
                    self.next = self.next.saturating_sub(1);
                } else {
                    if ack > segment.seq && !segment.data.is_empty() {
                        // Partially acknowledged. Drop the covered prefix.
                        let nbytes: u32 = ack.distance_from(segment.seq);
                        segment.data.drain(..nbytes as usize);
                        segment.seq = ack;
                        outcome.acked_bytes += nbytes;
                        self.flight_size -= nbytes;
                    }
                    break;
                }
            }
            self.snd_una = ack;
            debug_assert_eq!(self.flight_size, self.unacked_payload());

            if let Some((sent_at, end_seq)) = self.rtt_sample {
                if ack > end_seq {
                    let rtt: Duration = now.saturating_duration_since(sent_at);
                    self.rto_calculator.add_sample(rtt);
                    self.rtt_sample = None;
                    trace!("process_ack(): rtt={:?} rto={:?}", rtt, self.rto_calculator.rto());
                }
            }

            self.cc.on_ack_received(outcome.acked_bytes);
        }

        // Any acceptable ACK carries the current window of the remote.
        self.snd_wnd = window as u32;
        outcome
    }

    /// Prepares a retransmission timeout: backs off the RTO, forgets the RTT sample and rewinds the next-to-send
    /// index to the head of the queue. Returns whether the head is the SYN, or `None` if nothing is outstanding.
    pub fn on_retransmit_timeout(&mut self) -> Option<bool> {
        let head: &mut Segment = self.queue.front_mut()?;
        self.rto_calculator.back_off();
        self.rtt_sample = None;
        if head.when.is_some() && self.next > 0 {
            self.cc.on_rto(self.flight_size);
        }
        head.retransmitted = true;
        let is_syn: bool = head.syn;
        self.next = 0;
        Some(is_syn)
    }

    /// Marks the head of the queue for a resend outside of a retransmission timeout, as done for window probes.
    pub fn mark_head_retransmitted(&mut self) -> Option<usize> {
        let head: &mut Segment = self.queue.front_mut()?;
        head.retransmitted = true;
        if self.rtt_sample.map_or(false, |(_, end_seq)| end_seq == head.end_seq()) {
            self.rtt_sample = None;
        }
        Some(0)
    }

    /// Applies what the handshake taught us about the remote, and starts congestion control over with its MSS.
    pub fn on_established(&mut self, snd_mss: usize, syn_retransmitted: bool) {
        self.snd_mss = snd_mss;
        self.cc = (self.cc_constructor)(snd_mss);
        if syn_retransmitted {
            self.rto_calculator.set_rto(TCP_SYN_RETRANSMITTED_RTO);
        }
        debug!("on_established(): mss={} cwnd={}", self.segment_size(), self.cc.get_cwnd());
    }

    /// Drops everything that is still queued, once the connection is gone.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.next = 0;
        self.flight_size = 0;
        self.pending.clear();
        self.write_ends.clear();
        self.rtt_sample = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AckOutcome,
        Sender,
    };
    use crate::{
        inetstack::protocols::tcp::{
            congestion_control::{
                CongestionControl,
                SlowStart,
            },
            SeqNumber,
        },
        runtime::network::consts::FALLBACK_MSS,
    };
    use ::anyhow::Result;
    use ::std::time::{
        Duration,
        Instant,
    };

    /// Builds a sender that has completed its handshake with ISS 999.
    fn established(mss: usize, window: u16, now: Instant) -> Sender {
        let mut sender: Sender = Sender::new(SeqNumber::from(999), mss, SlowStart::new);
        let syn: usize = sender.queue_syn();
        sender.mark_sent(syn, now);
        sender.process_ack(SeqNumber::from(1000), window, now);
        sender.on_established(mss, false);
        sender
    }

    #[test]
    fn writes_are_cut_at_mss_and_write_boundaries() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(FALLBACK_MSS, 0xffff, now);
        crate::ensure_eq!(sender.push(&[1; 1000]), 1000);
        crate::ensure_eq!(sender.push(&[2; 10]), 1010);

        let mut sizes: Vec<(usize, bool)> = Vec::new();
        while let Some(index) = sender.segment_pending(usize::MAX) {
            let segment = sender.segment(index).ok_or_else(|| anyhow::anyhow!("missing segment"))?;
            sizes.push((segment.data.len(), segment.psh));
            sender.mark_sent(index, now);
        }
        crate::ensure_eq!(sizes, vec![(536, false), (464, true), (10, true)]);
        crate::ensure_eq!(sender.snd_nxt(), SeqNumber::from(2010));
        crate::ensure_eq!(sender.flight_size(), 1010);
        crate::ensure_eq!(sender.bytes_segmented(), 1010);
        Ok(())
    }

    #[test]
    fn flight_size_tracks_queue_across_acks() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(100, 0xffff, now);
        sender.push(&[0; 350]);
        while let Some(index) = sender.segment_pending(usize::MAX) {
            sender.mark_sent(index, now);
        }

        for ack in [1000u32, 1050, 1100, 1250, 1349, 1350] {
            sender.process_ack(SeqNumber::from(ack), 0xffff, now + Duration::from_millis(10));
            crate::ensure_eq!(sender.flight_size(), sender.unacked_payload(), "after ack {}", ack);
            crate::ensure_eq!(sender.flight_size(), 1350 - ack);
            crate::ensure_eq!(sender.snd_una() <= sender.snd_nxt(), true);
        }
        crate::ensure_eq!(sender.queue_len(), 0);
        Ok(())
    }

    #[test]
    fn old_acks_are_ignored_and_window_is_tracked() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(536, 4096, now);
        crate::ensure_eq!(sender.snd_wnd(), 4096);

        crate::ensure_eq!(sender.process_ack(SeqNumber::from(990), 0, now), AckOutcome::default());
        crate::ensure_eq!(sender.snd_wnd(), 4096);

        // A duplicate ACK still updates the window.
        let outcome: AckOutcome = sender.process_ack(SeqNumber::from(1000), 0, now);
        crate::ensure_eq!(outcome.advanced, false);
        crate::ensure_eq!(sender.snd_wnd(), 0);
        Ok(())
    }

    #[test]
    fn usable_window_is_consumed_by_outstanding_data() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(1000, 1500, now);
        crate::ensure_eq!(sender.usable_window(), 1000);

        sender.push(&[0; 600]);
        let index: usize = sender.segment_pending(usize::MAX).ok_or_else(|| anyhow::anyhow!("no segment"))?;
        sender.mark_sent(index, now);
        crate::ensure_eq!(sender.usable_window(), 400);

        // Acknowledging it frees up the congestion window again.
        sender.process_ack(SeqNumber::from(1600), 1500, now);
        crate::ensure_eq!(sender.cwnd(), 1600);
        crate::ensure_eq!(sender.usable_window(), 1500);
        Ok(())
    }

    #[test]
    fn rtt_is_sampled_once_and_never_on_retransmissions() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = Sender::new(SeqNumber::from(0), 536, SlowStart::new);
        let syn: usize = sender.queue_syn();
        sender.mark_sent(syn, now);
        crate::ensure_eq!(sender.rtt_sample(), Some((now, SeqNumber::from(0))));

        // The SYN times out, so the sample is discarded and the resend is not timed.
        crate::ensure_eq!(sender.on_retransmit_timeout(), Some(true));
        crate::ensure_eq!(sender.rtt_sample(), None);
        crate::ensure_eq!(sender.rto(), Duration::from_secs(2));
        sender.mark_sent(0, now + Duration::from_secs(1));
        crate::ensure_eq!(sender.rtt_sample(), None);

        sender.process_ack(SeqNumber::from(1), 0xffff, now + Duration::from_secs(2));
        crate::ensure_eq!(sender.rto_calculator().srtt(), None);
        crate::ensure_eq!(sender.rto(), Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn fin_is_queued_behind_pending_data() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(536, 0xffff, now);
        sender.push(&[7; 10]);
        sender.request_fin();
        crate::ensure_eq!(sender.queue_fin(), None);

        let data: usize = sender.segment_pending(usize::MAX).ok_or_else(|| anyhow::anyhow!("no segment"))?;
        sender.mark_sent(data, now);
        let fin: usize = sender.queue_fin().ok_or_else(|| anyhow::anyhow!("no fin"))?;
        sender.mark_sent(fin, now);
        crate::ensure_eq!(sender.queue_fin(), None);
        crate::ensure_eq!(sender.snd_nxt(), SeqNumber::from(1011));

        let outcome: AckOutcome = sender.process_ack(SeqNumber::from(1011), 0xffff, now);
        crate::ensure_eq!(outcome.fin_acked, true);
        crate::ensure_eq!(outcome.acked_bytes, 10);
        crate::ensure_eq!(sender.cwnd() > 536, true);
        Ok(())
    }

    #[test]
    fn retransmit_timeout_collapses_window_on_loss() -> Result<()> {
        let now: Instant = Instant::now();
        let mut sender: Sender = established(1000, 0xffff, now);
        for _ in 0..4 {
            sender.push(&[0; 1000]);
            if let Some(index) = sender.segment_pending(usize::MAX) {
                sender.mark_sent(index, now);
            }
            sender.process_ack(sender.snd_nxt(), 0xffff, now);
        }
        crate::ensure_eq!(sender.cwnd(), 5000);

        sender.push(&[0; 3000]);
        while let Some(index) = sender.segment_pending(usize::MAX) {
            sender.mark_sent(index, now);
        }
        crate::ensure_eq!(sender.on_retransmit_timeout(), Some(false));
        crate::ensure_eq!(sender.next_to_send(), Some(0));
        crate::ensure_eq!(sender.ssthresh(), 2000);
        crate::ensure_eq!(sender.cwnd(), 4000);
        Ok(())
    }
}
