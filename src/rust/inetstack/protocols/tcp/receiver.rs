// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::protocols::tcp::SeqNumber,
    runtime::network::consts::MAX_WINDOW,
};
use ::std::{
    cmp,
    collections::VecDeque,
};

// A segment that was accepted but not read yet.
struct ReceivedSegment {
    data: Vec<u8>,
    psh: bool,
}

pub struct Receiver {
    //
    // Receive Sequence Space:
    //
    //                     |<---------------receive_buffer_size---------------->|
    //                     |                                                    |
    //                     |                         |<-----receive window----->|
    //               first unread                 rcv_nxt               rcv_nxt + receive window
    //                     v                         v                          v
    // ... ----------------|-------------------------|--------------------------|------------------------------
    //      read by user   |  received but not read  |    willing to receive    | future sequence number space
    //
    // There is no reassembly: a segment that does not start at rcv_nxt is delivered as is, except for any prefix
    // that was already received.
    //
    rcv_irs: SeqNumber,
    rcv_nxt: SeqNumber,
    rcv_mss: usize,
    receive_buffer_size: u32,

    recv_queue: VecDeque<ReceivedSegment>,
    unread: usize,
    fin_received: bool,
}

impl Receiver {
    pub fn new(rcv_mss: usize, receive_buffer_size: u32) -> Self {
        Self {
            rcv_irs: SeqNumber::from(0),
            rcv_nxt: SeqNumber::from(0),
            rcv_mss,
            receive_buffer_size,
            recv_queue: VecDeque::new(),
            unread: 0,
            fin_received: false,
        }
    }

    pub fn rcv_irs(&self) -> SeqNumber {
        self.rcv_irs
    }

    pub fn rcv_nxt(&self) -> SeqNumber {
        self.rcv_nxt
    }

    pub fn rcv_mss(&self) -> usize {
        self.rcv_mss
    }

    #[cfg(test)]
    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Synchronizes with the remote's initial sequence number, carried by its SYN.
    pub fn on_syn(&mut self, irs: SeqNumber) {
        self.rcv_irs = irs;
        self.rcv_nxt = irs + 1;
    }

    /// Takes the receive sequence space from a bare ACK answering our SYN.
    pub fn on_bare_ack(&mut self, seq: SeqNumber) {
        self.rcv_irs = seq;
        self.rcv_nxt = seq;
    }

    /// Window to advertise: what is left of the receive buffer.
    pub fn window(&self) -> u16 {
        let free: u32 = self.receive_buffer_size.saturating_sub(self.unread as u32);
        cmp::min(free, MAX_WINDOW) as u16
    }

    /// Accepts the payload of a segment that starts at `seq`. Returns the number of bytes queued for the reader.
    pub fn receive_data(&mut self, seq: SeqNumber, data: &[u8], psh: bool) -> usize {
        let end: SeqNumber = seq + data.len() as u32;
        let data: &[u8] = if seq < self.rcv_nxt {
            // Skip what was already received.
            let duplicate: usize = cmp::min(self.rcv_nxt.distance_from(seq) as usize, data.len());
            &data[duplicate..]
        } else {
            if seq != self.rcv_nxt {
                debug!("receive_data(): gap in sequence space (seq={}, rcv_nxt={})", seq, self.rcv_nxt);
            }
            data
        };
        self.rcv_nxt = self.rcv_nxt.max(end);

        if data.is_empty() {
            trace!("receive_data(): duplicate segment (seq={})", seq);
            return 0;
        }
        self.unread += data.len();
        self.recv_queue.push_back(ReceivedSegment {
            data: data.to_vec(),
            psh,
        });
        data.len()
    }

    /// Accepts a FIN that occupies `fin_seq`.
    pub fn receive_fin(&mut self, fin_seq: SeqNumber) {
        self.rcv_nxt = self.rcv_nxt.max(fin_seq + 1);
        self.fin_received = true;
    }

    /// Whether a read of `size` bytes may complete: enough bytes are queued, some queued segment was pushed, or the
    /// stream has ended.
    pub fn is_readable(&self, size: usize) -> bool {
        self.unread >= size || self.fin_received || self.recv_queue.iter().any(|segment| segment.psh)
    }

    /// Copies out up to `size` bytes in order. A read stops after a pushed segment.
    pub fn pop(&mut self, size: usize) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(cmp::min(size, self.unread));
        while buf.len() < size {
            let segment: &mut ReceivedSegment = match self.recv_queue.front_mut() {
                Some(segment) => segment,
                None => break,
            };
            let nbytes: usize = cmp::min(size - buf.len(), segment.data.len());
            buf.extend(segment.data.drain(..nbytes));
            if !segment.data.is_empty() {
                break;
            }
            let psh: bool = segment.psh;
            self.recv_queue.pop_front();
            if psh {
                break;
            }
        }
        self.unread -= buf.len();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::Receiver;
    use crate::inetstack::protocols::tcp::SeqNumber;
    use ::anyhow::Result;

    fn synchronized(irs: u32) -> Receiver {
        let mut receiver: Receiver = Receiver::new(1460, 1024);
        receiver.on_syn(SeqNumber::from(irs));
        receiver
    }

    #[test]
    fn reads_wait_for_size_or_push() -> Result<()> {
        let mut receiver: Receiver = synchronized(100);
        receiver.receive_data(SeqNumber::from(101), &[1, 2, 3], false);
        crate::ensure_eq!(receiver.is_readable(4), false);
        crate::ensure_eq!(receiver.is_readable(3), true);
        receiver.receive_data(SeqNumber::from(104), &[4, 5], true);
        crate::ensure_eq!(receiver.is_readable(100), true);
        crate::ensure_eq!(receiver.rcv_nxt(), SeqNumber::from(106));

        crate::ensure_eq!(receiver.window(), 1019);
        crate::ensure_eq!(receiver.pop(2), vec![1, 2]);
        crate::ensure_eq!(receiver.pop(100), vec![3, 4, 5]);
        crate::ensure_eq!(receiver.unread(), 0);
        crate::ensure_eq!(receiver.window(), 1024);
        crate::ensure_eq!(receiver.is_readable(1), false);
        Ok(())
    }

    #[test]
    fn segments_are_accepted_as_is() -> Result<()> {
        let mut receiver: Receiver = synchronized(0);

        // A gap is not filled, the data is delivered right away.
        receiver.receive_data(SeqNumber::from(11), &[9; 5], false);
        crate::ensure_eq!(receiver.rcv_nxt(), SeqNumber::from(16));
        crate::ensure_eq!(receiver.unread(), 5);

        // rcv_nxt never moves backwards, and an already received prefix is skipped.
        receiver.receive_data(SeqNumber::from(1), &[1; 4], false);
        crate::ensure_eq!(receiver.rcv_nxt(), SeqNumber::from(16));
        crate::ensure_eq!(receiver.unread(), 5);
        receiver.receive_data(SeqNumber::from(14), &[2; 4], false);
        crate::ensure_eq!(receiver.rcv_nxt(), SeqNumber::from(18));
        crate::ensure_eq!(receiver.unread(), 7);
        Ok(())
    }

    #[test]
    fn fin_ends_the_stream() -> Result<()> {
        let mut receiver: Receiver = synchronized(500);
        receiver.receive_data(SeqNumber::from(501), &[1; 10], false);
        receiver.receive_fin(SeqNumber::from(511));
        crate::ensure_eq!(receiver.rcv_nxt(), SeqNumber::from(512));
        crate::ensure_eq!(receiver.is_readable(1000), true);
        crate::ensure_eq!(receiver.pop(1000).len(), 10);
        crate::ensure_eq!(receiver.pop(1000).is_empty(), true);
        Ok(())
    }

    #[test]
    fn window_shrinks_with_unread_data() -> Result<()> {
        let mut receiver: Receiver = synchronized(0);
        receiver.receive_data(SeqNumber::from(1), &[0; 2000], false);
        crate::ensure_eq!(receiver.window(), 0);
        receiver.pop(1500);
        crate::ensure_eq!(receiver.window(), 524);
        Ok(())
    }
}
