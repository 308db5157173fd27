// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::{
        ethernet2::{
            EtherType2,
            Ethernet2Header,
        },
        ip::IpProtocol,
        ipv4::Ipv4Header,
        tcp::{
            congestion_control::CongestionControlConstructor,
            receiver::Receiver,
            segment::{
                TcpHeader,
                TcpOption,
                TcpSegment,
            },
            sender::{
                AckOutcome,
                Sender,
            },
            state::{
                Event,
                State,
            },
            timers::{
                TimerKey,
                TimerKind,
                Timers,
            },
            SeqNumber,
        },
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            consts::{
                FALLBACK_MSS,
                MAX_MSS,
                MIN_MSS,
            },
            types::MacAddress,
            NetworkRuntime,
        },
        timer::SharedTimer,
        QDesc,
        SharedConditionVariable,
        SharedObject,
    },
};
use ::libc::{
    EBADMSG,
    ECONNREFUSED,
    ECONNRESET,
    ENOTCONN,
    ESHUTDOWN,
};
use ::std::{
    net::SocketAddrV4,
    ops::{
        Deref,
        DerefMut,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Transmission control block for representing our TCP connection.
pub struct ControlBlock<N: NetworkRuntime> {
    local: SocketAddrV4,
    remote: SocketAddrV4,

    transport: N,
    local_link_addr: MacAddress,
    tcp_config: TcpConfig,

    state: State,

    sender: Sender,
    receiver: Receiver,
    timers: Timers,

    // Times the SYN had to be retransmitted.
    syn_retries: u32,

    // Why the connection went down, if it did not close gracefully.
    error: Option<Fail>,

    // Signalled whenever the connection makes progress.
    cond_var: SharedConditionVariable,
}

#[derive(Clone)]
pub struct SharedControlBlock<N: NetworkRuntime>(SharedObject<ControlBlock<N>>);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<N: NetworkRuntime> SharedControlBlock<N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        qd: QDesc,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        transport: N,
        local_link_addr: MacAddress,
        tcp_config: TcpConfig,
        clock: SharedTimer<TimerKey>,
        iss: SeqNumber,
        cc_constructor: CongestionControlConstructor,
    ) -> Self {
        let rcv_mss: usize = tcp_config.get_advertised_mss();
        let receive_buffer_size: u32 = tcp_config.get_receive_window_size() as u32;
        Self(SharedObject::<ControlBlock<N>>::new(ControlBlock {
            local,
            remote,
            transport,
            local_link_addr,
            tcp_config,
            state: State::Closed,
            sender: Sender::new(iss, rcv_mss, cc_constructor),
            receiver: Receiver::new(rcv_mss, receive_buffer_size),
            timers: Timers::new(qd, clock),
            syn_retries: 0,
            error: None,
            cond_var: SharedConditionVariable::default(),
        }))
    }
}

impl<N: NetworkRuntime> ControlBlock<N> {
    pub fn get_local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn get_remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    #[cfg(test)]
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    #[cfg(test)]
    pub fn syn_retries(&self) -> u32 {
        self.syn_retries
    }

    pub fn error(&self) -> Option<Fail> {
        self.error.clone()
    }

    pub fn cond_var(&self) -> SharedConditionVariable {
        self.cond_var.clone()
    }

    /// Wakes every future waiting on this connection.
    pub fn wake_waiters(&mut self) {
        self.cond_var.broadcast();
    }

    /// Starts an active open by sending the SYN.
    pub fn connect(&mut self) -> Result<(), Fail> {
        self.transition(Event::Connect)?;
        let index: usize = self.sender.queue_syn();
        self.transmit(index);
        let rto: Duration = self.sender.rto();
        self.timers.arm(TimerKind::Retransmit, rto);
        Ok(())
    }

    /// Appends a write to the send buffer and pushes out what the window allows. Returns the stream offset at which
    /// the write ends.
    pub fn push(&mut self, buf: &[u8]) -> Result<u64, Fail> {
        if !matches!(self.state, State::Established | State::CloseWait) || self.sender.is_fin_requested() {
            let cause: String = format!("cannot send in state {}", self.state);
            warn!("push(): {}", cause);
            return Err(Fail::new(ESHUTDOWN, &cause));
        }
        let write_end: u64 = self.sender.push(buf);
        self.flush();
        Ok(write_end)
    }

    /// Copies out up to `size` received bytes, and reopens the window if it had closed.
    pub fn pop(&mut self, size: usize) -> Vec<u8> {
        let window_was_closed: bool = self.receiver.window() == 0;
        let buf: Vec<u8> = self.receiver.pop(size);
        if window_was_closed && self.receiver.window() > 0 && self.state.is_synchronized() {
            trace!("pop(): window update");
            self.send_ack();
        }
        buf
    }

    /// Asks for our side of the connection to be closed. The FIN goes out once all pending data has been sent.
    pub fn close(&mut self) -> Result<(), Fail> {
        match self.state {
            State::Established | State::CloseWait => {
                self.sender.request_fin();
                self.flush();
                Ok(())
            },
            state if state.has_sent_fin() => Ok(()),
            state => {
                let cause: String = format!("cannot shut down in state {}", state);
                warn!("close(): {}", cause);
                Err(Fail::new(ESHUTDOWN, &cause))
            },
        }
    }

    /// Processes an inbound segment for this connection.
    pub fn receive(&mut self, header: &TcpHeader, data: &[u8]) -> Result<(), Fail> {
        debug!(
            "receive(): {} <- {} state={} {} bytes + {:?}",
            self.local,
            self.remote,
            self.state,
            data.len(),
            header
        );
        match self.state {
            State::SynSent => self.receive_syn_sent(header),
            State::Closed | State::Listen => {
                let cause: String = format!("no connection in state {}", self.state);
                debug!("receive(): {}", cause);
                Err(Fail::new(ENOTCONN, &cause))
            },
            _ => self.receive_synchronized(header, data),
        }
    }

    /// Runs the timer `kind` that expired at `expiry`. Stale expirations are ignored.
    pub fn on_timer(&mut self, kind: TimerKind, expiry: Instant) -> Result<(), Fail> {
        if !self.timers.expire(kind, expiry) {
            trace!("on_timer(): stale {:?} timer", kind);
            return Ok(());
        }
        match kind {
            TimerKind::Retransmit => {
                self.on_retransmit_timeout();
                Ok(())
            },
            TimerKind::Persist => {
                self.on_persist_timeout();
                Ok(())
            },
            TimerKind::MslWait => self.transition(Event::MslTimeout),
        }
    }

    fn receive_syn_sent(&mut self, header: &TcpHeader) -> Result<(), Fail> {
        if header.ack && !header.ack_num.is_between(self.sender.snd_una(), self.sender.snd_nxt()) {
            if !header.rst {
                self.send_rst(header.ack_num);
            }
            let cause: String = format!("unacceptable ack in SYN_SENT (ack={})", header.ack_num);
            warn!("receive_syn_sent(): {}", cause);
            return Err(Fail::new(EBADMSG, &cause));
        }

        if header.rst {
            info!("connection refused by remote ({} -> {})", self.local, self.remote);
            self.error = Some(Fail::new(ECONNREFUSED, "connection refused"));
            return self.transition(Event::Reset);
        }

        if !header.ack {
            // Simultaneous open and stray segments are not supported.
            let cause: &str = "segment without ACK in SYN_SENT";
            debug!("receive_syn_sent(): {}", cause);
            return Err(Fail::new(EBADMSG, cause));
        }

        let snd_mss: usize = header
            .get_mss()
            .map_or(FALLBACK_MSS, |mss| (mss as usize).clamp(MIN_MSS, MAX_MSS));
        if header.syn {
            self.receiver.on_syn(header.seq_num);
            self.process_ack(header)?;
            self.transition(Event::SynAck)?;
            self.send_ack();
        } else {
            self.receiver.on_bare_ack(header.seq_num);
            self.process_ack(header)?;
        }
        self.transition(Event::Ack)?;
        self.sender.on_established(snd_mss, self.syn_retries > 0);
        info!(
            "connection established ({} -> {}, irs={})",
            self.local,
            self.remote,
            self.receiver.rcv_irs()
        );
        self.flush();
        Ok(())
    }

    fn receive_synchronized(&mut self, header: &TcpHeader, data: &[u8]) -> Result<(), Fail> {
        if header.rst {
            info!("connection reset by remote ({} -> {})", self.local, self.remote);
            self.error = Some(Fail::new(ECONNRESET, "connection reset by peer"));
            return self.transition(Event::Reset);
        }

        if header.syn {
            // Most likely a retransmitted SYN+ACK whose ACK got lost.
            trace!("receive_synchronized(): re-acknowledging SYN");
            self.send_ack();
            return Ok(());
        }

        if !header.ack {
            let cause: &str = "segment without ACK on synchronized connection";
            warn!("receive_synchronized(): {}", cause);
            return Err(Fail::new(EBADMSG, cause));
        }

        if header.ack_num > self.sender.snd_nxt() {
            let cause: String = format!("ack for data not yet sent (ack={})", header.ack_num);
            warn!("receive_synchronized(): {}", cause);
            self.send_ack();
            return Err(Fail::new(EBADMSG, &cause));
        }
        self.process_ack(header)?;

        let mut need_ack: bool = false;
        if !data.is_empty() {
            if self.state.accepts_data() {
                self.receiver.receive_data(header.seq_num, data, header.psh);
            } else {
                warn!("receive_synchronized(): ignoring data received in state {}", self.state);
            }
            need_ack = true;
        }

        if header.fin {
            if self.state.has_received_fin() {
                trace!("receive_synchronized(): duplicate FIN");
            } else if self.state.accepts_data() {
                self.receiver.receive_fin(header.seq_num + data.len() as u32);
                self.transition(Event::Fin)?;
            }
            need_ack = true;
        }

        if need_ack {
            self.send_ack();
        }
        self.flush();
        Ok(())
    }

    fn process_ack(&mut self, header: &TcpHeader) -> Result<(), Fail> {
        let now: Instant = self.timers.now();
        let outcome: AckOutcome = self.sender.process_ack(header.ack_num, header.window_size, now);

        if outcome.advanced {
            if self.sender.queue_len() == 0 {
                self.timers.disarm(TimerKind::Retransmit);
            } else if !self.timers.is_armed(TimerKind::Persist) {
                let rto: Duration = self.sender.rto();
                self.timers.arm(TimerKind::Retransmit, rto);
            }
        }

        if self.sender.snd_wnd() > 0 && self.timers.is_armed(TimerKind::Persist) {
            debug!("process_ack(): window reopened ({} bytes)", self.sender.snd_wnd());
            self.timers.disarm(TimerKind::Persist);
            self.timers.reset_persist_backoff();
            if self.sender.queue_len() > 0 {
                let rto: Duration = self.sender.rto();
                self.timers.arm(TimerKind::Retransmit, rto);
            }
        }

        if outcome.fin_acked {
            self.transition(Event::FinAcked)?;
        }
        Ok(())
    }

    /// Sends whatever the usable window allows: pending retransmissions first, then new segments and the FIN.
    pub fn flush(&mut self) {
        if !self.state.is_synchronized() {
            return;
        }
        let can_send_new: bool = matches!(self.state, State::Established | State::CloseWait);
        let mut budget: usize = self.sender.usable_window() as usize;

        loop {
            if let Some(index) = self.sender.next_to_send() {
                let len: usize = self.sender.segment(index).map_or(0, |segment| segment.data.len());
                if len > budget {
                    break;
                }
                budget -= len;
                self.transmit(index);
                continue;
            }
            if !can_send_new {
                break;
            }
            if let Some(index) = self.sender.segment_pending(budget) {
                budget -= self.sender.segment(index).map_or(0, |segment| segment.data.len());
                self.transmit(index);
                continue;
            }
            if let Some(index) = self.sender.queue_fin() {
                self.transmit(index);
                if let Err(e) = self.transition(Event::SendFin) {
                    warn!("flush(): {:?}", e);
                }
            }
            break;
        }

        // Zero window probe.
        if can_send_new
            && budget == 0
            && self.sender.snd_wnd() == 0
            && self.sender.queue_len() == 0
            && self.sender.has_pending_data()
            && !self.timers.is_armed(TimerKind::Persist)
        {
            if let Some(index) = self.sender.segment_pending(1) {
                debug!("flush(): zero window, sending probe");
                self.transmit(index);
                let backoff: Duration = self.timers.persist_backoff();
                self.timers.arm(TimerKind::Persist, backoff);
            }
        }

        if self.sender.queue_len() > 0
            && !self.timers.is_armed(TimerKind::Retransmit)
            && !self.timers.is_armed(TimerKind::Persist)
        {
            let rto: Duration = self.sender.rto();
            self.timers.arm(TimerKind::Retransmit, rto);
        }
    }

    fn on_retransmit_timeout(&mut self) {
        match self.sender.on_retransmit_timeout() {
            Some(is_syn) => {
                if is_syn {
                    self.syn_retries += 1;
                }
                debug!(
                    "on_retransmit_timeout(): resending {} (rto={:?})",
                    self.sender.snd_una(),
                    self.sender.rto()
                );
                self.transmit(0);
                let rto: Duration = self.sender.rto();
                self.timers.arm(TimerKind::Retransmit, rto);
            },
            None => trace!("on_retransmit_timeout(): nothing outstanding"),
        }
    }

    fn on_persist_timeout(&mut self) {
        if self.sender.snd_wnd() != 0 {
            self.timers.reset_persist_backoff();
            if self.sender.queue_len() > 0 {
                let rto: Duration = self.sender.rto();
                self.timers.arm(TimerKind::Retransmit, rto);
            }
            return;
        }

        self.timers.back_off_persist();
        let backoff: Duration = self.timers.persist_backoff();
        self.timers.arm(TimerKind::Persist, backoff);

        let probe: Option<usize> = match self.sender.mark_head_retransmitted() {
            Some(index) => Some(index),
            None => self.sender.segment_pending(1),
        };
        match probe {
            Some(index) => {
                debug!("on_persist_timeout(): probing (backoff={:?})", backoff);
                self.transmit(index);
            },
            None => trace!("on_persist_timeout(): nothing to probe with"),
        }
    }

    /// Moves the connection along `event`, running the side effects of the state it lands in.
    fn transition(&mut self, event: Event) -> Result<(), Fail> {
        let next: State = self.state.on_event(event)?;
        self.state = next;
        match next {
            State::TimeWait | State::LastAck => {
                let msl_wait: Duration = self.tcp_config.get_msl_wait();
                self.timers.arm(TimerKind::MslWait, msl_wait);
            },
            State::Closed => {
                self.timers.cancel_all();
                self.sender.clear();
            },
            _ => {},
        }
        Ok(())
    }

    /// Header with the fields every outbound segment shares.
    fn tcp_header(&self) -> TcpHeader {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.window_size = self.receiver.window();

        // Once we reach a synchronized state we always include a valid acknowledgement number.
        if self.state.is_synchronized() {
            header.ack = true;
            header.ack_num = self.receiver.rcv_nxt();
        }
        header
    }

    /// Sends the queued segment at `index`.
    fn transmit(&mut self, index: usize) {
        let (header, data): (TcpHeader, Vec<u8>) = match self.sender.segment(index) {
            Some(segment) => {
                let mut header: TcpHeader = self.tcp_header();
                header.seq_num = segment.seq;
                header.syn = segment.syn;
                header.fin = segment.fin;
                header.psh = segment.psh;
                if segment.syn {
                    header.push_option(TcpOption::MaximumSegmentSize(self.receiver.rcv_mss() as u16));
                    header.push_option(TcpOption::NoOperation);
                }
                (header, segment.data.clone())
            },
            None => {
                warn!("transmit(): no segment at index {}", index);
                return;
            },
        };
        let now: Instant = self.timers.now();
        self.sender.mark_sent(index, now);
        self.emit(header, data);
    }

    /// Sends an ACK to our peer, reflecting our current state.
    fn send_ack(&mut self) {
        let mut header: TcpHeader = self.tcp_header();
        header.seq_num = self.sender.snd_nxt();
        self.emit(header, Vec::new());
    }

    /// Sends a RST that the remote will accept for its sequence number `seq`.
    fn send_rst(&mut self, seq: SeqNumber) {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.rst = true;
        header.seq_num = seq;
        self.emit(header, Vec::new());
    }

    /// Transmits this message to our connected peer.
    fn emit(&mut self, header: TcpHeader, data: Vec<u8>) {
        let remote_link_addr: MacAddress = match self.transport.resolve_link_addr(*self.remote.ip()) {
            Some(link_addr) => link_addr,
            None => {
                warn!("emit(): no link address for {}, dropping segment", self.remote.ip());
                return;
            },
        };
        debug!("emit(): sending {} bytes + {:?}", data.len(), header);

        let segment: TcpSegment = TcpSegment {
            ethernet2_hdr: Ethernet2Header::new(remote_link_addr, self.local_link_addr, EtherType2::Ipv4),
            ipv4_hdr: Ipv4Header::new(*self.local.ip(), *self.remote.ip(), IpProtocol::TCP),
            tcp_hdr: header,
            data: if data.is_empty() { None } else { Some(data) },
            tx_checksum_offload: self.tcp_config.get_tx_checksum_offload(),
        };
        self.transport.transmit(Box::new(segment));
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<N: NetworkRuntime> Deref for SharedControlBlock<N> {
    type Target = ControlBlock<N>;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<N: NetworkRuntime> DerefMut for SharedControlBlock<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
