// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    inetstack::protocols::{
        ethernet2::{
            EtherType2,
            Ethernet2Header,
        },
        ip::IpProtocol,
        ipv4::Ipv4Header,
        tcp::{
            congestion_control::{
                self,
                CongestionControlConstructor,
            },
            ctrlblk::SharedControlBlock,
            isn_generator::IsnGenerator,
            segment::{
                TcpHeader,
                TcpSegment,
            },
            state::State,
            timers::TimerKey,
            SeqNumber,
        },
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            ephemeral::EphemeralPorts,
            types::MacAddress,
            NetworkRuntime,
        },
        timer::SharedTimer,
        QDesc,
        SharedObject,
    },
};
use ::libc::{
    EADDRINUSE,
    EADDRNOTAVAIL,
    EBADF,
    EBUSY,
    ECONNREFUSED,
    EINVAL,
    EISCONN,
    ENOTCONN,
    ENOTSUP,
    ESHUTDOWN,
};
use ::rand::{
    prelude::SmallRng,
    Rng,
    SeedableRng,
};
use ::slab::Slab;
use ::std::{
    collections::HashMap,
    future::Future,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    ops::{
        Deref,
        DerefMut,
    },
    time::Instant,
};

//==============================================================================
// Structures
//==============================================================================

enum Socket<N: NetworkRuntime> {
    Unbound,
    Bound(SocketAddrV4),
    /// Stays in place once the connection closes, so that the application can still drain what it received. The
    /// entry goes away on close.
    Connected(SharedControlBlock<N>),
}

pub struct TcpPeer<N: NetworkRuntime> {
    transport: N,
    local_link_addr: MacAddress,
    local_ipv4_addr: Ipv4Addr,
    tcp_config: TcpConfig,
    cc_constructor: CongestionControlConstructor,
    clock: SharedTimer<TimerKey>,
    isn_generator: IsnGenerator,
    ephemeral_ports: EphemeralPorts,
    sockets: Slab<Socket<N>>,
    // Live connections, by (local, remote) endpoints.
    established: HashMap<(SocketAddrV4, SocketAddrV4), QDesc>,
}

#[derive(Clone)]
pub struct SharedTcpPeer<N: NetworkRuntime>(SharedObject<TcpPeer<N>>);

//==============================================================================
// Associated Functions
//==============================================================================

impl<N: NetworkRuntime> SharedTcpPeer<N> {
    pub fn new(
        tcp_config: TcpConfig,
        transport: N,
        local_link_addr: MacAddress,
        local_ipv4_addr: Ipv4Addr,
        now: Instant,
        rng_seed: [u8; 32],
    ) -> Self {
        let mut rng: SmallRng = SmallRng::from_seed(rng_seed);
        let ephemeral_ports: EphemeralPorts = EphemeralPorts::new(rng.gen());
        let nonce: u32 = rng.gen();
        let cc_constructor: CongestionControlConstructor =
            congestion_control::constructor_for(tcp_config.get_congestion_control());
        Self(SharedObject::<TcpPeer<N>>::new(TcpPeer {
            transport,
            local_link_addr,
            local_ipv4_addr,
            tcp_config,
            cc_constructor,
            clock: SharedTimer::new(now),
            isn_generator: IsnGenerator::new(nonce),
            ephemeral_ports,
            sockets: Slab::new(),
            established: HashMap::new(),
        }))
    }

    /// Opens a new, unbound socket.
    pub fn socket(&mut self) -> Result<QDesc, Fail> {
        let qd: QDesc = QDesc::from(self.sockets.insert(Socket::Unbound));
        trace!("socket(): qd={}", qd);
        Ok(qd)
    }

    pub fn bind(&mut self, qd: QDesc, addr: SocketAddrV4) -> Result<(), Fail> {
        self.do_bind(qd, addr)
    }

    pub fn listen(&mut self, qd: QDesc, backlog: usize) -> Result<(), Fail> {
        let cause: String = format!("passive open is not supported (qd={}, backlog={})", qd, backlog);
        warn!("listen(): {}", cause);
        Err(Fail::new(ENOTSUP, &cause))
    }

    pub fn accept(&mut self, qd: QDesc) -> Result<QDesc, Fail> {
        let cause: String = format!("passive open is not supported (qd={})", qd);
        warn!("accept(): {}", cause);
        Err(Fail::new(ENOTSUP, &cause))
    }

    /// Sends a SYN to `remote`. The returned future completes once the connection is established, or fails if the
    /// remote refused it.
    pub fn connect(
        &mut self,
        qd: QDesc,
        remote: SocketAddrV4,
    ) -> Result<impl Future<Output = Result<(), Fail>>, Fail> {
        let cb: SharedControlBlock<N> = self.do_connect(qd, remote, None)?;
        Ok(Self::connect_coroutine(cb))
    }

    /// Same as [SharedTcpPeer::connect], with a caller-chosen initial sequence number.
    pub fn connect_with_iss(
        &mut self,
        qd: QDesc,
        remote: SocketAddrV4,
        iss: SeqNumber,
    ) -> Result<impl Future<Output = Result<(), Fail>>, Fail> {
        let cb: SharedControlBlock<N> = self.do_connect(qd, remote, Some(iss))?;
        Ok(Self::connect_coroutine(cb))
    }

    /// Queues `buf` for transmission. The returned future completes once every byte of it has been placed in a
    /// segment, not when the remote acknowledges it.
    pub fn sendmsg(&mut self, qd: QDesc, buf: &[u8]) -> Result<impl Future<Output = Result<(), Fail>>, Fail> {
        let mut cb: SharedControlBlock<N> = self.get_control_block(qd)?;
        let write_end: u64 = cb.push(buf)?;
        Ok(async move {
            loop {
                if cb.sender().bytes_segmented() >= write_end {
                    return Ok(());
                }
                if cb.state() == State::Closed {
                    return Err(cb
                        .error()
                        .unwrap_or_else(|| Fail::new(ESHUTDOWN, "connection closed")));
                }
                cb.cond_var().wait().await;
            }
        })
    }

    /// Reads up to `size` bytes. The returned future completes once `size` bytes are available, a pushed segment
    /// arrived, or the stream ended. An empty buffer means end of stream.
    pub fn recvmsg(&mut self, qd: QDesc, size: usize) -> Result<impl Future<Output = Result<Vec<u8>, Fail>>, Fail> {
        if size == 0 {
            let cause: &str = "cannot read zero bytes";
            warn!("recvmsg(): {}", cause);
            return Err(Fail::new(EINVAL, cause));
        }
        let mut cb: SharedControlBlock<N> = self.get_control_block(qd)?;
        Ok(async move {
            loop {
                let closed: bool = cb.state() == State::Closed;
                if cb.receiver().is_readable(size) || closed {
                    let buf: Vec<u8> = cb.pop(size);
                    if buf.is_empty() && closed {
                        return Err(cb
                            .error()
                            .unwrap_or_else(|| Fail::new(ESHUTDOWN, "connection closed")));
                    }
                    return Ok(buf);
                }
                cb.cond_var().wait().await;
            }
        })
    }

    /// Closes our side of the connection. The returned future completes once the connection reaches CLOSED.
    pub fn shutdown(&mut self, qd: QDesc) -> Result<impl Future<Output = Result<(), Fail>>, Fail> {
        let mut cb: SharedControlBlock<N> = self.get_control_block(qd)?;
        cb.close()?;
        self.post_process(cb.clone());
        Ok(async move {
            while cb.state() != State::Closed {
                cb.cond_var().wait().await;
            }
            Ok(())
        })
    }

    /// Releases a socket. A connected socket can only be released once its connection has reached CLOSED.
    pub fn close(&mut self, qd: QDesc) -> Result<(), Fail> {
        self.do_close(qd)
    }

    /// Handles an inbound IPv4 datagram that carries a TCP segment. Malformed segments are dropped and reported.
    pub fn receive(&mut self, ipv4_hdr: &Ipv4Header, buf: &[u8]) -> Result<(), Fail> {
        self.do_receive(ipv4_hdr, buf)
    }

    /// Handles an inbound Ethernet frame.
    pub fn receive_frame(&mut self, frame: &[u8]) -> Result<(), Fail> {
        let (eth_hdr, payload): (Ethernet2Header, &[u8]) = Ethernet2Header::parse(frame)?;
        if eth_hdr.ether_type() != EtherType2::Ipv4 {
            let cause: String = format!("unsupported ether type {:?}", eth_hdr.ether_type());
            debug!("receive_frame(): {}", cause);
            return Err(Fail::new(ENOTSUP, &cause));
        }
        if eth_hdr.dst_addr() != self.local_link_addr && eth_hdr.dst_addr() != MacAddress::broadcast() {
            let cause: &str = "frame not addressed to us";
            debug!("receive_frame(): {}", cause);
            return Err(Fail::new(EINVAL, cause));
        }
        let (ipv4_hdr, payload): (Ipv4Header, &[u8]) = Ipv4Header::parse(payload)?;
        self.do_receive(&ipv4_hdr, payload)
    }

    /// Moves the clock to `now` and runs every timer that expired on the way.
    pub fn advance_clock(&mut self, now: Instant) {
        let expired: Vec<(Instant, TimerKey)> = self.clock.advance_clock(now);
        for (expiry, (qd, kind)) in expired {
            let mut cb: SharedControlBlock<N> = match self.sockets.get(usize::from(qd)) {
                Some(Socket::Connected(cb)) => cb.clone(),
                _ => continue,
            };
            if let Err(e) = cb.on_timer(kind, expiry) {
                warn!("advance_clock(): {:?} timer of qd={} failed ({:?})", kind, qd, e);
            }
            self.post_process(cb);
        }
    }

    pub fn state(&self, qd: QDesc) -> Result<State, Fail> {
        match self.sockets.get(usize::from(qd)) {
            Some(Socket::Unbound) | Some(Socket::Bound(_)) => Ok(State::Closed),
            Some(Socket::Connected(cb)) => Ok(cb.state()),
            None => Err(Fail::new(EBADF, "bad queue descriptor")),
        }
    }

    pub fn endpoints(&self, qd: QDesc) -> Result<(SocketAddrV4, SocketAddrV4), Fail> {
        match self.sockets.get(usize::from(qd)) {
            Some(Socket::Connected(cb)) => Ok((cb.get_local(), cb.get_remote())),
            Some(_) => Err(Fail::new(ENOTCONN, "socket is not connected")),
            None => Err(Fail::new(EBADF, "bad queue descriptor")),
        }
    }

    pub fn local_ipv4_addr(&self) -> Ipv4Addr {
        self.local_ipv4_addr
    }

    async fn connect_coroutine(cb: SharedControlBlock<N>) -> Result<(), Fail> {
        loop {
            match cb.state() {
                State::SynSent | State::SynReceived => {},
                State::Closed => {
                    return Err(cb
                        .error()
                        .unwrap_or_else(|| Fail::new(ECONNREFUSED, "connection refused")))
                },
                _ => return Ok(()),
            }
            cb.cond_var().wait().await;
        }
    }
}

impl<N: NetworkRuntime> TcpPeer<N> {
    /// Returns the control block of a connected socket.
    pub fn get_control_block(&self, qd: QDesc) -> Result<SharedControlBlock<N>, Fail> {
        match self.sockets.get(usize::from(qd)) {
            Some(Socket::Connected(cb)) => Ok(cb.clone()),
            Some(_) => {
                let cause: String = format!("socket is not connected (qd={})", qd);
                warn!("get_control_block(): {}", cause);
                Err(Fail::new(ESHUTDOWN, &cause))
            },
            None => Err(Fail::new(EBADF, "bad queue descriptor")),
        }
    }

    fn do_bind(&mut self, qd: QDesc, addr: SocketAddrV4) -> Result<(), Fail> {
        if !addr.ip().is_unspecified() && *addr.ip() != self.local_ipv4_addr {
            let cause: String = format!("cannot bind to non-local address {}", addr.ip());
            warn!("bind(): {}", cause);
            return Err(Fail::new(EADDRNOTAVAIL, &cause));
        }
        match self.sockets.get(usize::from(qd)) {
            Some(Socket::Unbound) => {},
            Some(_) => {
                let cause: String = format!("socket is already bound (qd={})", qd);
                warn!("bind(): {}", cause);
                return Err(Fail::new(EINVAL, &cause));
            },
            None => return Err(Fail::new(EBADF, "bad queue descriptor")),
        }

        let port: u16 = if addr.port() == 0 {
            self.ephemeral_ports.alloc()?
        } else {
            let local: SocketAddrV4 = SocketAddrV4::new(self.local_ipv4_addr, addr.port());
            if self.is_addr_in_use(local) {
                let cause: String = format!("address is already in use ({})", local);
                warn!("bind(): {}", cause);
                return Err(Fail::new(EADDRINUSE, &cause));
            }
            if EphemeralPorts::is_private(addr.port()) {
                self.ephemeral_ports.reserve(addr.port())?;
            }
            addr.port()
        };

        let local: SocketAddrV4 = SocketAddrV4::new(self.local_ipv4_addr, port);
        debug!("bind(): qd={} local={}", qd, local);
        self.sockets[usize::from(qd)] = Socket::Bound(local);
        Ok(())
    }

    fn is_addr_in_use(&self, addr: SocketAddrV4) -> bool {
        self.sockets.iter().any(|(_, socket)| match socket {
            Socket::Unbound => false,
            Socket::Bound(local) => *local == addr,
            Socket::Connected(cb) => cb.get_local() == addr && cb.state() != State::Closed,
        })
    }

    fn do_connect(
        &mut self,
        qd: QDesc,
        remote: SocketAddrV4,
        iss: Option<SeqNumber>,
    ) -> Result<SharedControlBlock<N>, Fail> {
        let bound: Option<SocketAddrV4> = match self.sockets.get(usize::from(qd)) {
            Some(Socket::Unbound) => None,
            Some(Socket::Bound(local)) => Some(*local),
            Some(Socket::Connected(_)) => {
                let cause: String = format!("socket is already connected (qd={})", qd);
                warn!("connect(): {}", cause);
                return Err(Fail::new(EISCONN, &cause));
            },
            None => return Err(Fail::new(EBADF, "bad queue descriptor")),
        };
        if remote.ip().is_unspecified() || remote.ip().is_broadcast() || remote.ip().is_multicast() {
            let cause: String = format!("invalid remote address {}", remote);
            warn!("connect(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        let local: SocketAddrV4 = match bound {
            Some(local) => local,
            None => SocketAddrV4::new(self.local_ipv4_addr, self.ephemeral_ports.alloc()?),
        };
        if self.established.contains_key(&(local, remote)) {
            let cause: String = format!("connection already exists ({} -> {})", local, remote);
            warn!("connect(): {}", cause);
            if bound.is_none() {
                self.release_port(local.port());
            }
            return Err(Fail::new(EADDRINUSE, &cause));
        }

        let iss: SeqNumber = iss.unwrap_or_else(|| self.isn_generator.generate(&local, &remote));
        let mut cb: SharedControlBlock<N> = SharedControlBlock::new(
            qd,
            local,
            remote,
            self.transport.clone(),
            self.local_link_addr,
            self.tcp_config.clone(),
            self.clock.clone(),
            iss,
            self.cc_constructor,
        );
        cb.connect()?;
        info!("connect(): qd={} {} -> {} iss={}", qd, local, remote, iss);

        self.sockets[usize::from(qd)] = Socket::Connected(cb.clone());
        self.established.insert((local, remote), qd);
        Ok(cb)
    }

    fn do_close(&mut self, qd: QDesc) -> Result<(), Fail> {
        let port: Option<u16> = match self.sockets.get(usize::from(qd)) {
            Some(Socket::Unbound) => None,
            Some(Socket::Bound(local)) => Some(local.port()),
            // The port of a connection is given back when the connection closes.
            Some(Socket::Connected(cb)) if cb.state() == State::Closed => None,
            Some(Socket::Connected(cb)) => {
                let cause: String = format!("connection is still open (qd={}, state={})", qd, cb.state());
                warn!("close(): {}", cause);
                return Err(Fail::new(EBUSY, &cause));
            },
            None => return Err(Fail::new(EBADF, "bad queue descriptor")),
        };
        if let Some(port) = port {
            self.release_port(port);
        }
        self.sockets.remove(usize::from(qd));
        trace!("close(): qd={}", qd);
        Ok(())
    }

    /// Gives a port back to the ephemeral pool, if it came from there.
    fn release_port(&mut self, port: u16) {
        if EphemeralPorts::is_private(port) {
            if let Err(e) = self.ephemeral_ports.free(port) {
                warn!("release_port(): {:?}", e);
            }
        }
    }

    fn do_receive(&mut self, ipv4_hdr: &Ipv4Header, buf: &[u8]) -> Result<(), Fail> {
        if ipv4_hdr.get_protocol() != IpProtocol::TCP {
            let cause: String = format!("not a TCP datagram ({:?})", ipv4_hdr.get_protocol());
            debug!("receive(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        let (tcp_hdr, data): (TcpHeader, &[u8]) =
            match TcpHeader::parse(ipv4_hdr, buf, self.tcp_config.get_rx_checksum_offload()) {
                Ok(result) => result,
                Err(e) => {
                    warn!("receive(): dropping malformed segment ({:?})", e);
                    return Err(e);
                },
            };

        let local: SocketAddrV4 = SocketAddrV4::new(ipv4_hdr.get_dest_addr(), tcp_hdr.dst_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(ipv4_hdr.get_src_addr(), tcp_hdr.src_port);
        if *local.ip() != self.local_ipv4_addr {
            let cause: String = format!("segment not addressed to us ({})", local);
            debug!("receive(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        if remote.ip().is_broadcast() || remote.ip().is_multicast() || remote.ip().is_unspecified() {
            return Err(Fail::new(EINVAL, "invalid address type"));
        }

        let qd: QDesc = match self.established.get(&(local, remote)) {
            Some(qd) => *qd,
            None => {
                debug!("receive(): no connection for {} -> {}", remote, local);
                if !tcp_hdr.rst {
                    self.send_rst(local, remote, &tcp_hdr, data.len());
                }
                return Ok(());
            },
        };
        let mut cb: SharedControlBlock<N> = self.get_control_block(qd)?;
        if let Err(e) = cb.receive(&tcp_hdr, data) {
            debug!("receive(): dropped segment ({:?})", e);
        }
        self.post_process(cb);
        Ok(())
    }

    /// Answers a segment that belongs to no connection.
    fn send_rst(&mut self, local: SocketAddrV4, remote: SocketAddrV4, header: &TcpHeader, data_len: usize) {
        let remote_link_addr: MacAddress = match self.transport.resolve_link_addr(*remote.ip()) {
            Some(link_addr) => link_addr,
            None => {
                warn!("send_rst(): no link address for {}", remote.ip());
                return;
            },
        };

        let mut tcp_hdr: TcpHeader = TcpHeader::new(local.port(), remote.port());
        tcp_hdr.rst = true;
        if header.ack {
            tcp_hdr.seq_num = header.ack_num;
        } else {
            let seg_len: u32 = data_len as u32 + header.syn as u32 + header.fin as u32;
            tcp_hdr.ack = true;
            tcp_hdr.ack_num = header.seq_num + seg_len;
        }

        let segment: TcpSegment = TcpSegment {
            ethernet2_hdr: Ethernet2Header::new(remote_link_addr, self.local_link_addr, EtherType2::Ipv4),
            ipv4_hdr: Ipv4Header::new(*local.ip(), *remote.ip(), IpProtocol::TCP),
            tcp_hdr,
            data: None,
            tx_checksum_offload: self.tcp_config.get_tx_checksum_offload(),
        };
        self.transport.transmit(Box::new(segment));
    }

    /// Wakes the waiters of a connection that made progress, and releases it once it is closed.
    fn post_process(&mut self, mut cb: SharedControlBlock<N>) {
        if cb.state() == State::Closed {
            let key: (SocketAddrV4, SocketAddrV4) = (cb.get_local(), cb.get_remote());
            if let Some(qd) = self.established.remove(&key) {
                info!("connection released (qd={}, {} -> {})", qd, key.0, key.1);
                self.release_port(key.0.port());
            }
        }
        cb.wake_waiters();
    }

    #[cfg(test)]
    pub fn num_connections(&self) -> usize {
        self.established.len()
    }

    #[cfg(test)]
    pub fn num_sockets(&self) -> usize {
        self.sockets.len()
    }

    #[cfg(test)]
    pub fn num_free_ports(&self) -> usize {
        self.ephemeral_ports.num_free()
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<N: NetworkRuntime> Deref for SharedTcpPeer<N> {
    type Target = TcpPeer<N>;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<N: NetworkRuntime> DerefMut for SharedTcpPeer<N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
