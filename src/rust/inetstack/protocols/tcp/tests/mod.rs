// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod transfer;

use crate::{
    inetstack::{
        protocols::{
            ethernet2::{
                EtherType2,
                Ethernet2Header,
            },
            ip::IpProtocol,
            ipv4::Ipv4Header,
            tcp::{
                segment::{
                    TcpHeader,
                    TcpOption,
                    TcpSegment,
                },
                SeqNumber,
                SharedTcpPeer,
                State,
            },
        },
        test_helpers::{
            self,
            SharedTestPhysicalLayer,
            ALICE_IPV4,
            ALICE_MAC,
            BOB_IPV4,
            BOB_MAC,
        },
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            serialize_frame,
        },
        QDesc,
    },
};
use ::anyhow::Result;
use ::futures::task::noop_waker_ref;
use ::std::{
    future::Future,
    net::SocketAddrV4,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const BOB_PORT: u16 = 80;
pub const ALICE_ISS: u32 = 1000;
pub const BOB_ISS: u32 = 5000;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Alice runs the engine. Bob is played by hand: the test crafts his segments and inspects what Alice sends back.
pub struct Test {
    pub now: Instant,
    pub alice: SharedTcpPeer<SharedTestPhysicalLayer>,
    pub layer: SharedTestPhysicalLayer,
    pub qd: QDesc,
    pub alice_port: u16,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Test {
    pub fn new(tcp_config: TcpConfig) -> Result<Self> {
        let now: Instant = Instant::now();
        let (mut alice, layer) = test_helpers::new_alice(now, tcp_config);
        let qd: QDesc = alice.socket()?;
        Ok(Self {
            now,
            alice,
            layer,
            qd,
            alice_port: 0,
        })
    }

    /// Sends Alice's SYN. The SYN is left in the outgoing queue.
    pub fn connect(&mut self) -> Result<Pin<Box<dyn Future<Output = Result<(), Fail>>>>> {
        let bob: SocketAddrV4 = SocketAddrV4::new(BOB_IPV4, BOB_PORT);
        let fut = self.alice.connect_with_iss(self.qd, bob, SeqNumber::from(ALICE_ISS))?;
        self.alice_port = self.alice.endpoints(self.qd)?.0.port();
        Ok(Box::pin(fut))
    }

    /// Runs a full handshake against a Bob that advertises `window` and `mss`. Leaves no frames behind.
    pub fn establish(tcp_config: TcpConfig, window: u16, mss: u16) -> Result<Self> {
        let mut test: Test = Test::new(tcp_config)?;
        let mut connect = test.connect()?;

        let mut syn_ack: TcpHeader = test.bob_header(BOB_ISS, Some(ALICE_ISS + 1), window);
        syn_ack.syn = true;
        syn_ack.push_option(TcpOption::MaximumSegmentSize(mss));
        test.bob_sends(syn_ack, &[])?;

        crate::ensure_eq!(poll(connect.as_mut()), Poll::Ready(Ok(())));
        crate::ensure_eq!(test.alice.state(test.qd)?, State::Established);
        test.layer.pop_all_frames();
        Ok(test)
    }

    /// Header of a segment from Bob to Alice.
    pub fn bob_header(&self, seq: u32, ack: Option<u32>, window: u16) -> TcpHeader {
        let mut header: TcpHeader = TcpHeader::new(BOB_PORT, self.alice_port);
        header.seq_num = SeqNumber::from(seq);
        if let Some(ack) = ack {
            header.ack = true;
            header.ack_num = SeqNumber::from(ack);
        }
        header.window_size = window;
        header
    }

    /// Serializes a segment from Bob and delivers it to Alice.
    pub fn bob_sends(&mut self, header: TcpHeader, data: &[u8]) -> Result<(), Fail> {
        let frame: Vec<u8> = bob_frame(header, data);
        self.alice.receive_frame(&frame)
    }

    /// Pops the oldest frame Alice sent and parses it back.
    pub fn alice_sent(&mut self) -> Result<(TcpHeader, Vec<u8>)> {
        let frame: Vec<u8> = match self.layer.pop_frame() {
            Some(frame) => frame,
            None => anyhow::bail!("alice did not send anything"),
        };
        parse_frame(&frame)
    }

    pub fn advance(&mut self, delta: Duration) {
        self.now += delta;
        self.alice.advance_clock(self.now);
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

pub fn bob_frame(header: TcpHeader, data: &[u8]) -> Vec<u8> {
    serialize_frame(Box::new(TcpSegment {
        ethernet2_hdr: Ethernet2Header::new(ALICE_MAC, BOB_MAC, EtherType2::Ipv4),
        ipv4_hdr: Ipv4Header::new(BOB_IPV4, ALICE_IPV4, IpProtocol::TCP),
        tcp_hdr: header,
        data: if data.is_empty() { None } else { Some(data.to_vec()) },
        tx_checksum_offload: false,
    }))
}

pub fn parse_frame(frame: &[u8]) -> Result<(TcpHeader, Vec<u8>)> {
    let (eth2_header, eth2_payload) = Ethernet2Header::parse(frame)?;
    crate::ensure_eq!(eth2_header.src_addr(), ALICE_MAC);
    crate::ensure_eq!(eth2_header.dst_addr(), BOB_MAC);
    let (ipv4_header, ipv4_payload) = Ipv4Header::parse(eth2_payload)?;
    crate::ensure_eq!(ipv4_header.get_src_addr(), ALICE_IPV4);
    crate::ensure_eq!(ipv4_header.get_dest_addr(), BOB_IPV4);
    let (tcp_header, tcp_payload) = TcpHeader::parse(&ipv4_header, ipv4_payload, false)?;
    Ok((tcp_header, tcp_payload.to_vec()))
}

/// Polls a future once. Nothing is ever woken, so tests poll again after each event they inject.
pub fn poll<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let mut ctx: Context = Context::from_waker(noop_waker_ref());
    fut.poll(&mut ctx)
}
