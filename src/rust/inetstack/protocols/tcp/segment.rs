// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    inetstack::protocols::{
        compute_generic_checksum,
        ethernet2::Ethernet2Header,
        fold16,
        ip::IpProtocol,
        ipv4::Ipv4Header,
        tcp::SeqNumber,
    },
    runtime::{
        fail::Fail,
        network::PacketBuf,
    },
};
use ::libc::EBADMSG;

pub const MIN_TCP_HEADER_SIZE: usize = 20;
pub const MAX_TCP_HEADER_SIZE: usize = 60;
pub const MAX_TCP_OPTIONS: usize = 4;

/// Offset of the checksum field within the TCP header.
const TCP_CHECKSUM_OFFSET: usize = 16;

pub struct TcpSegment {
    pub ethernet2_hdr: Ethernet2Header,
    pub ipv4_hdr: Ipv4Header,
    pub tcp_hdr: TcpHeader,
    pub data: Option<Vec<u8>>,
    pub tx_checksum_offload: bool,
}

impl PacketBuf for TcpSegment {
    fn header_size(&self) -> usize {
        self.ethernet2_hdr.compute_size() + self.ipv4_hdr.compute_size() + self.tcp_hdr.compute_size()
    }

    fn body_size(&self) -> usize {
        self.data.as_ref().map_or(0, |buf| buf.len())
    }

    fn write_header(&self, buf: &mut [u8]) {
        let eth_hdr_size: usize = self.ethernet2_hdr.compute_size();
        let ipv4_hdr_size: usize = self.ipv4_hdr.compute_size();
        let tcp_hdr_size: usize = self.tcp_hdr.compute_size();
        let mut cur_pos: usize = 0;

        self.ethernet2_hdr
            .serialize(&mut buf[cur_pos..(cur_pos + eth_hdr_size)]);
        cur_pos += eth_hdr_size;

        let ipv4_payload_len: usize = tcp_hdr_size + self.body_size();
        self.ipv4_hdr
            .serialize(&mut buf[cur_pos..(cur_pos + ipv4_hdr_size)], ipv4_payload_len);
        cur_pos += ipv4_hdr_size;

        let payload: &[u8] = self.data.as_deref().unwrap_or(&[]);
        self.tcp_hdr.serialize(
            &mut buf[cur_pos..(cur_pos + tcp_hdr_size)],
            &self.ipv4_hdr,
            payload,
            self.tx_checksum_offload,
        );
    }

    fn take_body(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }
}

/// The options this engine understands. Anything else is skipped over on receive and never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    EndOfOptionsList,
    NoOperation,
    MaximumSegmentSize(u16),
}

impl TcpOption {
    fn compute_size(&self) -> usize {
        match self {
            TcpOption::EndOfOptionsList => 0,
            TcpOption::NoOperation => 1,
            TcpOption::MaximumSegmentSize(..) => 4,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            TcpOption::EndOfOptionsList => 0,
            TcpOption::NoOperation => {
                buf[0] = 1;
                1
            },
            TcpOption::MaximumSegmentSize(mss) => {
                buf[0] = 2;
                buf[1] = 4;
                buf[2..4].copy_from_slice(&mss.to_be_bytes());
                4
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    // Octet 13: [ reserved ] [ reserved ] [ URG ] [ ACK ] [ PSH ] [ RST ] [ SYN ] [ FIN ]
    // The data offset in octet 12 is computed on the fly on serialization based on options.
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,

    // We omit the checksum since it's checked when parsing and computed when serializing.
    pub urgent_pointer: u16,

    pub num_options: usize,
    pub option_list: [TcpOption; MAX_TCP_OPTIONS],
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),

            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,

            window_size: 0,
            urgent_pointer: 0,
            num_options: 0,
            option_list: [TcpOption::NoOperation; MAX_TCP_OPTIONS],
        }
    }

    /// Parses and validates a TCP segment, returning its header and payload.
    pub fn parse<'a>(
        ipv4_header: &Ipv4Header,
        buf: &'a [u8],
        rx_checksum_offload: bool,
    ) -> Result<(Self, &'a [u8]), Fail> {
        if buf.len() < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP segment too small"));
        }
        let data_offset: usize = (buf[12] >> 4) as usize * 4;
        if buf.len() < data_offset {
            return Err(Fail::new(EBADMSG, "TCP segment smaller than data offset"));
        }
        if data_offset < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too small"));
        }
        if data_offset > MAX_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too large"));
        }
        let (hdr_buf, data_buf): (&[u8], &[u8]) = buf.split_at(data_offset);

        if !rx_checksum_offload {
            let checksum: u16 = u16::from_be_bytes([
                hdr_buf[TCP_CHECKSUM_OFFSET],
                hdr_buf[TCP_CHECKSUM_OFFSET + 1],
            ]);
            if checksum != tcp_checksum(ipv4_header, hdr_buf, data_buf) {
                return Err(Fail::new(EBADMSG, "TCP checksum mismatch"));
            }
        }

        let src_port: u16 = u16::from_be_bytes([hdr_buf[0], hdr_buf[1]]);
        let dst_port: u16 = u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]);

        let seq_num: SeqNumber = SeqNumber::from(u32::from_be_bytes([hdr_buf[4], hdr_buf[5], hdr_buf[6], hdr_buf[7]]));
        let ack_num: SeqNumber =
            SeqNumber::from(u32::from_be_bytes([hdr_buf[8], hdr_buf[9], hdr_buf[10], hdr_buf[11]]));

        let urg: bool = (hdr_buf[13] & (1 << 5)) != 0;
        let ack: bool = (hdr_buf[13] & (1 << 4)) != 0;
        let psh: bool = (hdr_buf[13] & (1 << 3)) != 0;
        let rst: bool = (hdr_buf[13] & (1 << 2)) != 0;
        let syn: bool = (hdr_buf[13] & (1 << 1)) != 0;
        let fin: bool = (hdr_buf[13] & (1 << 0)) != 0;

        let window_size: u16 = u16::from_be_bytes([hdr_buf[14], hdr_buf[15]]);
        let urgent_pointer: u16 = u16::from_be_bytes([hdr_buf[18], hdr_buf[19]]);

        let mut header: TcpHeader = Self {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            urg,
            ack,
            psh,
            rst,
            syn,
            fin,
            window_size,
            urgent_pointer,
            num_options: 0,
            option_list: [TcpOption::NoOperation; MAX_TCP_OPTIONS],
        };

        let options: &[u8] = &hdr_buf[MIN_TCP_HEADER_SIZE..];
        let mut pos: usize = 0;
        while pos < options.len() {
            match options[pos] {
                0 => break,
                1 => {
                    pos += 1;
                    continue;
                },
                kind => {
                    let option_length: usize = match options.get(pos + 1) {
                        Some(&len) => len as usize,
                        None => return Err(Fail::new(EBADMSG, "TCP option truncated")),
                    };
                    if option_length < 2 || pos + option_length > options.len() {
                        return Err(Fail::new(EBADMSG, "invalid TCP option length"));
                    }
                    if kind == 2 {
                        if option_length != 4 {
                            return Err(Fail::new(EBADMSG, "MSS size was not 4"));
                        }
                        let mss: u16 = u16::from_be_bytes([options[pos + 2], options[pos + 3]]);
                        if header.num_options >= MAX_TCP_OPTIONS {
                            return Err(Fail::new(EBADMSG, "too many TCP options provided"));
                        }
                        header.push_option(TcpOption::MaximumSegmentSize(mss));
                    } else {
                        trace!("parse(): skipping TCP option (kind={}, len={})", kind, option_length);
                    }
                    pos += option_length;
                },
            }
        }

        Ok((header, data_buf))
    }

    pub fn serialize(&self, buf: &mut [u8], ipv4_hdr: &Ipv4Header, data: &[u8], tx_checksum_offload: bool) {
        let hdr_size: usize = self.compute_size();
        let buf: &mut [u8] = &mut buf[..hdr_size];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        buf[12] = ((hdr_size / 4) as u8) << 4;
        buf[13] = 0;
        if self.urg {
            buf[13] |= 1 << 5;
        }
        if self.ack {
            buf[13] |= 1 << 4;
        }
        if self.psh {
            buf[13] |= 1 << 3;
        }
        if self.rst {
            buf[13] |= 1 << 2;
        }
        if self.syn {
            buf[13] |= 1 << 1;
        }
        if self.fin {
            buf[13] |= 1 << 0;
        }

        buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());

        // The checksum is computed last, over a zeroed checksum field.
        buf[16..18].copy_from_slice(&[0, 0]);

        buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let mut cur_pos: usize = MIN_TCP_HEADER_SIZE;
        for option in self.iter_options() {
            cur_pos += option.serialize(&mut buf[cur_pos..]);
        }
        // Zero padding up to the data offset doubles as the end of the option list.
        for byte in &mut buf[cur_pos..] {
            *byte = 0;
        }

        if !tx_checksum_offload {
            let checksum: u16 = tcp_checksum(ipv4_hdr, buf, data);
            buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
    }

    /// Header size, options included, rounded up so that the payload is always 32-bit aligned.
    pub fn compute_size(&self) -> usize {
        let size: usize = MIN_TCP_HEADER_SIZE + self.iter_options().map(|o| o.compute_size()).sum::<usize>();
        (size + 3) & !0x3
    }

    pub fn iter_options(&self) -> impl Iterator<Item = &TcpOption> {
        self.option_list[..self.num_options].iter()
    }

    pub fn push_option(&mut self, option: TcpOption) {
        self.option_list[self.num_options] = option;
        self.num_options += 1;
    }

    /// Returns the MSS option carried by this header, if any.
    pub fn get_mss(&self) -> Option<u16> {
        self.iter_options().find_map(|option| match option {
            TcpOption::MaximumSegmentSize(mss) => Some(*mss),
            _ => None,
        })
    }
}

/// One's complement checksum over the IPv4 pseudo-header, the TCP header (checksum field skipped) and the payload.
fn tcp_checksum(ipv4_header: &Ipv4Header, header: &[u8], data: &[u8]) -> u16 {
    // Pseudo-header: source address, destination address, a zero byte, the protocol number and the segment length.
    let mut state: u32 = compute_generic_checksum(&ipv4_header.get_src_addr().octets(), None);
    state = compute_generic_checksum(&ipv4_header.get_dest_addr().octets(), Some(state));
    state += IpProtocol::TCP as u32;
    state += (header.len() + data.len()) as u32;

    state = compute_generic_checksum(&header[..TCP_CHECKSUM_OFFSET], Some(state));
    state = compute_generic_checksum(&header[(TCP_CHECKSUM_OFFSET + 2)..], Some(state));

    // The header is always 32-bit aligned, so the payload starts on a 16-bit word boundary.
    state = compute_generic_checksum(data, Some(state));

    fold16(state)
}
