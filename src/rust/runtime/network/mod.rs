// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod consts;
pub mod ephemeral;
pub mod types;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::network::types::MacAddress;
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Packet Buffer
pub trait PacketBuf {
    /// Returns the header size of the target [PacketBuf].
    fn header_size(&self) -> usize;
    /// Writes the header of the target [PacketBuf] into a slice.
    fn write_header(&self, buf: &mut [u8]);
    /// Returns the body size of the target [PacketBuf].
    fn body_size(&self) -> usize;
    /// Consumes and returns the body of the target [PacketBuf].
    fn take_body(&mut self) -> Option<Vec<u8>>;
}

/// Link-layer services the TCP engine consumes. Implementations are handles to some shared device, so cloning one
/// must yield a handle to the same link.
pub trait NetworkRuntime: Clone + 'static {
    /// Serializes a frame onto the link.
    fn transmit(&mut self, pkt: Box<dyn PacketBuf>);

    /// Returns the link-layer address of the next hop for `ipv4_addr`, if it is known.
    fn resolve_link_addr(&self, ipv4_addr: Ipv4Addr) -> Option<MacAddress>;
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Flattens a [PacketBuf] into a single contiguous frame.
pub fn serialize_frame(mut pkt: Box<dyn PacketBuf>) -> Vec<u8> {
    let header_size: usize = pkt.header_size();
    let body_size: usize = pkt.body_size();
    let mut frame: Vec<u8> = vec![0; header_size + body_size];
    pkt.write_header(&mut frame[..header_size]);
    if let Some(body) = pkt.take_body() {
        frame[header_size..].copy_from_slice(&body[..body_size]);
    }
    frame
}
