// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::inetstack::protocols::tcp::SeqNumber;
use ::std::{
    net::SocketAddrV4,
    num::Wrapping,
};

/// Picks initial send sequence numbers by hashing the connection 4-tuple with a per-peer secret, plus a counter so
/// that reusing a 4-tuple does not reuse a sequence space.
pub struct IsnGenerator {
    nonce: u32,
    counter: Wrapping<u16>,
}

impl IsnGenerator {
    pub fn new(nonce: u32) -> Self {
        Self {
            nonce,
            counter: Wrapping(0),
        }
    }

    pub fn generate(&mut self, local: &SocketAddrV4, remote: &SocketAddrV4) -> SeqNumber {
        let crc: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);
        let mut digest = crc.digest();
        digest.update(&remote.ip().octets());
        digest.update(&remote.port().to_be_bytes());
        digest.update(&local.ip().octets());
        digest.update(&local.port().to_be_bytes());
        digest.update(&self.nonce.to_be_bytes());
        let digest: u32 = digest.finalize();
        let isn: SeqNumber = SeqNumber::from(digest.wrapping_add(self.counter.0 as u32));
        self.counter += Wrapping(1);
        isn
    }
}
