// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    logging,
    network::{
        serialize_frame,
        types::MacAddress,
        NetworkRuntime,
        PacketBuf,
    },
    SharedObject,
};
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    net::Ipv4Addr,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A link that captures every frame handed to it instead of putting it on a wire.
pub struct TestPhysicalLayer {
    outgoing: VecDeque<Vec<u8>>,
    arp_table: HashMap<Ipv4Addr, MacAddress>,
}

#[derive(Clone)]
pub struct SharedTestPhysicalLayer(SharedObject<TestPhysicalLayer>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedTestPhysicalLayer {
    pub fn new_test(arp_table: HashMap<Ipv4Addr, MacAddress>) -> Self {
        logging::initialize();
        Self(SharedObject::<TestPhysicalLayer>::new(TestPhysicalLayer {
            outgoing: VecDeque::new(),
            arp_table,
        }))
    }

    pub fn pop_all_frames(&mut self) -> VecDeque<Vec<u8>> {
        self.outgoing.split_off(0)
    }

    /// Remove the oldest frame from the outgoing queue, if any.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }

    pub fn num_frames(&self) -> usize {
        self.outgoing.len()
    }

    pub fn forget_link_addr(&mut self, ipv4_addr: Ipv4Addr) {
        self.arp_table.remove(&ipv4_addr);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl NetworkRuntime for SharedTestPhysicalLayer {
    fn transmit(&mut self, pkt: Box<dyn PacketBuf>) {
        let frame: Vec<u8> = serialize_frame(pkt);
        debug!("transmit frame: {:?} total packet size: {:?}", self.outgoing.len(), frame.len());

        // The packet header and body must fit into whatever physical media we're transmitting over.
        assert!(frame.len() < u16::MAX as usize);

        self.outgoing.push_back(frame);
    }

    fn resolve_link_addr(&self, ipv4_addr: Ipv4Addr) -> Option<MacAddress> {
        self.arp_table.get(&ipv4_addr).copied()
    }
}

impl Deref for SharedTestPhysicalLayer {
    type Target = TestPhysicalLayer;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedTestPhysicalLayer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
