// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod physical_layer;

pub use self::physical_layer::SharedTestPhysicalLayer;

use crate::{
    inetstack::protocols::tcp::SharedTcpPeer,
    runtime::network::{
        config::TcpConfig,
        types::MacAddress,
    },
};
use ::std::{
    collections::HashMap,
    net::Ipv4Addr,
    time::Instant,
};

//==============================================================================
// Constants
//==============================================================================

pub const RECEIVE_WINDOW_SIZE: u16 = 1024;
pub const ALICE_MAC: MacAddress = MacAddress::new([0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);
pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BOB_MAC: MacAddress = MacAddress::new([0xab, 0x89, 0x67, 0x45, 0x23, 0x12]);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

//==============================================================================
// Standalone Functions
//==============================================================================

/// Alice runs the engine under test. She already knows how to reach Bob.
pub fn new_alice(
    now: Instant,
    tcp_config: TcpConfig,
) -> (SharedTcpPeer<SharedTestPhysicalLayer>, SharedTestPhysicalLayer) {
    let mut arp_table: HashMap<Ipv4Addr, MacAddress> = HashMap::new();
    arp_table.insert(BOB_IPV4, BOB_MAC);
    let layer: SharedTestPhysicalLayer = SharedTestPhysicalLayer::new_test(arp_table);
    let peer: SharedTcpPeer<SharedTestPhysicalLayer> =
        SharedTcpPeer::new(tcp_config, layer.clone(), ALICE_MAC, ALICE_IPV4, now, [0; 32]);
    (peer, layer)
}

/// Configuration with a small receive window, so that tests can fill it.
pub fn small_window_config() -> TcpConfig {
    TcpConfig::new(None, Some(RECEIVE_WINDOW_SIZE), None, None, None, None).unwrap()
}
