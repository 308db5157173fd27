// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod congestion_control;
mod ctrlblk;
mod isn_generator;
pub mod peer;
mod receiver;
mod rto;
pub mod segment;
mod sender;
mod sequence_number;
mod state;
mod timers;

#[cfg(test)]
mod tests;

pub use self::{
    peer::SharedTcpPeer,
    segment::{
        TcpHeader,
        TcpSegment,
        MAX_TCP_HEADER_SIZE,
        MIN_TCP_HEADER_SIZE,
    },
    sequence_number::SeqNumber,
    state::State,
};
