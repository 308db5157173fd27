// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::CongestionControl;

// Implementation of congestion control which does nothing.
#[derive(Debug)]
pub struct None {}

impl CongestionControl for None {
    fn new(_mss: usize) -> Box<dyn CongestionControl> {
        Box::new(Self {})
    }

    fn get_cwnd(&self) -> u32 {
        u32::MAX
    }

    fn get_ssthresh(&self) -> u32 {
        u32::MAX
    }
}
