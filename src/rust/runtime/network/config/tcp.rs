// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    network::consts::{
        DEFAULT_MSS,
        MAX_MSS,
        MIN_MSS,
        TCP_MSL,
    },
};
use ::libc::EINVAL;
use ::std::{
    str::FromStr,
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// Congestion control algorithm run by every connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionControlType {
    /// Slow start and congestion avoidance.
    SlowStart,
    /// No congestion control: the congestion window never limits the sender.
    None,
}

/// TCP Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Window Size
    receive_window_size: u16,
    /// Time spent in TIME_WAIT and LAST_ACK before a connection is released
    msl_wait: Duration,
    /// Congestion Control Algorithm
    congestion_control: CongestionControlType,
    /// Offload Checksum to Hardware When Receiving?
    rx_checksum_offload: bool,
    /// Offload Checksum to Hardware When Sending?
    tx_checksum_offload: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for TCP Configuration Descriptor
impl TcpConfig {
    /// Creates a TCP Configuration Descriptor.
    pub fn new(
        advertised_mss: Option<usize>,
        receive_window_size: Option<u16>,
        msl_wait: Option<Duration>,
        congestion_control: Option<CongestionControlType>,
        rx_checksum_offload: Option<bool>,
        tx_checksum_offload: Option<bool>,
    ) -> Result<Self, Fail> {
        let mut options = Self::default();

        if let Some(value) = advertised_mss {
            options = options.set_advertised_mss(value)?;
        }
        if let Some(value) = receive_window_size {
            options = options.set_receive_window_size(value)?;
        }
        if let Some(value) = msl_wait {
            options = options.set_msl_wait(value)?;
        }
        if let Some(value) = congestion_control {
            options.congestion_control = value;
        }
        if let Some(value) = rx_checksum_offload {
            options.rx_checksum_offload = value;
        }
        if let Some(value) = tx_checksum_offload {
            options.tx_checksum_offload = value;
        }

        Ok(options)
    }

    /// Gets the advertised maximum segment size in the target [TcpConfig].
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the receiver window size in the target [TcpConfig].
    pub fn get_receive_window_size(&self) -> u16 {
        self.receive_window_size
    }

    /// Gets how long a closing connection waits in TIME_WAIT or LAST_ACK in the target [TcpConfig].
    pub fn get_msl_wait(&self) -> Duration {
        self.msl_wait
    }

    /// Gets the congestion control algorithm in the target [TcpConfig].
    pub fn get_congestion_control(&self) -> CongestionControlType {
        self.congestion_control
    }

    /// Gets the TX hardware checksum offload option in the target [TcpConfig].
    pub fn get_tx_checksum_offload(&self) -> bool {
        self.tx_checksum_offload
    }

    /// Gets the RX hardware checksum offload option in the target [TcpConfig].
    pub fn get_rx_checksum_offload(&self) -> bool {
        self.rx_checksum_offload
    }

    /// Sets the advertised maximum segment size in the target [TcpConfig].
    fn set_advertised_mss(mut self, value: usize) -> Result<Self, Fail> {
        if !(MIN_MSS..=MAX_MSS).contains(&value) {
            let cause: String = format!("advertised MSS out of range (mss={})", value);
            error!("set_advertised_mss(): {}", cause);
            return Err(Fail::new(EINVAL, &cause));
        }
        self.advertised_mss = value;
        Ok(self)
    }

    /// Sets the receiver window size in the target [TcpConfig].
    fn set_receive_window_size(mut self, value: u16) -> Result<Self, Fail> {
        if value == 0 {
            let cause: &str = "receive window size must be positive";
            error!("set_receive_window_size(): {}", cause);
            return Err(Fail::new(EINVAL, cause));
        }
        self.receive_window_size = value;
        Ok(self)
    }

    /// Sets the TIME_WAIT/LAST_ACK linger time in the target [TcpConfig].
    fn set_msl_wait(mut self, value: Duration) -> Result<Self, Fail> {
        if value.is_zero() {
            let cause: &str = "msl wait must be positive";
            error!("set_msl_wait(): {}", cause);
            return Err(Fail::new(EINVAL, cause));
        }
        self.msl_wait = value;
        Ok(self)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for TCP Configuration Descriptor
impl Default for TcpConfig {
    /// Creates a TCP Configuration Descriptor with the default values.
    fn default() -> Self {
        TcpConfig {
            advertised_mss: DEFAULT_MSS,
            receive_window_size: 0xffff,
            msl_wait: 2 * TCP_MSL,
            congestion_control: CongestionControlType::SlowStart,
            rx_checksum_offload: false,
            tx_checksum_offload: false,
        }
    }
}

impl FromStr for CongestionControlType {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slow_start" => Ok(CongestionControlType::SlowStart),
            "none" => Ok(CongestionControlType::None),
            _ => Err(Fail::new(EINVAL, "unknown congestion control algorithm")),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
