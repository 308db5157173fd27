// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Fallback MSS Parameter for TCP
pub const FALLBACK_MSS: usize = 536;

/// Minimum MSS Parameter for TCP
pub const MIN_MSS: usize = FALLBACK_MSS;

/// Maximum MSS Parameter for TCP
pub const MAX_MSS: usize = u16::MAX as usize;

/// Default MSS Parameter for TCP
///
/// TODO: Auto-Discovery MTU Size
pub const DEFAULT_MSS: usize = 1450;

/// Largest window that may be advertised or used as a congestion window, since window scaling is not negotiated.
pub const MAX_WINDOW: u32 = u16::MAX as u32;

/// Maximum segment lifetime. Connections linger in TIME_WAIT and LAST_ACK for twice this long.
pub const TCP_MSL: Duration = Duration::from_secs(30);

/// Initial retransmission timeout.
/// See: https://www.rfc-editor.org/rfc/rfc6298#section-2.1
pub const TCP_INITIAL_RTO: Duration = Duration::from_secs(1);

/// Retransmission timeout used once a connection is established after its SYN had to be retransmitted.
/// See: https://www.rfc-editor.org/rfc/rfc6298#section-5
pub const TCP_SYN_RETRANSMITTED_RTO: Duration = Duration::from_secs(3);

/// Initial backoff of the zero-window persist timer.
pub const TCP_PERSIST_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
