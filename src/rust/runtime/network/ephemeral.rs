// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::rand::{
    rngs::SmallRng,
    seq::SliceRandom,
    SeedableRng,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// First private port. See https://datatracker.ietf.org/doc/html/rfc6335 for details.
pub const FIRST_PRIVATE_PORT: u16 = 49152;
/// Last private port. See https://datatracker.ietf.org/doc/html/rfc6335 for details.
pub const LAST_PRIVATE_PORT: u16 = 65535;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Pool of ports handed to sockets that connect without binding first.
pub struct EphemeralPorts {
    ports: Vec<u16>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EphemeralPorts {
    /// Creates a pool holding every private port, in an order drawn from `seed`.
    pub fn new(seed: u64) -> Self {
        let mut ports: Vec<u16> = (FIRST_PRIVATE_PORT..=LAST_PRIVATE_PORT).collect();
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        ports.shuffle(&mut rng);
        Self { ports }
    }

    #[cfg(test)]
    pub fn num_free(&self) -> usize {
        self.ports.len()
    }

    /// Asserts wether a port is in the ephemeral port range.
    pub fn is_private(port: u16) -> bool {
        port >= FIRST_PRIVATE_PORT
    }

    /// Allocates any ephemeral port from the pool.
    pub fn alloc(&mut self) -> Result<u16, Fail> {
        self.ports.pop().ok_or_else(|| {
            let cause: &str = "all port numbers in the ephemeral port range are currently in use";
            warn!("alloc(): {}", cause);
            Fail::new(libc::EADDRINUSE, cause)
        })
    }

    /// Takes a specific ephemeral port out of the pool, so that explicit binds and allocations never collide.
    pub fn reserve(&mut self, port: u16) -> Result<(), Fail> {
        match self.ports.iter().position(|&p| p == port) {
            Some(index) => {
                self.ports.swap_remove(index);
                Ok(())
            },
            None => {
                let cause: String = format!("port {} is not available", port);
                warn!("reserve(): {}", cause);
                Err(Fail::new(libc::EADDRINUSE, &cause))
            },
        }
    }

    /// Releases a ephemeral port.
    pub fn free(&mut self, port: u16) -> Result<(), Fail> {
        if !Self::is_private(port) {
            let cause: String = format!("port {} is not in the ephemeral port range", port);
            error!("free(): {}", &cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        if self.ports.contains(&port) {
            let cause: String = format!("port {} is already in the pool", port);
            error!("free(): {}", &cause);
            return Err(Fail::new(libc::EFAULT, &cause));
        }

        self.ports.push(port);

        Ok(())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
