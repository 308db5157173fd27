// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Log specification used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "warn";

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        // Configured from the RUST_LOG env var. A second logger may already be installed by the host, in which case we
        // keep using it.
        match Logger::try_with_env_or_str(DEFAULT_LOG_SPEC) {
            Ok(logger) => {
                if let Err(e) = logger.start() {
                    eprintln!("initialize(): failed to start logger ({:?})", e);
                }
            },
            Err(e) => eprintln!("initialize(): invalid log specification ({:?})", e),
        }
    });
}
