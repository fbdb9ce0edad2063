// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator modes - one module per subcommand.

pub mod backup;
pub mod make_index;
pub mod rehardlink;
pub mod verify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Cooperative cancellation: Ctrl-C sets the flag, the mode loops observe
/// it between files and wind down after releasing resources.
pub(crate) fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler = Arc::clone(&flag);
    if let Err(err) = ctrlc::set_handler(move || handler.store(true, Ordering::SeqCst)) {
        debug!(error = %err, "interrupt handler already installed");
    }
    flag
}
