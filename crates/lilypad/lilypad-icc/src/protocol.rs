//! Background thread that delivers snapshots and commands to one session.
//!
//! ```text
//! WAITING ──tick──▶ DRAIN_DATA ──▶ DRAIN_COMMAND ──▶ WAITING
//!    │
//!    └─shutdown──▶ exit
//! ```

use crate::broadcast::drain_data;
use crate::command::drain_command;
use crate::context::Shared;
use crate::error::IccError;
use lilypad_sync::WaitOutcome;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// How the protocol thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolExit {
    /// Stopped by the shutdown event.
    Clean,
    /// Waiting on the shutdown event failed, or the thread panicked.
    Failed,
}

impl ProtocolExit {
    /// Process-style exit status.
    pub fn code(self) -> i32 {
        match self {
            ProtocolExit::Clean => 0,
            ProtocolExit::Failed => 1,
        }
    }
}

pub(crate) fn spawn(shared: Arc<Shared>) -> Result<JoinHandle<ProtocolExit>, IccError> {
    thread::Builder::new()
        .name(format!("lilypad-{}", shared.slot))
        .spawn(move || run(&shared))
        .map_err(IccError::Spawn)
}

fn run(shared: &Shared) -> ProtocolExit {
    let tick = shared.config.tick();
    debug!(slot = shared.slot, tick_ms = shared.config.tick_ms, "protocol thread started");
    loop {
        match shared.prims.shutdown.wait_timeout(tick) {
            Ok(WaitOutcome::TimedOut) => {
                drain_data(shared);
                drain_command(shared);
            }
            Ok(WaitOutcome::Signaled) => {
                debug!(slot = shared.slot, "protocol thread stopping");
                return ProtocolExit::Clean;
            }
            Err(e) => {
                error!(error = %e, "shutdown wait failed, protocol thread exiting");
                return ProtocolExit::Failed;
            }
        }
    }
}
