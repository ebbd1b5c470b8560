//! Bounded command queue with addressed delivery.
//!
//! `write_slots` counts free ring slots and `read_slots` counts filled
//! ones, so a writer blocks when the ring is full and a reader never looks
//! at an empty slot. Every session walks the ring from the same head; see
//! [`crate::ring::decide`] for who consumes it.

use crate::context::{Shared, invoke};
use crate::error::IccError;
use crate::ring::{Delivery, decide};
use lilypad_events::Command;
use tracing::{debug, warn};

/// Enqueues `command`, blocking while the ring is full.
pub(crate) fn write_command(shared: &Shared, command: Command) -> Result<(), IccError> {
    let prims = &shared.prims;
    prims
        .write_slots
        .wait()
        .map_err(|e| IccError::wait(prims.write_slots.name(), e))?;

    let guard = match prims.write_mutex.lock() {
        Ok(guard) => guard,
        Err(e) => {
            // hand the reserved slot back
            let _ = prims.write_slots.post();
            return Err(IccError::wait(prims.write_mutex.name(), e));
        }
    };
    shared.region.push_command(&guard, command);
    drop(guard);

    prims
        .read_slots
        .post()
        .map_err(|e| IccError::signal(prims.read_slots.name(), e))
}

fn put_back_read_token(shared: &Shared) {
    if let Err(e) = shared.prims.read_slots.post() {
        warn!(error = %e, "failed to return read token");
    }
}

fn release_write_slot(shared: &Shared) {
    if let Err(e) = shared.prims.write_slots.post() {
        warn!(error = %e, "failed to release write slot");
    }
}

/// One command step of the protocol loop. Never blocks on the ring.
pub(crate) fn drain_command(shared: &Shared) {
    let prims = &shared.prims;
    match prims.read_slots.try_wait() {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            debug!(error = %e, "read slots unavailable");
            return;
        }
    }

    let read_guard = match prims.read_mutex.try_lock() {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            put_back_read_token(shared);
            return;
        }
        Err(e) => {
            debug!(error = %e, "read mutex unavailable");
            put_back_read_token(shared);
            return;
        }
    };

    let head = shared.region.head_command(&read_guard);
    let target = head.command.target();
    let recipients = match prims.instances_mutex.lock() {
        Ok(guard) => shared
            .region
            .with_instances(&guard, |inst| inst.recipients(target)),
        Err(e) => {
            warn!(error = %e, "instances mutex unavailable, leaving command queued");
            drop(read_guard);
            put_back_read_token(shared);
            return;
        }
    };

    let me = shared.slot_bit();
    let delivery = decide(head.delivered, recipients, me);
    match delivery {
        Delivery::DeliverAndRetire | Delivery::Retire => {
            shared.region.retire_head(&read_guard);
            drop(read_guard);
            release_write_slot(shared);
        }
        Delivery::DeliverAndKeep => {
            shared.region.mark_head_delivered(&read_guard, me);
            drop(read_guard);
            put_back_read_token(shared);
        }
        Delivery::Keep => {
            drop(read_guard);
            put_back_read_token(shared);
        }
    }

    match delivery {
        Delivery::DeliverAndRetire | Delivery::DeliverAndKeep => {
            if let Some(handler) = shared.command_handler() {
                invoke("command", handler.as_ref(), &head.command);
            }
        }
        Delivery::Retire if recipients == 0 => {
            warn!(
                sender = head.command.sender_pid,
                target = head.command.target_pid,
                "no attached session matches command target, dropped"
            );
        }
        Delivery::Retire | Delivery::Keep => {}
    }
}
