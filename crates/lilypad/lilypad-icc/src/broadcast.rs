//! Snapshot exchange: one writer at a time, every attached session reads.
//!
//! Writers overwrite the snapshot under the data mutex and set the
//! broadcast event. Each protocol thread that sees the event set hands the
//! snapshot to its data handler once per barrier round and acknowledges.
//! When every attached session has acknowledged, the round closes: the
//! epoch advances and the event is cleared, unless a snapshot newer than
//! one handed out during the round exists, in which case the event stays
//! set and the next round delivers it.

use crate::context::{Shared, invoke};
use crate::error::IccError;
use crate::shm_layout::BarrierOutcome;
use lilypad_events::Snapshot;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

pub(crate) fn write_data(shared: &Shared, snapshot: &Snapshot) -> Result<(), IccError> {
    let data = &shared.prims.data_mutex;
    let guard = data.lock().map_err(|e| IccError::wait(data.name(), e))?;
    let seq = shared.region.store_snapshot(&guard, snapshot);
    drop(guard);

    shared.prims.broadcast.set();
    debug!(seq, "snapshot written");
    Ok(())
}

pub(crate) fn read_data(shared: &Shared) -> Result<Snapshot, IccError> {
    let data = &shared.prims.data_mutex;
    let guard = data.lock().map_err(|e| IccError::wait(data.name(), e))?;
    let (snapshot, _) = shared.region.load_snapshot(&guard);
    Ok(snapshot)
}

/// Closes or re-arms the broadcast event after a barrier update. Call with
/// the instances mutex held.
pub(crate) fn finish_round(shared: &Shared, outcome: BarrierOutcome) {
    let BarrierOutcome::RoundComplete { low_seq } = outcome else {
        return;
    };
    // Reset before reading the sequence: a writer bumps the sequence before
    // setting the event, so either we see its bump here or its set lands
    // after our reset.
    shared.prims.broadcast.reset();
    let seq = shared.region.snapshot_seq().load(Ordering::SeqCst);
    if seq > low_seq {
        shared.prims.broadcast.set();
        debug!(low_seq, seq, "newer snapshot pending, barrier re-armed");
    } else {
        debug!(seq, "barrier round complete");
    }
}

/// One data step of the protocol loop.
pub(crate) fn drain_data(shared: &Shared) {
    let prims = &shared.prims;
    if !prims.broadcast.is_set() {
        return;
    }

    let epoch = match prims.instances_mutex.try_lock() {
        Ok(Some(guard)) => shared
            .region
            .with_instances(&guard, |inst| inst.barrier_epoch),
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "instances mutex unavailable, skipping data");
            return;
        }
    };
    if shared.acked_epoch.load(Ordering::SeqCst) == epoch {
        return;
    }

    let (snapshot, seq) = match prims.data_mutex.try_lock() {
        Ok(Some(guard)) => shared.region.load_snapshot(&guard),
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "data mutex unavailable, skipping data");
            return;
        }
    };

    if let Some(handler) = shared.data_handler() {
        invoke("data", handler.as_ref(), &snapshot);
    }

    // The handler already ran; the acknowledgement must not be skipped or
    // this session would be handed the same round again.
    let guard = match prims.instances_mutex.lock() {
        Ok(guard) => guard,
        Err(e) => {
            warn!(error = %e, "failed to acknowledge snapshot");
            return;
        }
    };
    shared.region.with_instances(&guard, |inst| {
        // A detach may have closed the round while the handler ran.
        if inst.barrier_epoch != epoch {
            return;
        }
        let outcome = inst.acknowledge(seq);
        shared.acked_epoch.store(epoch, Ordering::SeqCst);
        finish_round(shared, outcome);
    });
}
