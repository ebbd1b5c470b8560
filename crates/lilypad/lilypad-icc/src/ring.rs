//! Command ring index arithmetic and the per-slot delivery decision.
//!
//! The ring is shared by every attached session and consumed in one global
//! order. A slot at the head stays there until every session it is
//! addressed to has received it; sessions that are not addressed, or that
//! already received it, leave it alone.

use crate::shm_layout::COMMAND_CAPACITY;

/// Advances a ring index by one slot, wrapping at the capacity.
///
/// With `COMMAND_CAPACITY = 10`:
/// ```text
/// 0 → 1, 8 → 9, 9 → 0
/// ```
#[inline(always)]
pub fn next_index(index: u32) -> u32 {
    (index + 1) % COMMAND_CAPACITY as u32
}

/// Maps a stored index onto a slot. A stored index is always below the
/// capacity; the modulo keeps a corrupted one inside the array.
#[inline(always)]
pub fn slot_of(index: u32) -> usize {
    index as usize % COMMAND_CAPACITY
}

/// What one session does with the command at the head of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Hand it to this session; it was the last pending recipient, so the
    /// slot is consumed.
    DeliverAndRetire,
    /// Hand it to this session and leave it for the other recipients.
    DeliverAndKeep,
    /// Not for this session, or already handed to it. Leave it.
    Keep,
    /// Nobody left to deliver to. Consume the slot without delivering.
    Retire,
}

/// Decides what the session owning bit `me` does with the head slot.
///
/// # Arguments
/// - `delivered`: bits of sessions that already received the command.
/// - `recipients`: bits of live sessions the command is addressed to.
/// - `me`: this session's bit.
///
/// # Example
///
/// ```text
/// broadcast to A, B (recipients = 0b11)
///
/// A polls: delivered = 0b00 → DeliverAndKeep      (delivered becomes 0b01)
/// A polls: delivered = 0b01 → Keep
/// B polls: delivered = 0b01 → DeliverAndRetire    (slot consumed)
/// ```
#[inline]
pub fn decide(delivered: u32, recipients: u32, me: u32) -> Delivery {
    let pending = recipients & !delivered;
    if pending == 0 {
        return Delivery::Retire;
    }
    if pending & me == 0 {
        return Delivery::Keep;
    }
    if pending == me {
        Delivery::DeliverAndRetire
    } else {
        Delivery::DeliverAndKeep
    }
}
