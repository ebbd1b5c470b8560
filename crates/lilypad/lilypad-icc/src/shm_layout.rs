//! Shared memory layout of a session region.
//!
//! The region is one fixed-size `#[repr(C)]` structure mapped by every
//! attached process. There is no schema negotiation: the header only lets an
//! attaching process refuse a region written by an incompatible build.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        RegionHeader                            │
//! │  magic (published last) │ version │ capacity │ sizes ...       │
//! ├────────────────────────────────────────────────────────────────┤
//! │                        Instances          (instances mutex)    │
//! │  instance_count │ acknowledged_count │ live_mask │ pids[32]    │
//! │  creator_slot │ barrier_epoch │ round_low_seq                  │
//! ├────────────────────────────────────────────────────────────────┤
//! │  snapshot_seq (atomic) │ Snapshot         (data mutex)         │
//! ├────────────────────────────────────────────────────────────────┤
//! │                        CommandRing                             │
//! │  write_index (write mutex) │ read_index (read mutex)           │
//! │  CommandSlot[0] { delivered, Command }                         │
//! │  ...                                                           │
//! │  CommandSlot[COMMAND_CAPACITY-1]                               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every field except the header and `snapshot_seq` is plain data and may
//! only be touched while holding the mutex named next to it.

use lilypad_events::{Command, Snapshot, Target};
use std::mem::size_of;
use std::sync::atomic::AtomicU64;

/// ASCII "LILYPADR" (Lilypad Region).
pub const REGION_MAGIC: u64 = 0x4C49_4C59_5041_4452;

/// Increment on any incompatible change to the structures below.
pub const REGION_VERSION: u64 = 1;

/// Number of slots in the command ring.
pub const COMMAND_CAPACITY: usize = 10;

/// Most sessions that can be attached at once; one bit each in `u32` masks.
pub const MAX_INSTANCES: usize = 32;

/// `creator_slot` value once the creator has detached.
pub const NO_SLOT: u32 = u32::MAX;

#[repr(C)]
pub struct RegionHeader {
    /// Stored with release ordering once the creator finished initializing.
    pub magic: AtomicU64,
    pub version: u64,
    pub capacity: u64,
    pub snapshot_size: u64,
    pub command_size: u64,
    pub region_size: u64,
}

impl RegionHeader {
    /// Checks the fields written by the creator against this build.
    /// Only meaningful after `magic` has been observed.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.version != REGION_VERSION {
            return Err("Wrong version");
        }
        if self.capacity as usize != COMMAND_CAPACITY {
            return Err("Command ring capacity mismatch");
        }
        if self.snapshot_size as usize != size_of::<Snapshot>() {
            return Err("Snapshot size mismatch");
        }
        if self.command_size as usize != size_of::<Command>() {
            return Err("Command size mismatch");
        }
        if self.region_size as usize != size_of::<SharedRegion>() {
            return Err("Region size mismatch");
        }
        Ok(())
    }
}

/// Outcome of an acknowledgement or a detach for the broadcast barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Some attached session still has to acknowledge the current round.
    Pending,
    /// Every attached session acknowledged; the counter was reset and the
    /// epoch advanced. `low_seq` is the oldest snapshot anyone was handed in
    /// the finished round.
    RoundComplete { low_seq: u64 },
}

/// Instance table and broadcast barrier. Guarded by the instances mutex.
#[repr(C)]
pub struct Instances {
    pub instance_count: u32,
    pub acknowledged_count: u32,
    /// Bit `i` set while slot `i` is held by an attached session.
    pub live_mask: u32,
    pub creator_slot: u32,
    pub pids: [i32; MAX_INSTANCES],
    pub barrier_epoch: u64,
    /// Only meaningful while `acknowledged_count > 0`.
    pub round_low_seq: u64,
}

impl Instances {
    /// Takes the lowest free slot for a session of process `pid`.
    pub fn claim(&mut self, pid: i32, is_creator: bool) -> Option<u32> {
        let free = !self.live_mask;
        if free == 0 {
            return None;
        }
        let slot = free.trailing_zeros();
        self.live_mask |= 1 << slot;
        self.pids[slot as usize] = pid;
        self.instance_count += 1;
        if is_creator {
            self.creator_slot = slot;
        }
        Some(slot)
    }

    /// Gives `slot` back. `acked_current_round` tells whether the departing
    /// session already counted itself into `acknowledged_count`; its
    /// acknowledgement is withdrawn so the barrier keeps counting only live
    /// sessions.
    pub fn release(&mut self, slot: u32, acked_current_round: bool) -> BarrierOutcome {
        let bit = 1u32 << slot;
        if self.live_mask & bit == 0 {
            return BarrierOutcome::Pending;
        }
        self.live_mask &= !bit;
        self.pids[slot as usize] = 0;
        self.instance_count = self.instance_count.saturating_sub(1);
        if self.creator_slot == slot {
            self.creator_slot = NO_SLOT;
        }
        if acked_current_round {
            self.acknowledged_count = self.acknowledged_count.saturating_sub(1);
        }

        if self.instance_count == 0 {
            self.acknowledged_count = 0;
            return BarrierOutcome::Pending;
        }
        if self.acknowledged_count > 0 && self.acknowledged_count >= self.instance_count {
            return self.complete_round();
        }
        BarrierOutcome::Pending
    }

    /// Counts one session as having observed snapshot number `seq`.
    pub fn acknowledge(&mut self, seq: u64) -> BarrierOutcome {
        if self.acknowledged_count == 0 {
            self.round_low_seq = seq;
        } else {
            self.round_low_seq = self.round_low_seq.min(seq);
        }
        self.acknowledged_count += 1;

        if self.acknowledged_count >= self.instance_count {
            return self.complete_round();
        }
        BarrierOutcome::Pending
    }

    fn complete_round(&mut self) -> BarrierOutcome {
        let low_seq = self.round_low_seq;
        self.acknowledged_count = 0;
        self.barrier_epoch = self.barrier_epoch.wrapping_add(1);
        BarrierOutcome::RoundComplete { low_seq }
    }

    /// Slots that must receive a command addressed to `target`.
    pub fn recipients(&self, target: Target) -> u32 {
        match target {
            Target::Broadcast => self.live_mask,
            Target::Server => {
                if self.creator_slot == NO_SLOT {
                    0
                } else {
                    (1u32 << self.creator_slot) & self.live_mask
                }
            }
            Target::Process(pid) => (0..MAX_INSTANCES as u32)
                .filter(|&slot| {
                    self.live_mask & (1 << slot) != 0 && self.pids[slot as usize] == pid
                })
                .fold(0, |mask, slot| mask | (1 << slot)),
        }
    }
}

/// One ring entry: the command and the slots it was already handed to.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CommandSlot {
    pub delivered: u32,
    pub command: Command,
}

#[repr(C)]
pub struct CommandRing {
    pub write_index: u32,
    pub read_index: u32,
    pub slots: [CommandSlot; COMMAND_CAPACITY],
}

#[repr(C)]
pub struct SharedRegion {
    pub header: RegionHeader,
    pub instances: Instances,
    /// Bumped under the data mutex by every snapshot write.
    pub snapshot_seq: AtomicU64,
    pub snapshot: Snapshot,
    pub ring: CommandRing,
}

/// Bytes of the mapped region.
pub const fn bytes_for_region() -> usize {
    size_of::<SharedRegion>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> Instances {
        Instances {
            instance_count: 0,
            acknowledged_count: 0,
            live_mask: 0,
            creator_slot: 0,
            pids: [0; MAX_INSTANCES],
            barrier_epoch: 0,
            round_low_seq: 0,
        }
    }

    #[test]
    fn claim_takes_lowest_free_slot() {
        let mut inst = empty();
        assert_eq!(inst.claim(100, true), Some(0));
        assert_eq!(inst.claim(200, false), Some(1));
        assert_eq!(inst.claim(300, false), Some(2));
        inst.release(1, false);
        assert_eq!(inst.claim(400, false), Some(1));
        assert_eq!(inst.instance_count, 3);
        assert_eq!(inst.pids[1], 400);
    }

    #[test]
    fn claim_fails_when_table_full() {
        let mut inst = empty();
        for pid in 0..MAX_INSTANCES as i32 {
            assert!(inst.claim(pid + 1, false).is_some());
        }
        assert_eq!(inst.claim(99, false), None);
        assert_eq!(inst.instance_count as usize, MAX_INSTANCES);
    }

    #[test]
    fn barrier_completes_after_every_instance() {
        let mut inst = empty();
        inst.claim(1, true);
        inst.claim(2, false);
        inst.claim(3, false);

        assert_eq!(inst.acknowledge(5), BarrierOutcome::Pending);
        assert_eq!(inst.acknowledge(4), BarrierOutcome::Pending);
        assert_eq!(
            inst.acknowledge(5),
            BarrierOutcome::RoundComplete { low_seq: 4 }
        );
        assert_eq!(inst.acknowledged_count, 0);
        assert_eq!(inst.barrier_epoch, 1);
    }

    #[test]
    fn leaving_before_ack_can_finish_the_round() {
        let mut inst = empty();
        inst.claim(1, true);
        let late = inst.claim(2, false).unwrap();

        assert_eq!(inst.acknowledge(1), BarrierOutcome::Pending);
        assert_eq!(
            inst.release(late, false),
            BarrierOutcome::RoundComplete { low_seq: 1 }
        );
        assert!(inst.acknowledged_count <= inst.instance_count);
    }

    #[test]
    fn leaving_after_ack_withdraws_it() {
        let mut inst = empty();
        let a = inst.claim(1, true).unwrap();
        inst.claim(2, false);
        inst.claim(3, false);

        inst.acknowledge(1);
        assert_eq!(inst.release(a, true), BarrierOutcome::Pending);
        assert_eq!(inst.acknowledged_count, 0);
        assert_eq!(inst.instance_count, 2);

        // the two remaining sessions still each have to acknowledge
        assert_eq!(inst.acknowledge(1), BarrierOutcome::Pending);
        assert!(matches!(
            inst.acknowledge(1),
            BarrierOutcome::RoundComplete { .. }
        ));
    }

    #[test]
    fn releasing_twice_is_harmless() {
        let mut inst = empty();
        let a = inst.claim(1, true).unwrap();
        inst.claim(2, false);
        inst.release(a, false);
        inst.release(a, false);
        assert_eq!(inst.instance_count, 1);
    }

    #[test]
    fn recipients_follow_addressing() {
        let mut inst = empty();
        let server = inst.claim(10, true).unwrap();
        let client = inst.claim(20, false).unwrap();
        let twin = inst.claim(20, false).unwrap();

        assert_eq!(inst.recipients(Target::Broadcast), 0b111);
        assert_eq!(inst.recipients(Target::Server), 1 << server);
        assert_eq!(
            inst.recipients(Target::Process(20)),
            (1 << client) | (1 << twin)
        );
        assert_eq!(inst.recipients(Target::Process(30)), 0);

        inst.release(server, false);
        assert_eq!(inst.recipients(Target::Server), 0);
    }

    #[test]
    fn command_slot_layout() {
        assert!(bytes_for_region() > size_of::<Snapshot>());
        assert_eq!(size_of::<CommandSlot>(), 4 + size_of::<Command>());
    }
}
