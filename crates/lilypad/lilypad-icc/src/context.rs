//! Per-session state shared between the facade and the protocol thread.

use crate::error::IccError;
use crate::region::Region;
use crate::shm_layout::COMMAND_CAPACITY;
use lilypad_config::SessionConfig;
use lilypad_events::{Command, Snapshot};
use lilypad_sync::{NamedEvent, NamedMutex, NamedSemaphore, ShutdownEvent};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

pub type DataHandler = Arc<dyn Fn(&Snapshot) + Send + Sync>;
pub type CommandHandler = Arc<dyn Fn(&Command) + Send + Sync>;

/// Semaphore name suffixes, in acquisition order.
pub(crate) const DATA_MUTEX: &str = "data";
pub(crate) const INSTANCES_MUTEX: &str = "instances";
pub(crate) const READ_MUTEX: &str = "read";
pub(crate) const WRITE_MUTEX: &str = "write";
pub(crate) const READ_SLOTS: &str = "read_slots";
pub(crate) const WRITE_SLOTS: &str = "write_slots";

const SEMAPHORES: [&str; 6] = [
    DATA_MUTEX,
    INSTANCES_MUTEX,
    READ_MUTEX,
    WRITE_MUTEX,
    READ_SLOTS,
    WRITE_SLOTS,
];

/// `acked_epoch` value before the first acknowledgement.
pub(crate) const NEVER_ACKED: u64 = u64::MAX;

/// Named objects of one session.
///
/// Fields drop in declaration order, which is the reverse of the order
/// `acquire` takes them in.
pub(crate) struct Primitives {
    pub broadcast: NamedEvent,
    pub shutdown: ShutdownEvent,
    pub write_slots: NamedSemaphore,
    pub read_slots: NamedSemaphore,
    pub write_mutex: NamedMutex,
    pub read_mutex: NamedMutex,
    pub instances_mutex: NamedMutex,
    pub data_mutex: NamedMutex,
}

fn acquire_err(what: &'static str, name: String) -> impl FnOnce(io::Error) -> IccError {
    move |source| IccError::Acquire { what, name, source }
}

fn mutex(config: &SessionConfig, role: &str, is_creator: bool) -> Result<NamedMutex, IccError> {
    let name = config.semaphore_name(role);
    let mutex = if is_creator {
        NamedMutex::create(&name)
    } else {
        NamedMutex::open(&name)
    };
    mutex.map_err(acquire_err("mutex", name))
}

fn semaphore(
    config: &SessionConfig,
    role: &str,
    initial: u32,
    is_creator: bool,
) -> Result<NamedSemaphore, IccError> {
    let name = config.semaphore_name(role);
    let sem = if is_creator {
        NamedSemaphore::create(&name, initial)
    } else {
        NamedSemaphore::open(&name)
    };
    sem.map_err(acquire_err("semaphore", name))
}

impl Primitives {
    /// Acquires every named object in a fixed order. The creator replaces
    /// any stale objects with fresh ones; everyone else opens what the
    /// creator made.
    ///
    /// An error at any step returns early, dropping (and so releasing) the
    /// objects taken by the steps before it, newest first.
    pub fn acquire(config: &SessionConfig, is_creator: bool) -> Result<Self, IccError> {
        let data_mutex = mutex(config, DATA_MUTEX, is_creator)?;
        let instances_mutex = mutex(config, INSTANCES_MUTEX, is_creator)?;
        let read_mutex = mutex(config, READ_MUTEX, is_creator)?;
        let write_mutex = mutex(config, WRITE_MUTEX, is_creator)?;
        let read_slots = semaphore(config, READ_SLOTS, 0, is_creator)?;
        let write_slots = semaphore(config, WRITE_SLOTS, COMMAND_CAPACITY as u32, is_creator)?;
        let shutdown = ShutdownEvent::new();

        let event_path = config.broadcast_event_path();
        let broadcast = if is_creator {
            NamedEvent::create(&event_path)
        } else {
            NamedEvent::open(&event_path)
        }
        .map_err(acquire_err("event", event_path.display().to_string()))?;

        Ok(Self {
            broadcast,
            shutdown,
            write_slots,
            read_slots,
            write_mutex,
            read_mutex,
            instances_mutex,
            data_mutex,
        })
    }
}

/// Removes every named object of a session from the system. Objects that
/// are already gone are skipped; the first real failure is reported after
/// trying the rest.
pub(crate) fn unlink_all(config: &SessionConfig) -> Result<(), IccError> {
    let mut first_err = None;
    let mut note = |name: String, res: io::Result<()>| {
        if let Err(source) = res {
            first_err.get_or_insert(IccError::Unlink { name, source });
        }
    };

    let region = config.region_path();
    note(region.display().to_string(), Region::unlink(&region));
    let event = config.broadcast_event_path();
    note(event.display().to_string(), NamedEvent::unlink(&event));
    for role in SEMAPHORES {
        let name = config.semaphore_name(role);
        let res = NamedSemaphore::unlink(&name);
        note(name, res);
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Default)]
pub(crate) struct Handlers {
    pub data: Option<DataHandler>,
    pub command: Option<CommandHandler>,
}

pub(crate) struct Shared {
    // Drop order is declaration order: the reverse of acquisition
    // (region, local handler lock, named primitives).
    pub prims: Primitives,
    pub handlers: Mutex<Handlers>,
    pub region: Region,

    pub config: SessionConfig,
    pub pid: i32,
    pub slot: u32,
    /// Barrier epoch this session last acknowledged.
    pub acked_epoch: AtomicU64,
}

impl Shared {
    #[inline]
    pub fn is_creator(&self) -> bool {
        self.region.is_creator()
    }

    #[inline]
    pub fn slot_bit(&self) -> u32 {
        1 << self.slot
    }

    /// Handler slots. A handler that panicked while the lock was held
    /// cannot leave the slots half-written, so poisoning is ignored.
    pub fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn data_handler(&self) -> Option<DataHandler> {
        self.handlers().data.clone()
    }

    pub fn command_handler(&self) -> Option<CommandHandler> {
        self.handlers().command.clone()
    }
}

/// Runs a user handler; a panic is logged instead of unwinding into the
/// protocol loop.
pub(crate) fn invoke<T: ?Sized>(what: &str, handler: &(dyn Fn(&T) + Send + Sync), value: &T) {
    if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
        error!(handler = what, "handler panicked");
    }
}
