//! Public facade: one attached session of a shared region.

use crate::broadcast;
use crate::command;
use crate::context::{NEVER_ACKED, Primitives, Shared, unlink_all};
use crate::error::IccError;
use crate::protocol::{self, ProtocolExit};
use crate::region::Region;
use crate::shm_layout::MAX_INSTANCES;
use lilypad_config::SessionConfig;
use lilypad_events::{Command, CommandInfo, CommandResult, Snapshot, Target};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// A process's membership in a shared session.
///
/// Every session runs a protocol thread that delivers broadcast snapshots
/// and addressed commands to the registered handlers. Handlers run on that
/// thread; they may call back into the session, but a handler that sends a
/// command into a full ring which only its own session drains blocks
/// forever.
///
/// Dropping the session (or calling [`Session::close`]) stops the protocol
/// thread and detaches. The last session to detach removes every named
/// object of the session.
pub struct Session {
    shared: Arc<Shared>,
    protocol: Option<JoinHandle<ProtocolExit>>,
    exit: Option<ProtocolExit>,
}

impl Session {
    /// Creates the session's region, or attaches to the existing one, and
    /// starts the protocol thread.
    ///
    /// On error everything acquired so far has been released again.
    pub fn open_or_create(config: SessionConfig) -> Result<Self, IccError> {
        config.validate()?;

        let region = Region::open_or_create(&config)?;
        let is_creator = region.is_creator();
        let rollback = Unpublished::new(&config, is_creator);
        let prims = Primitives::acquire(&config, is_creator)?;
        if is_creator {
            region.initialize();
        }

        let pid = std::process::id() as i32;
        let slot = {
            let mutex = &prims.instances_mutex;
            let guard = mutex.lock().map_err(|e| IccError::wait(mutex.name(), e))?;
            region.with_instances(&guard, |inst| inst.claim(pid, is_creator))
        }
        .ok_or(IccError::InstanceTableFull(MAX_INSTANCES))?;

        if is_creator {
            region.publish();
        }
        rollback.disarm();

        let shared = Arc::new(Shared {
            prims,
            handlers: Mutex::default(),
            region,
            config,
            pid,
            slot,
            acked_epoch: AtomicU64::new(NEVER_ACKED),
        });

        let protocol = match protocol::spawn(Arc::clone(&shared)) {
            Ok(handle) => handle,
            Err(e) => {
                detach(&shared);
                return Err(e);
            }
        };

        info!(
            session = %shared.config.session,
            pid,
            slot,
            creator = is_creator,
            "attached to session"
        );
        Ok(Self {
            shared,
            protocol: Some(protocol),
            exit: None,
        })
    }

    /// Like [`Session::open_or_create`], but a failure is fatal: it is logged
    /// and the process exits with status 1.
    pub fn open_or_exit(config: SessionConfig) -> Self {
        let session = config.session.clone();
        match Self::open_or_create(config) {
            Ok(s) => s,
            Err(e) => {
                let cause = std::error::Error::source(&e).map(ToString::to_string);
                error!(%session, error = %e, cause = ?cause, "failed to open session");
                std::process::exit(1);
            }
        }
    }

    /// Removes every named object of the session in `config`, attached or
    /// not. Recovers from sessions whose processes died without detaching.
    pub fn purge(config: &SessionConfig) -> Result<(), IccError> {
        config.validate()?;
        unlink_all(config)?;
        info!(session = %config.session, "purged session objects");
        Ok(())
    }

    /// Copy of the current snapshot.
    pub fn read_data(&self) -> Result<Snapshot, IccError> {
        broadcast::read_data(&self.shared)
    }

    /// Replaces the snapshot and notifies every attached session.
    pub fn write_data(&self, snapshot: &Snapshot) -> Result<(), IccError> {
        broadcast::write_data(&self.shared, snapshot)
    }

    /// Enqueues a command, blocking while the ring is full.
    pub fn write_command(&self, command: Command) -> Result<(), IccError> {
        command::write_command(&self.shared, command)
    }

    pub fn send_info(&self, info: CommandInfo, target: Target) -> Result<(), IccError> {
        self.write_command(Command::info(self.shared.pid, target, info))
    }

    pub fn send_result(&self, result: CommandResult, target: Target) -> Result<(), IccError> {
        self.write_command(Command::result(self.shared.pid, target, result))
    }

    /// Sets the handler for new snapshots, replacing any previous one.
    ///
    /// The protocol thread takes its own reference to the handler before
    /// calling it, so a handler it picked up just before the swap may still
    /// run once after this returns.
    pub fn register_data_handler<F>(&self, handler: F)
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.shared.handlers().data = Some(Arc::new(handler));
    }

    /// Sets the handler for commands addressed to this session, replacing
    /// any previous one. As with [`Session::register_data_handler`], the
    /// previous handler may finish one last call after this returns.
    pub fn register_command_handler<F>(&self, handler: F)
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.shared.handlers().command = Some(Arc::new(handler));
    }

    /// Stops snapshot delivery to a handler. A call already picked up by
    /// the protocol thread still completes.
    pub fn clear_data_handler(&self) {
        self.shared.handlers().data = None;
    }

    /// Commands that arrive without a handler are still acknowledged, so
    /// they are lost to this session rather than held for a later one.
    pub fn clear_command_handler(&self) {
        self.shared.handlers().command = None;
    }

    pub fn is_creator(&self) -> bool {
        self.shared.is_creator()
    }

    pub fn pid(&self) -> i32 {
        self.shared.pid
    }

    pub fn instance_slot(&self) -> u32 {
        self.shared.slot
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Whether the protocol thread is still delivering.
    pub fn is_running(&self) -> bool {
        self.protocol.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the protocol thread and detaches. Returns how the thread ended.
    pub fn close(mut self) -> ProtocolExit {
        self.shutdown()
    }

    fn shutdown(&mut self) -> ProtocolExit {
        if let Some(exit) = self.exit {
            return exit;
        }

        let exit = match self.shared.prims.shutdown.set() {
            Ok(()) => match self.protocol.take() {
                Some(handle) => handle.join().unwrap_or(ProtocolExit::Failed),
                None => ProtocolExit::Clean,
            },
            Err(e) => {
                // the thread cannot be told to stop; leave it detached
                error!(error = %e, "failed to signal protocol thread");
                self.protocol = None;
                ProtocolExit::Failed
            }
        };

        detach(&self.shared);
        self.exit = Some(exit);
        info!(
            session = %self.shared.config.session,
            slot = self.shared.slot,
            code = exit.code(),
            "detached from session"
        );
        exit
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Removes the named objects a creator made when opening fails before the
/// region is published. Nobody else can be attached at that point.
struct Unpublished<'a> {
    config: &'a SessionConfig,
    armed: bool,
}

impl<'a> Unpublished<'a> {
    fn new(config: &'a SessionConfig, is_creator: bool) -> Self {
        Self {
            config,
            armed: is_creator,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Unpublished<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match unlink_all(self.config) {
            Ok(()) => debug!(session = %self.config.session, "rolled back unpublished session"),
            Err(e) => warn!(error = %e, "failed to roll back unpublished session"),
        }
    }
}

/// Gives the instance slot back and withdraws any acknowledgement of the
/// current round. The last session out removes the named objects.
fn detach(shared: &Shared) {
    // the protocol thread is gone, nothing marks this slot again
    let read_mutex = &shared.prims.read_mutex;
    match read_mutex.lock() {
        Ok(read_guard) => shared.region.forget_delivered(&read_guard, shared.slot_bit()),
        Err(e) => warn!(error = %e, "failed to lock command ring, delivery marks kept"),
    }

    let mutex = &shared.prims.instances_mutex;
    let guard = match mutex.lock() {
        Ok(guard) => guard,
        Err(e) => {
            warn!(error = %e, "failed to lock instance table, slot not released");
            return;
        }
    };

    let remaining = shared.region.with_instances(&guard, |inst| {
        let acked = shared.acked_epoch.load(Ordering::SeqCst) == inst.barrier_epoch;
        let outcome = inst.release(shared.slot, acked);
        broadcast::finish_round(shared, outcome);
        inst.instance_count
    });
    debug!(slot = shared.slot, remaining, "released instance slot");

    if remaining == 0 {
        if let Err(e) = unlink_all(&shared.config) {
            warn!(error = %e, "failed to remove session objects");
        }
    }
    drop(guard);
}
