//! Creation of, and attachment to, the shared region.
//!
//! The first process to create the region file becomes the creator. It
//! initializes the contents and publishes the header magic last; everyone
//! else maps the existing file and waits for the magic before touching
//! anything.

use crate::error::IccError;
use crate::ring::{next_index, slot_of};
use crate::shm_layout::{
    COMMAND_CAPACITY, CommandSlot, Instances, REGION_MAGIC, REGION_VERSION, RegionHeader,
    SharedRegion, bytes_for_region,
};
use lilypad_config::SessionConfig;
use lilypad_events::{Command, Snapshot};
use lilypad_mmap::MmapFileMut;
use lilypad_sync::NamedMutexGuard;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Pause between attempts while waiting for a creator.
const ATTACH_RETRY: Duration = Duration::from_millis(1);

/// One process's mapping of the session region.
pub struct Region {
    base: *mut SharedRegion,
    is_creator: bool,
    /// Set once the creator stored the magic; an unpublished region is
    /// removed again when its creator drops it.
    published: AtomicBool,
    path: PathBuf,
    _mm: MmapFileMut,
}

// SAFETY: the mapping is process-shared memory. Every non-atomic field is
// only accessed while holding the named mutex that guards it (see
// `shm_layout`), which serializes threads as well as processes.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Creates the region exclusively, or attaches to the existing one.
    ///
    /// Attaching waits (up to the configured attach timeout) for the file to
    /// reach full size and for the creator to publish the header, then
    /// validates the header against this build.
    pub fn open_or_create(config: &SessionConfig) -> Result<Self, IccError> {
        let path = config.region_path();
        let size = bytes_for_region() as u64;
        let started = Instant::now();
        let deadline = started + config.attach_timeout();

        let region_err = |source: io::Error| IccError::Region {
            path: path.display().to_string(),
            source,
        };

        loop {
            match MmapFileMut::create_new(&path, size) {
                Ok(mm) => return Ok(Self::from_mapping(mm, true, &path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(region_err(e)),
            }

            match MmapFileMut::open_rw(&path, size) {
                Ok(mm) => {
                    let region = Self::from_mapping(mm, false, &path);
                    region.wait_published(deadline, started)?;
                    return Ok(region);
                }
                // Creator still sizing the file, or the last session just
                // removed it and the next create attempt will succeed.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::InvalidData
                    ) =>
                {
                    if Instant::now() >= deadline {
                        debug!(error = %e, "region never became attachable");
                        return Err(IccError::AttachTimeout {
                            path: path.display().to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(ATTACH_RETRY);
                }
                Err(e) => return Err(region_err(e)),
            }
        }
    }

    fn from_mapping(mut mm: MmapFileMut, is_creator: bool, path: &Path) -> Self {
        let base = mm.as_mut_ptr() as *mut SharedRegion;
        Self {
            base,
            is_creator,
            published: AtomicBool::new(false),
            path: path.to_path_buf(),
            _mm: mm,
        }
    }

    fn wait_published(&self, deadline: Instant, started: Instant) -> Result<(), IccError> {
        loop {
            if self.header().magic.load(Ordering::Acquire) == REGION_MAGIC {
                return self.header().validate().map_err(IccError::Layout);
            }
            if Instant::now() >= deadline {
                return Err(IccError::AttachTimeout {
                    path: self.path.display().to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(ATTACH_RETRY);
        }
    }

    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    /// Zero-fills the region and writes every header field but the magic.
    /// Creator only, before anyone else can attach.
    pub fn initialize(&self) {
        debug_assert!(self.is_creator);
        // SAFETY: the creator has the only view on an unpublished region;
        // attachers do not read anything until the magic is stored.
        unsafe {
            ptr::write_bytes(self.base as *mut u8, 0, bytes_for_region());
            let h = ptr::addr_of_mut!((*self.base).header);
            ptr::write(
                h,
                RegionHeader {
                    magic: AtomicU64::new(0),
                    version: REGION_VERSION,
                    capacity: COMMAND_CAPACITY as u64,
                    snapshot_size: size_of::<Snapshot>() as u64,
                    command_size: size_of::<Command>() as u64,
                    region_size: bytes_for_region() as u64,
                },
            );
        }
    }

    /// Makes an initialized region visible to attaching processes.
    pub fn publish(&self) {
        self.header().magic.store(REGION_MAGIC, Ordering::Release);
        self.published.store(true, Ordering::Release);
    }

    #[inline(always)]
    fn header(&self) -> &RegionHeader {
        // SAFETY: base points to a mapped SharedRegion for the life of self
        unsafe { &(*self.base).header }
    }

    #[inline(always)]
    pub fn snapshot_seq(&self) -> &AtomicU64 {
        // SAFETY: atomic field, valid for the life of the mapping
        unsafe { &(*self.base).snapshot_seq }
    }

    /// Runs `f` on the instance table. `_guard` must be the instances mutex.
    pub fn with_instances<R>(
        &self,
        _guard: &NamedMutexGuard<'_>,
        f: impl FnOnce(&mut Instances) -> R,
    ) -> R {
        // SAFETY: the instances mutex is held, so no other thread or process
        // touches the table until the guard drops.
        let instances = unsafe { &mut *ptr::addr_of_mut!((*self.base).instances) };
        f(instances)
    }

    /// Overwrites the snapshot and bumps its sequence. `_guard` must be the
    /// data mutex.
    pub fn store_snapshot(&self, _guard: &NamedMutexGuard<'_>, snapshot: &Snapshot) -> u64 {
        // SAFETY: data mutex held
        unsafe { ptr::addr_of_mut!((*self.base).snapshot).write(*snapshot) };
        self.snapshot_seq().fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Copies the snapshot and its sequence. `_guard` must be the data mutex.
    pub fn load_snapshot(&self, _guard: &NamedMutexGuard<'_>) -> (Snapshot, u64) {
        // SAFETY: data mutex held
        let snapshot = unsafe { ptr::addr_of!((*self.base).snapshot).read() };
        (snapshot, self.snapshot_seq().load(Ordering::SeqCst))
    }

    /// Writes `command` at the write index and advances it. `_guard` must be
    /// the write mutex and the caller must hold a write-slot permit, which
    /// guarantees the slot is not waiting to be read.
    pub fn push_command(&self, _guard: &NamedMutexGuard<'_>, command: Command) {
        // SAFETY: write mutex held; the slot is free per the permit
        unsafe {
            let ring = ptr::addr_of_mut!((*self.base).ring);
            let write_index = ptr::addr_of!((*ring).write_index).read();
            ptr::addr_of_mut!((*ring).slots[slot_of(write_index)]).write(CommandSlot {
                delivered: 0,
                command,
            });
            ptr::addr_of_mut!((*ring).write_index).write(next_index(write_index));
        }
    }

    /// Copy of the slot at the read index. `_guard` must be the read mutex
    /// and the caller must hold a read-slot permit.
    pub fn head_command(&self, _guard: &NamedMutexGuard<'_>) -> CommandSlot {
        // SAFETY: read mutex held; the slot is filled per the permit
        unsafe {
            let ring = ptr::addr_of!((*self.base).ring);
            let read_index = ptr::addr_of!((*ring).read_index).read();
            ptr::addr_of!((*ring).slots[slot_of(read_index)]).read()
        }
    }

    /// Records `bits` as having received the head command.
    pub fn mark_head_delivered(&self, _guard: &NamedMutexGuard<'_>, bits: u32) {
        // SAFETY: read mutex held
        unsafe {
            let ring = ptr::addr_of_mut!((*self.base).ring);
            let read_index = ptr::addr_of!((*ring).read_index).read();
            let delivered = ptr::addr_of_mut!((*ring).slots[slot_of(read_index)].delivered);
            delivered.write(delivered.read() | bits);
        }
    }

    /// Drops `bit` from every ring slot's delivered mask, so an instance
    /// slot handed out again starts without its previous owner's history.
    pub fn forget_delivered(&self, _guard: &NamedMutexGuard<'_>, bit: u32) {
        // SAFETY: read mutex held
        unsafe {
            let ring = ptr::addr_of_mut!((*self.base).ring);
            for i in 0..COMMAND_CAPACITY {
                let delivered = ptr::addr_of_mut!((*ring).slots[i].delivered);
                delivered.write(delivered.read() & !bit);
            }
        }
    }

    /// Consumes the head slot by advancing the read index.
    pub fn retire_head(&self, _guard: &NamedMutexGuard<'_>) {
        // SAFETY: read mutex held
        unsafe {
            let ring = ptr::addr_of_mut!((*self.base).ring);
            let read_index = ptr::addr_of!((*ring).read_index).read();
            ptr::addr_of_mut!((*ring).read_index).write(next_index(read_index));
        }
    }

    /// Current (write, read) ring indices.
    #[cfg(test)]
    fn ring_indices(&self, _write: &NamedMutexGuard<'_>) -> (u32, u32) {
        // SAFETY: the tests below use one lock for both ends
        unsafe {
            let ring = ptr::addr_of!((*self.base).ring);
            (
                ptr::addr_of!((*ring).write_index).read(),
                ptr::addr_of!((*ring).read_index).read(),
            )
        }
    }

    /// Removes the region file. Missing files are not an error.
    pub fn unlink(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // A creator that failed before publishing leaves nothing behind.
        if self.is_creator && !self.published.load(Ordering::Acquire) {
            let _ = Self::unlink(&self.path);
        }
    }
}
