//! Named manual-reset event.
//!
//! The event is a single flag word at the start of its own small mapped
//! file. It is only ever polled, never waited on, so no kernel wait object
//! is needed: setting it is a store, checking it is a load.

use lilypad_mmap::MmapFileMut;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Length of the backing file. Only the first word is used.
const EVENT_FILE_LEN: u64 = 8;

const UNSET: u32 = 0;
const SET: u32 = 1;

/// A manual-reset event shared by every process that maps the same path.
/// Once set it stays set until someone calls [`NamedEvent::reset`].
pub struct NamedEvent {
    flag: *const AtomicU32,
    _mm: MmapFileMut,
}

// SAFETY: the only access to the mapping goes through the atomic flag.
unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Creates the event file in the unset state, replacing a stale one.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut mm = MmapFileMut::create_rw(path, EVENT_FILE_LEN)?;
        let flag = mm.as_mut_ptr() as *const AtomicU32;
        // SAFETY: the mapping is page aligned and at least 4 bytes long.
        unsafe { (*flag).store(UNSET, Ordering::Release) };
        Ok(Self { flag, _mm: mm })
    }

    /// Opens an event created by another process.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut mm = MmapFileMut::open_rw(path, EVENT_FILE_LEN)?;
        let flag = mm.as_mut_ptr() as *const AtomicU32;
        Ok(Self { flag, _mm: mm })
    }

    pub fn unlink<P: AsRef<Path>>(path: P) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    #[inline]
    fn flag(&self) -> &AtomicU32 {
        // SAFETY: `flag` points into `_mm`, which lives as long as `self`.
        unsafe { &*self.flag }
    }

    pub fn set(&self) {
        self.flag().store(SET, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag().store(UNSET, Ordering::SeqCst);
    }

    /// Non-blocking check.
    pub fn is_set(&self) -> bool {
        self.flag().load(Ordering::SeqCst) == SET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_visible_through_other_handle() {
        let path = std::env::temp_dir().join(format!("lp_event_{}", std::process::id()));
        let a = NamedEvent::create(&path).unwrap();
        let b = NamedEvent::open(&path).unwrap();

        assert!(!b.is_set());
        a.set();
        assert!(b.is_set());
        // manual reset: checking does not clear it
        assert!(b.is_set());
        b.reset();
        assert!(!a.is_set());

        drop(a);
        drop(b);
        NamedEvent::unlink(&path).unwrap();
        NamedEvent::unlink(&path).unwrap();
    }
}
