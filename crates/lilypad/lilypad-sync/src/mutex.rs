//! Cross-process mutual exclusion built on a binary named semaphore.

use crate::semaphore::NamedSemaphore;
use std::io;

/// A mutex shared by name between processes.
///
/// Unlike an OS mutex, the permit is not owned by a thread: whoever holds a
/// [`NamedMutexGuard`] releases it when the guard is dropped.
pub struct NamedMutex {
    sem: NamedSemaphore,
}

/// Proof that the named mutex is held. Dropping it unlocks.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl NamedMutex {
    /// Creates the mutex in the unlocked state, discarding any stale one.
    pub fn create(name: &str) -> io::Result<Self> {
        Ok(Self {
            sem: NamedSemaphore::create(name, 1)?,
        })
    }

    /// Opens a mutex created by another process.
    pub fn open(name: &str) -> io::Result<Self> {
        Ok(Self {
            sem: NamedSemaphore::open(name)?,
        })
    }

    pub fn unlink(name: &str) -> io::Result<()> {
        NamedSemaphore::unlink(name)
    }

    /// Blocks until the mutex is acquired.
    pub fn lock(&self) -> io::Result<NamedMutexGuard<'_>> {
        self.sem.wait()?;
        Ok(NamedMutexGuard { mutex: self })
    }

    /// Acquires the mutex only if it is free right now.
    pub fn try_lock(&self) -> io::Result<Option<NamedMutexGuard<'_>>> {
        if self.sem.try_wait()? {
            Ok(Some(NamedMutexGuard { mutex: self }))
        } else {
            Ok(None)
        }
    }

    pub fn name(&self) -> &str {
        self.sem.name()
    }
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        // A failing sem_post leaves the mutex locked; nothing sensible can be
        // done about it from a destructor.
        let _ = self.mutex.sem.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let name = format!("lp_mutex_guard_{}", std::process::id());
        let mutex = NamedMutex::create(&name).unwrap();

        {
            let _guard = mutex.lock().unwrap();
            assert!(mutex.try_lock().unwrap().is_none());
        }
        assert!(mutex.try_lock().unwrap().is_some());

        drop(mutex);
        NamedMutex::unlink(&name).unwrap();
    }

    #[test]
    fn excludes_across_handles() {
        let name = format!("lp_mutex_handles_{}", std::process::id());
        let a = NamedMutex::create(&name).unwrap();
        let b = NamedMutex::open(&name).unwrap();

        let held = a.lock().unwrap();
        assert!(b.try_lock().unwrap().is_none());
        drop(held);
        assert!(b.try_lock().unwrap().is_some());

        drop(a);
        drop(b);
        NamedMutex::unlink(&name).unwrap();
    }
}
