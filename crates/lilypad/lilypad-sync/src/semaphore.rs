//! POSIX named counting semaphores (`sem_open` and friends).

use std::ffi::CString;
use std::io;

/// Permission bits for newly created semaphores: owner read/write.
const SEM_MODE: libc::c_uint = 0o600;

/// A counting semaphore visible to every process that opens the same name.
///
/// The handle is closed on drop; the name stays in the system until
/// [`NamedSemaphore::unlink`] is called.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: a `sem_t` obtained from `sem_open` may be used from any thread;
// every operation on it is atomic with respect to other threads and
// processes.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

/// POSIX semaphore names start with a single '/' and contain no other slash.
fn posix_name(name: &str) -> io::Result<CString> {
    let trimmed = name.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid semaphore name '{name}'"),
        ));
    }
    CString::new(format!("/{trimmed}"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl NamedSemaphore {
    /// Creates a fresh semaphore with `initial` permits.
    ///
    /// A leftover semaphore with the same name (from a session that was not
    /// shut down cleanly) is unlinked first, so the count always starts at
    /// `initial`.
    pub fn create(name: &str, initial: u32) -> io::Result<Self> {
        let c_name = posix_name(name)?;
        Self::unlink(name)?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                SEM_MODE,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Opens a semaphore some other process already created.
    pub fn open(name: &str) -> io::Result<Self> {
        let c_name = posix_name(name)?;

        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Removes the name from the system. Missing names are not an error.
    pub fn unlink(name: &str) -> io::Result<()> {
        let c_name = posix_name(name)?;
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Takes one permit, blocking until one is available.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    /// Takes one permit if one is available right now.
    ///
    /// Returns `Ok(false)` when the count is zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Returns one permit.
    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}
