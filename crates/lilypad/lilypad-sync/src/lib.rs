//! Named synchronization objects shared between unrelated processes.
//!
//! Every object here is identified by a name (or a path) so that processes
//! which agree on a session identifier rendezvous on the same instance:
//!
//! - [`NamedSemaphore`]: POSIX named counting semaphore.
//! - [`NamedMutex`]: binary named semaphore with a scoped guard.
//! - [`NamedEvent`]: manual-reset flag living in its own named mapping.
//! - [`ShutdownEvent`]: process-local manual-reset event with timed wait.
//!
//! All of them release their OS handle on drop. None of them removes the
//! underlying name on drop; that is an explicit `unlink`, because the name
//! outlives any single process.

mod event;
mod mutex;
mod semaphore;
mod shutdown;

pub use event::NamedEvent;
pub use mutex::{NamedMutex, NamedMutexGuard};
pub use semaphore::NamedSemaphore;
pub use shutdown::{ShutdownEvent, WaitOutcome};
