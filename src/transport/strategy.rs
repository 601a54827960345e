//! Server concurrency strategies
//!
//! One server core, four ways to execute a unit of inbound work:
//!
//! | Strategy    | Execution context          | A held bundle blocks    |
//! |-------------|----------------------------|-------------------------|
//! | `Blocking`  | the accept loop itself     | the whole server        |
//! | `Threaded`  | a worker thread per unit   | that worker only        |
//! | `Forked`    | a child process per unit   | that child only (unix)  |
//!
//! Streaming servers do not use a strategy object; their unit of
//! concurrency is the connection thread (see `transport::stream`).
//!
//! Every strategy supports a bounded-join shutdown: stop accepting work,
//! wait up to a deadline for in-flight units, report what is left.

use crate::error::{Error, Result};
use std::time::Duration;

#[cfg(unix)]
use std::time::Instant;

/// One unit of inbound work, ready to run on whatever context the
/// strategy provides
pub type WorkUnit = Box<dyn FnOnce() + Send>;

/// Capability trait: execute one unit, then later join everything
pub trait ConcurrencyStrategy: Send {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Run one unit of work
    ///
    /// Spawn failure (thread or process) is reported to the caller; the
    /// unit is dropped in that case, never silently retried.
    fn execute(&mut self, unit: WorkUnit) -> Result<()>;

    /// Stop tracking new work and wait up to `deadline` for in-flight
    /// units to finish
    fn shutdown(&mut self, deadline: Duration) -> Result<()>;
}

// ============================================================================
// Blocking
// ============================================================================

/// Runs each unit inline on the accept loop
///
/// Holding a future-tagged bundle stalls all other message processing
/// until the tag elapses. That backpressure is the documented point of
/// this strategy, not a defect.
pub struct Blocking;

impl ConcurrencyStrategy for Blocking {
    fn name(&self) -> &'static str {
        "blocking"
    }

    fn execute(&mut self, unit: WorkUnit) -> Result<()> {
        unit();
        Ok(())
    }

    fn shutdown(&mut self, _deadline: Duration) -> Result<()> {
        // Nothing in flight: units finish before execute() returns
        Ok(())
    }
}

// ============================================================================
// Threaded
// ============================================================================

/// Spawns a named worker thread per unit
pub struct Threaded {
    active: std::sync::Arc<(parking_lot::Mutex<usize>, parking_lot::Condvar)>,
    spawned: u64,
}

impl Threaded {
    pub fn new() -> Self {
        Self {
            active: std::sync::Arc::new((parking_lot::Mutex::new(0), parking_lot::Condvar::new())),
            spawned: 0,
        }
    }

    /// Workers currently running
    pub fn active_count(&self) -> usize {
        *self.active.0.lock()
    }
}

impl Default for Threaded {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyStrategy for Threaded {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn execute(&mut self, unit: WorkUnit) -> Result<()> {
        self.spawned += 1;
        let active = std::sync::Arc::clone(&self.active);
        *active.0.lock() += 1;

        let worker = std::thread::Builder::new()
            .name(format!("osc-worker-{}", self.spawned))
            .spawn({
                let active = std::sync::Arc::clone(&self.active);
                move || {
                    unit();
                    let (count, cond) = &*active;
                    *count.lock() -= 1;
                    cond.notify_all();
                }
            });

        if let Err(e) = worker {
            *active.0.lock() -= 1;
            return Err(Error::Spawn(e.to_string()));
        }
        Ok(())
    }

    fn shutdown(&mut self, deadline: Duration) -> Result<()> {
        let (count, cond) = &*self.active;
        let mut guard = count.lock();
        if *guard > 0 {
            log::info!("waiting for {} worker(s) to finish", *guard);
        }
        while *guard > 0 {
            if cond.wait_for(&mut guard, deadline).timed_out() && *guard > 0 {
                return Err(Error::ShutdownTimeout { pending: *guard });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Forked (unix only)
// ============================================================================

/// Forks a child process per unit
///
/// The child inherits a copy-on-write view of the parent (registered
/// handlers included), runs the unit, and `_exit`s without unwinding.
/// Handler side effects on parent memory are therefore invisible to the
/// parent; anything observable must leave via the network. The parent
/// reaps finished children opportunistically on each execute and does a
/// bounded reap-then-kill pass on shutdown.
#[cfg(unix)]
pub struct Forked {
    children: Vec<libc::pid_t>,
}

#[cfg(unix)]
impl Forked {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    /// Children not yet reaped
    pub fn active_count(&self) -> usize {
        self.children.len()
    }

    /// Reap exited children without blocking
    fn reap(&mut self) {
        self.children.retain(|&pid| {
            let mut status: libc::c_int = 0;
            // SAFETY: waitpid on a child pid we forked; WNOHANG never blocks
            let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            reaped != pid
        });
    }
}

#[cfg(unix)]
impl Default for Forked {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl ConcurrencyStrategy for Forked {
    fn name(&self) -> &'static str {
        "forked"
    }

    fn execute(&mut self, unit: WorkUnit) -> Result<()> {
        self.reap();
        // SAFETY: the child calls _exit after the unit, so no destructors,
        // locks, or buffered state from the parent are re-entered
        match unsafe { libc::fork() } {
            -1 => Err(Error::Spawn(std::io::Error::last_os_error().to_string())),
            0 => {
                unit();
                // SAFETY: terminate the child without unwinding into the
                // parent's copied state
                unsafe { libc::_exit(0) }
            }
            pid => {
                log::trace!("forked child {} ({} live)", pid, self.children.len() + 1);
                self.children.push(pid);
                Ok(())
            }
        }
    }

    fn shutdown(&mut self, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        while !self.children.is_empty() && start.elapsed() < deadline {
            self.reap();
            if !self.children.is_empty() {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        if !self.children.is_empty() {
            log::warn!(
                "killing {} child process(es) still running at shutdown",
                self.children.len()
            );
            for &pid in &self.children {
                // SAFETY: signalling our own child processes
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                    libc::waitpid(pid, std::ptr::null_mut(), 0);
                }
            }
            let pending = self.children.len();
            self.children.clear();
            return Err(Error::ShutdownTimeout { pending });
        }
        Ok(())
    }
}
