//! Control inputs for a running supervisor.
//!
//! Requests are recorded in atomics and picked up by the next supervisor
//! tick. Signal handlers only touch those atomics, which keeps them
//! async-signal-safe.

use signal_hook::consts::{SIGINT, SIGTERM, SIGTTIN, SIGTTOU, SIGUSR2};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Requests {
    increase: AtomicUsize,
    decrease: AtomicUsize,
    ping: AtomicBool,
}

/// Cloneable handle for resizing, pinging or stopping the supervisor.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    requests: Arc<Requests>,
    shutdown: Arc<AtomicBool>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the desired pool size by one.
    pub fn increase(&self) {
        self.requests.increase.fetch_add(1, Ordering::SeqCst);
    }

    /// Lower the desired pool size by one (never below one).
    pub fn decrease(&self) {
        self.requests.decrease.fetch_add(1, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Ask the supervisor to log its pool state.
    pub fn ping(&self) {
        self.requests.ping.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn take_increase(&self) -> usize {
        self.requests.increase.swap(0, Ordering::SeqCst)
    }

    pub(crate) fn take_decrease(&self) -> usize {
        self.requests.decrease.swap(0, Ordering::SeqCst)
    }

    pub(crate) fn take_ping(&self) -> bool {
        self.requests.ping.swap(false, Ordering::SeqCst)
    }

    /// Maps process signals onto this handle:
    /// `SIGTTIN` increase, `SIGTTOU` decrease, `SIGINT`/`SIGTERM` shutdown,
    /// `SIGUSR2` ping.
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.shutdown))?;
        }

        let requests = Arc::clone(&self.requests);
        unsafe {
            signal_hook::low_level::register(SIGTTIN, move || {
                requests.increase.fetch_add(1, Ordering::SeqCst);
            })?;
        }

        let requests = Arc::clone(&self.requests);
        unsafe {
            signal_hook::low_level::register(SIGTTOU, move || {
                requests.decrease.fetch_add(1, Ordering::SeqCst);
            })?;
        }

        let requests = Arc::clone(&self.requests);
        unsafe {
            signal_hook::low_level::register(SIGUSR2, move || {
                requests.ping.store(true, Ordering::SeqCst);
            })?;
        }

        Ok(())
    }
}
