//! The master process.
//!
//! Owns the listening socket, the liveness channel and the pool records. It
//! never runs an async runtime: workers are forked from a single-threaded
//! process and each builds its own runtime afterwards.
//!
//! One tick of the supervision loop:
//!
//! ```text
//! wait ≤ tick_interval on the liveness channel (signals wake it early)
//!   → drain heartbeats
//!   → reap exited workers
//!   → kill workers with stale heartbeats
//!   → apply resize / ping requests
//!   → spawn up to the desired size
//! ```

use crate::config::{Config, WorkerConfig};
use crate::dispatch::DispatchChain;
use crate::error::StartupError;
use crate::server::control::ControlHandle;
use crate::server::listener::{ListenAddr, Listener};
use crate::server::liveness::Channel;
use crate::server::pidfile::PidFile;
use crate::server::pool::Pool;
use crate::server::worker::{self, ExitReason, WorkerSettings};
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Lifecycle of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Bound,
    Running,
    ShuttingDown,
    Terminated,
}

pub struct Supervisor {
    state: State,
    master_pid: i32,
    listener: Option<Listener>,
    channel: Channel,
    pool: Pool,
    /// Workers sent SIGTERM or SIGKILL that have not been reaped yet
    retiring: Vec<i32>,
    pid_file: Option<PidFile>,
    chain: DispatchChain,
    workers: WorkerConfig,
    control: ControlHandle,
    child_exited: Arc<AtomicBool>,
}

impl Supervisor {
    /// Acquires the pid file and the listening socket. Nothing is forked yet.
    pub fn bind(config: &Config, chain: DispatchChain) -> Result<Self, StartupError> {
        let mut state = State::Init;
        tracing::debug!(?state, "starting supervisor");

        let pid_file = match &config.server.pid_file {
            Some(path) => Some(PidFile::acquire(path)?),
            None => None,
        };

        let addr = ListenAddr::parse(&config.server.listen);
        let listener = Listener::bind(&addr)?;
        let channel = Channel::new()?;
        state = State::Bound;

        tracing::info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| addr.to_string()),
            pid = std::process::id(),
            "listening"
        );

        Ok(Self {
            state,
            master_pid: std::process::id() as i32,
            listener: Some(listener),
            channel,
            pool: Pool::new(config.workers.count),
            retiring: Vec::new(),
            pid_file,
            chain,
            workers: config.workers.clone(),
            control: ControlHandle::new(),
            child_exited: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed")),
        }
    }

    /// Forks the pool and supervises it until shutdown is requested.
    ///
    /// A failed fork ends the run with [`StartupError::Fork`] after the
    /// workers already started have been stopped.
    pub fn run(mut self) -> Result<(), StartupError> {
        let sigchld = signal_hook::flag::register(
            signal_hook::consts::SIGCHLD,
            Arc::clone(&self.child_exited),
        )?;

        self.state = State::Running;
        tracing::info!(workers = self.pool.desired(), "supervisor running");

        let result = self.supervise();

        self.shutdown();
        signal_hook::low_level::unregister(sigchld);
        result
    }

    fn supervise(&mut self) -> Result<(), StartupError> {
        self.spawn_missing()?;
        while !self.control.shutdown_requested() {
            self.tick()?;
        }
        tracing::info!("shutdown requested");
        Ok(())
    }

    fn tick(&mut self) -> Result<(), StartupError> {
        self.channel.wait(self.workers.tick_interval())?;
        self.child_exited.store(false, Ordering::SeqCst);

        let now = Instant::now();
        for pid in self.channel.drain()? {
            if !self.pool.heartbeat(pid, now) {
                tracing::debug!(worker = pid, "heartbeat from unknown worker");
            }
        }

        self.reap_exited();
        self.kill_stale(Instant::now());
        self.apply_control();
        self.spawn_missing()
    }

    fn spawn_missing(&mut self) -> Result<(), StartupError> {
        for _ in 0..self.pool.deficit() {
            let pid = self.spawn_worker()?;
            self.pool.add(pid, Instant::now());
            tracing::info!(worker = pid, workers = self.pool.len(), "spawned worker");
        }
        Ok(())
    }

    fn spawn_worker(&mut self) -> Result<i32, StartupError> {
        match unsafe { libc::fork() } {
            -1 => Err(StartupError::Fork(io::Error::last_os_error())),
            0 => {
                let code = catch_unwind(AssertUnwindSafe(|| self.run_child())).unwrap_or(101);
                std::process::exit(code);
            }
            pid => Ok(pid),
        }
    }

    /// Body of a freshly forked child. Never returns into the supervisor.
    fn run_child(&mut self) -> i32 {
        let liveness = match self.channel.detach_worker() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "worker could not take its liveness end");
                return 1;
            }
        };
        let Some(listener) = self.listener.take() else {
            return 1;
        };

        let settings = WorkerSettings {
            heartbeat_interval: self.workers.heartbeat_interval(),
            read_timeout: self.workers.read_timeout(),
            max_body: self.workers.max_body_bytes,
        };

        match worker::run(listener, liveness, &self.chain, settings) {
            Ok(ExitReason::SupervisorGone) | Ok(ExitReason::Terminated) => 0,
            Err(e) => {
                tracing::error!(error = ?e, "worker failed");
                1
            }
        }
    }

    /// Collects every exited child without blocking.
    fn reap_exited(&mut self) {
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                break;
            }

            if let Some(pos) = self.retiring.iter().position(|p| *p == pid) {
                self.retiring.swap_remove(pos);
                tracing::debug!(worker = pid, "retired worker reaped");
            } else if self.pool.remove(pid).is_some() {
                tracing::warn!(
                    worker = pid,
                    status = %describe_exit(status),
                    workers = self.pool.len(),
                    "worker exited"
                );
            }
        }
    }

    /// Workers whose heartbeat is older than the timeout are presumed hung,
    /// killed and dropped from the pool even if they are mid-request.
    fn kill_stale(&mut self, now: Instant) {
        for record in self.pool.stale(now, self.workers.timeout()) {
            tracing::warn!(
                worker = record.pid,
                heartbeat_age_ms = record.heartbeat_age(now).as_millis() as u64,
                timeout_ms = self.workers.timeout_ms,
                "worker missed heartbeats, killing"
            );
            signal(record.pid, libc::SIGKILL);
            self.pool.remove(record.pid);
            self.retiring.push(record.pid);
        }
    }

    fn apply_control(&mut self) {
        for _ in 0..self.control.take_increase() {
            let desired = self.pool.increase();
            tracing::info!(desired, "pool size increased");
        }

        for _ in 0..self.control.take_decrease() {
            let desired = self.pool.decrease();
            tracing::info!(desired, "pool size decreased");
        }

        for pid in self.pool.excess() {
            tracing::info!(worker = pid, "stopping surplus worker");
            signal(pid, libc::SIGTERM);
            self.pool.remove(pid);
            self.retiring.push(pid);
        }

        if self.control.take_ping() {
            let now = Instant::now();
            tracing::info!(
                state = ?self.state,
                desired = self.pool.desired(),
                actual = self.pool.len(),
                retiring = self.retiring.len(),
                "pong"
            );
            for record in self.pool.workers() {
                tracing::info!(
                    worker = record.pid,
                    uptime_ms = now.duration_since(record.spawned_at).as_millis() as u64,
                    heartbeat_age_ms = record.heartbeat_age(now).as_millis() as u64,
                    "worker status"
                );
            }
        }
    }

    /// Closes the liveness channel and the listening socket, gives workers
    /// the grace period to exit, kills the rest, then removes the socket file
    /// and the pid file.
    fn shutdown(&mut self) {
        if self.state == State::Terminated {
            return;
        }
        self.state = State::ShuttingDown;
        tracing::info!(workers = self.pool.len(), "shutting down");

        self.channel.close();
        let socket_path = self
            .listener
            .take()
            .and_then(|l| l.socket_path().map(|p| p.to_path_buf()));

        let deadline = Instant::now() + self.workers.shutdown_grace();
        loop {
            self.reap_exited();
            if (self.pool.is_empty() && self.retiring.is_empty()) || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }

        let stragglers: Vec<i32> = self.pool.pids().into_iter().chain(self.retiring.drain(..)).collect();
        for pid in stragglers {
            tracing::warn!(worker = pid, "worker ignored shutdown, killing");
            signal(pid, libc::SIGKILL);
            let mut status: libc::c_int = 0;
            unsafe { libc::waitpid(pid, &mut status, 0) };
            self.pool.remove(pid);
        }

        if let Some(path) = socket_path {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove socket file");
            }
        }
        self.pid_file.take();

        self.state = State::Terminated;
        tracing::info!("supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Forked children carry a copy of this value; only the master cleans up.
        if std::process::id() as i32 == self.master_pid && self.state != State::Terminated {
            self.shutdown();
        }
    }
}

fn signal(pid: i32, sig: libc::c_int) {
    if unsafe { libc::kill(pid, sig) } != 0 {
        let err = io::Error::last_os_error();
        tracing::debug!(worker = pid, signal = sig, error = %err, "kill failed");
    }
}

fn describe_exit(status: libc::c_int) -> String {
    if libc::WIFEXITED(status) {
        format!("exit code {}", libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        format!("killed by signal {}", libc::WTERMSIG(status))
    } else {
        format!("raw status {status}")
    }
}
