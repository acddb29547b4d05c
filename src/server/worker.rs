//! The loop run by every forked worker process.
//!
//! A worker owns a single-threaded tokio runtime and handles one connection
//! at a time. Between connections it waits on four things at once:
//!
//! - the liveness channel, whose EOF means the supervisor is gone
//! - `SIGTERM`, sent when the pool shrinks
//! - the heartbeat timer
//! - the shared listening socket

use crate::dispatch::DispatchChain;
use crate::http::connection::Connection;
use crate::http::request::ConnectionInfo;
use crate::server::listener::Listener;
use crate::server::liveness::encode_heartbeat;
use anyhow::Context;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tracing::Instrument;

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub heartbeat_interval: Duration,
    pub read_timeout: Duration,
    pub max_body: usize,
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    SupervisorGone,
    Terminated,
}

enum WorkerListener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

enum Accepted {
    Tcp(TcpStream, SocketAddr),
    Unix(UnixStream),
}

impl WorkerListener {
    fn from_std(listener: Listener) -> io::Result<Self> {
        match listener {
            Listener::Tcp(l) => {
                l.set_nonblocking(true)?;
                Ok(WorkerListener::Tcp(TcpListener::from_std(l)?))
            }
            Listener::Unix { listener, .. } => {
                listener.set_nonblocking(true)?;
                Ok(WorkerListener::Unix(UnixListener::from_std(listener)?))
            }
        }
    }

    async fn accept(&self) -> io::Result<Accepted> {
        match self {
            WorkerListener::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok(Accepted::Tcp(stream, peer))
            }
            WorkerListener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Accepted::Unix(stream))
            }
        }
    }
}

/// Entry point after `fork`. Blocks until the worker should exit.
pub fn run(
    listener: Listener,
    liveness: std::os::unix::net::UnixStream,
    chain: &DispatchChain,
    settings: WorkerSettings,
) -> anyhow::Result<ExitReason> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building worker runtime")?;

    let pid = std::process::id() as i32;
    let span = tracing::info_span!("worker", pid);

    runtime.block_on(serve(listener, liveness, chain, settings, pid).instrument(span))
}

async fn serve(
    listener: Listener,
    liveness: std::os::unix::net::UnixStream,
    chain: &DispatchChain,
    settings: WorkerSettings,
    pid: i32,
) -> anyhow::Result<ExitReason> {
    let server_info = listener.server_info();
    let listener = WorkerListener::from_std(listener).context("registering listener")?;

    liveness.set_nonblocking(true)?;
    let (mut liveness_rx, mut liveness_tx) = UnixStream::from_std(liveness)?.into_split();

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::debug!("worker ready");

    let mut probe = [0u8; 16];
    loop {
        tokio::select! {
            biased;

            read = liveness_rx.read(&mut probe) => {
                match read {
                    // Nobody writes to the worker end; any read that returns
                    // is either EOF or an error.
                    Ok(0) | Err(_) => {
                        tracing::info!("supervisor gone, exiting");
                        return Ok(ExitReason::SupervisorGone);
                    }
                    Ok(_) => {}
                }
            }

            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, exiting");
                return Ok(ExitReason::Terminated);
            }

            _ = heartbeat.tick() => {
                if let Err(e) = liveness_tx.write_all(&encode_heartbeat(pid)).await {
                    tracing::info!(error = %e, "heartbeat failed, supervisor gone");
                    return Ok(ExitReason::SupervisorGone);
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok(Accepted::Tcp(stream, peer)) => {
                        let mut info = server_info.clone();
                        info.remote_addr = peer.ip().to_string();
                        info.remote_port = peer.port().to_string();
                        handle(stream, info, chain, settings).await;
                    }
                    Ok(Accepted::Unix(stream)) => {
                        handle(stream, server_info.clone(), chain, settings).await;
                    }
                    Err(e) => {
                        // Another worker won the race or the peer reset before
                        // accept; retry after a short pause.
                        tracing::debug!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }
}

async fn handle<S>(stream: S, info: ConnectionInfo, chain: &DispatchChain, settings: WorkerSettings)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = info.remote_addr.clone();
    let mut conn =
        Connection::new(stream, info, settings.read_timeout).with_max_body(settings.max_body);
    if let Err(e) = conn.run(chain).await {
        tracing::warn!(peer = %peer, error = %e, "connection error");
    }
}
