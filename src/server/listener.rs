use crate::error::StartupError;
use crate::http::request::ConnectionInfo;
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

const BACKLOG: i32 = 1024;

/// Where the server listens: exactly one TCP address or Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl ListenAddr {
    /// `unix:/path` (or any absolute path) is a Unix socket, everything else
    /// is `host:port`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("unix:") {
            ListenAddr::Unix(PathBuf::from(path))
        } else if raw.starts_with('/') {
            ListenAddr::Unix(PathBuf::from(raw))
        } else {
            ListenAddr::Tcp(raw.to_string())
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => f.write_str(addr),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// The bound, non-blocking listening socket shared by every worker.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    pub fn bind(addr: &ListenAddr) -> Result<Self, StartupError> {
        let bind_err = |source: io::Error| StartupError::Bind {
            addr: addr.to_string(),
            source,
        };

        let listener = match addr {
            ListenAddr::Tcp(raw) => {
                let socket_addr = resolve(raw).map_err(bind_err)?;
                Listener::Tcp(bind_tcp(&socket_addr).map_err(bind_err)?)
            }
            ListenAddr::Unix(path) => {
                remove_stale_socket(path).map_err(bind_err)?;
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                Listener::Unix {
                    listener,
                    path: path.clone(),
                }
            }
        };

        listener.set_nonblocking(true).map_err(bind_err)?;
        Ok(listener)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Listener::Tcp(l) => l.set_nonblocking(nonblocking),
            Listener::Unix { listener, .. } => listener.set_nonblocking(nonblocking),
        }
    }

    /// The bound address, with the real port when `:0` was requested.
    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Listener::Tcp(l) => Ok(ListenAddr::Tcp(l.local_addr()?.to_string())),
            Listener::Unix { path, .. } => Ok(ListenAddr::Unix(path.clone())),
        }
    }

    /// Server half of the per-request connection info.
    pub fn server_info(&self) -> ConnectionInfo {
        let mut info = ConnectionInfo::default();
        match self {
            Listener::Tcp(l) => {
                if let Ok(addr) = l.local_addr() {
                    info.server_name = addr.ip().to_string();
                    info.server_port = addr.port().to_string();
                }
            }
            Listener::Unix { path, .. } => {
                info.server_name = path.display().to_string();
            }
        }
        info
    }

    /// The socket file to unlink on shutdown, if any.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Listener::Tcp(_) => None,
            Listener::Unix { path, .. } => Some(path),
        }
    }
}

fn resolve(raw: &str) -> io::Result<SocketAddr> {
    raw.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{raw} resolves to no address"))
    })
}

fn bind_tcp(addr: &SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR lets a restart bind over TIME_WAIT. No SO_REUSEPORT: a
    // second instance must fail to bind.
    socket.set_reuse_address(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Unlinks a socket file nobody is accepting on. A live one is left alone
/// and makes the bind fail.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{} is accepting connections", path.display()),
        )),
        Err(_) => {
            tracing::warn!(path = %path.display(), "removing stale socket file");
            std::fs::remove_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listen_addr() {
        assert_eq!(ListenAddr::parse("127.0.0.1:8080"), ListenAddr::Tcp("127.0.0.1:8080".into()));
        assert_eq!(ListenAddr::parse("unix:/tmp/a.sock"), ListenAddr::Unix("/tmp/a.sock".into()));
        assert_eq!(ListenAddr::parse("/tmp/b.sock"), ListenAddr::Unix("/tmp/b.sock".into()));
    }

    #[test]
    fn second_tcp_bind_fails() {
        let first = Listener::bind(&ListenAddr::parse("127.0.0.1:0")).unwrap();
        let addr = first.local_addr().unwrap();

        let second = Listener::bind(&addr);
        assert!(matches!(second, Err(StartupError::Bind { .. })));
    }

    #[test]
    fn stale_unix_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");

        let first = Listener::bind(&ListenAddr::Unix(path.clone())).unwrap();
        assert!(matches!(
            Listener::bind(&ListenAddr::Unix(path.clone())),
            Err(StartupError::Bind { .. })
        ));
        drop(first);

        // The file is still there but nobody accepts on it.
        assert!(path.exists());
        assert!(Listener::bind(&ListenAddr::Unix(path)).is_ok());
    }
}
