use crate::error::StartupError;
use std::io;
use std::path::{Path, PathBuf};

/// A file holding the supervisor's pid. Removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes our pid to `path`, refusing if the file names another process
    /// that is still alive. A stale file is overwritten.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, StartupError> {
        let path = path.into();
        let own_pid = std::process::id() as i32;

        if let Some(pid) = read_pid(&path)? {
            if pid != own_pid && process_alive(pid) {
                return Err(StartupError::AlreadyRunning { pid, path });
            }
            tracing::warn!(pid, path = %path.display(), "overwriting stale pid file");
        }

        std::fs::write(&path, format!("{own_pid}\n"))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}

/// The pid stored in `path`. A missing or unparseable file counts as no pid.
pub fn read_pid(path: &Path) -> io::Result<Option<i32>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Signal 0 probes for existence; EPERM still means someone owns that pid.
pub fn process_alive(pid: i32) -> bool {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_removes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forkserve.pid");

        let pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(std::process::id() as i32));

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_blocks_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forkserve.pid");

        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        std::fs::write(&path, child.id().to_string()).unwrap();

        let result = PidFile::acquire(&path);
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(matches!(result, Err(StartupError::AlreadyRunning { .. })));
    }

    #[test]
    fn stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forkserve.pid");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        std::fs::write(&path, dead.to_string()).unwrap();

        let _pid_file = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(std::process::id() as i32));
    }
}
