//! The liveness channel between the supervisor and its workers.
//!
//! A socketpair: workers inherit one end and write 4-byte little-endian
//! pid frames into it as heartbeats. The supervisor keeps the other end and
//! drains it once per tick. When the supervisor's process goes away, its end
//! closes and every worker's read on the shared end reports EOF.

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub const FRAME_LEN: usize = 4;

pub fn encode_heartbeat(pid: i32) -> [u8; FRAME_LEN] {
    pid.to_le_bytes()
}

/// Both ends of the channel, held by the supervisor.
#[derive(Debug)]
pub struct Channel {
    parent: Option<UnixStream>,
    child: UnixStream,
    pending: Vec<u8>,
}

impl Channel {
    pub fn new() -> io::Result<Self> {
        let (parent, child) = UnixStream::pair()?;
        parent.set_nonblocking(true)?;
        Ok(Self {
            parent: Some(parent),
            child,
            pending: Vec::new(),
        })
    }

    /// Called in a freshly forked worker: drops the supervisor's end so the
    /// worker's copy cannot keep it open, and hands out the worker's end.
    pub fn detach_worker(&mut self) -> io::Result<UnixStream> {
        self.parent.take();
        self.child.try_clone()
    }

    /// Closes the supervisor's end; workers blocked on the channel see EOF.
    pub fn close(&mut self) {
        self.parent.take();
    }

    /// Blocks for at most `timeout` until heartbeat bytes are readable.
    /// Returns early, with `false`, when a signal interrupts the wait.
    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let Some(parent) = &self.parent else {
            std::thread::sleep(timeout);
            return Ok(false);
        };

        let mut fds = libc::pollfd {
            fd: parent.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        let rc = unsafe { libc::poll(&mut fds, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(rc > 0 && fds.revents & libc::POLLIN != 0)
    }

    /// Reads every pending frame without blocking and returns the pids.
    pub fn drain(&mut self) -> io::Result<Vec<i32>> {
        let Some(parent) = self.parent.as_mut() else {
            return Ok(Vec::new());
        };

        let mut buf = [0u8; 512];
        loop {
            match parent.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(decode_frames(&mut self.pending))
    }
}

/// Splits complete frames off the front of `pending`, leaving a partial
/// frame (if any) behind for the next drain.
pub fn decode_frames(pending: &mut Vec<u8>) -> Vec<i32> {
    let complete = pending.len() - pending.len() % FRAME_LEN;
    let pids = pending[..complete]
        .chunks_exact(FRAME_LEN)
        .map(|frame| i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]))
        .collect();
    pending.drain(..complete);
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let mut pending = Vec::new();
        pending.extend_from_slice(&encode_heartbeat(4242));
        pending.extend_from_slice(&encode_heartbeat(7)[..2]);

        assert_eq!(decode_frames(&mut pending), vec![4242]);
        assert_eq!(pending.len(), 2);

        pending.extend_from_slice(&encode_heartbeat(7)[2..]);
        assert_eq!(decode_frames(&mut pending), vec![7]);
        assert!(pending.is_empty());
    }

    #[test]
    fn drain_collects_heartbeats_from_worker_end() {
        let mut channel = Channel::new().unwrap();
        let mut worker = channel.child.try_clone().unwrap();

        worker.write_all(&encode_heartbeat(100)).unwrap();
        worker.write_all(&encode_heartbeat(200)).unwrap();

        assert!(channel.wait(Duration::from_secs(1)).unwrap());
        assert_eq!(channel.drain().unwrap(), vec![100, 200]);
        assert_eq!(channel.drain().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn closing_parent_end_is_eof_for_worker() {
        let mut channel = Channel::new().unwrap();
        let mut worker = channel.child.try_clone().unwrap();

        channel.close();
        drop(channel);

        let mut buf = [0u8; 1];
        assert_eq!(worker.read(&mut buf).unwrap(), 0);
    }
}
