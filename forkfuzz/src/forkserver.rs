//! Parent side of the forkserver protocol: owns the persistent payload
//! memfd, the command/info pipes on fixed descriptor numbers, and the
//! RUN/TEST/QUIT wire protocol. Falls back to a per-iteration fork-exec
//! strategy if the TEST handshake fails.
//!
//! The `pre_exec`/`dup2`/`setsid` plumbing mirrors `ConfigTarget` in the
//! executor this crate was built from — only the wire protocol itself (a
//! four-command scheme instead of AFL++'s FS_OPT negotiation) was replaced.

use std::ffi::OsString;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{close, dup2, pipe, read, write, Pid};

use crate::error::{FuzzError, Result};

const CMD_FD: RawFd = 198;
const INFO_FD: RawFd = 199;
const MEMFD_FD: RawFd = 200;

const CMD_RUN: u8 = b'R';
const CMD_QUIT: u8 = b'Q';
const CMD_TEST: u8 = b'T';

/// Wait-status sentinel the forkserver injects when it has killed a victim
/// for exceeding its per-case deadline.
pub const TIMEOUT_STATUS: i32 = 0x7FFF_FFFF;

/// Outcome of one `RUN` dispatch, decoded from the raw wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

fn decode_status(status: i32) -> RunOutcome {
    if status == TIMEOUT_STATUS {
        RunOutcome::TimedOut
    } else if libc_wifsignaled(status) {
        RunOutcome::Signaled(libc_wtermsig(status))
    } else {
        RunOutcome::Exited(libc_wexitstatus(status))
    }
}

fn libc_wifsignaled(status: i32) -> bool {
    ((status & 0x7f) + 1) as i8 >> 1 > 0
}

fn libc_wtermsig(status: i32) -> i32 {
    status & 0x7f
}

fn libc_wexitstatus(status: i32) -> i32 {
    (status >> 8) & 0xff
}

fn read_exact_fd(fd: RawFd, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut off = 0;
    while off < n {
        let r = read(fd, &mut buf[off..]).map_err(io::Error::from)?;
        if r == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "forkserver info pipe closed"));
        }
        off += r;
    }
    Ok(buf)
}

fn write_all_fd(fd: RawFd, data: &[u8]) -> io::Result<()> {
    let mut off = 0;
    while off < data.len() {
        let n = write(fd, &data[off..]).map_err(io::Error::from)?;
        off += n;
    }
    Ok(())
}

/// Mirrors `ConfigTarget` from the executor this module descends from:
/// fd remapping and session setup run in the forked child before `execve`.
trait ForkserverTarget {
    unsafe fn remap_fds(&mut self, cmd_read: RawFd, info_write: RawFd, memfd: RawFd) -> &mut Self;
}

impl ForkserverTarget for Command {
    unsafe fn remap_fds(&mut self, cmd_read: RawFd, info_write: RawFd, memfd: RawFd) -> &mut Self {
        self.pre_exec(move || {
            libc::setsid();
            dup2(cmd_read, CMD_FD).map_err(io_err)?;
            dup2(info_write, INFO_FD).map_err(io_err)?;
            dup2(memfd, MEMFD_FD).map_err(io_err)?;
            let _ = close(cmd_read);
            let _ = close(info_write);
            Ok(())
        })
    }
}

fn io_err(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

pub struct ForkserverDriver {
    child: Child,
    cmd_write: RawFd,
    info_read: RawFd,
    memfd: RawFd,
    enabled: bool,
    target: PathBuf,
    envs: Vec<(OsString, OsString)>,
    kill_signal: Signal,
}

impl ForkserverDriver {
    /// Spawns the forkserver child with the interposer preloaded, wires the
    /// fixed descriptors, and runs the TEST handshake. On handshake failure
    /// the driver disables itself and every `run_iteration` falls back to a
    /// plain fork-exec per test case.
    pub fn spawn(target: &Path, interposer_path: &Path) -> Result<Self> {
        use std::os::fd::IntoRawFd;

        let memfd = memfd_create(
            &std::ffi::CString::new("forkfuzz-payload").unwrap(),
            MemFdCreateFlag::empty(),
        )
        .map_err(FuzzError::MemfdCreateFailed)?
        .into_raw_fd();

        let (cmd_read, cmd_write) = pipe().map_err(FuzzError::PipeFailed)?;
        let (info_read, info_write) = pipe().map_err(FuzzError::PipeFailed)?;
        let (cmd_read, cmd_write) = (cmd_read.into_raw_fd(), cmd_write.into_raw_fd());
        let (info_read, info_write) = (info_read.into_raw_fd(), info_write.into_raw_fd());

        let preload = interposer_path.to_string_lossy().into_owned();
        let envs = crate::util::merge_env(&[("LD_PRELOAD", &preload), ("LD_BIND_NOW", "1")]);

        let mut command = Command::new(target);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env_clear()
            .envs(envs.iter().cloned());

        let child = unsafe {
            command
                .remap_fds(cmd_read, info_write, memfd)
                .spawn()
                .map_err(FuzzError::SpawnFailed)?
        };

        // Parent keeps cmd_write/info_read; the child-side ends are no
        // longer needed once dup2'd in pre_exec.
        let _ = close(cmd_read);
        let _ = close(info_write);

        let mut driver = Self {
            child,
            cmd_write,
            info_read,
            memfd,
            enabled: true,
            target: target.to_owned(),
            envs,
            kill_signal: Signal::SIGKILL,
        };

        if let Err(e) = driver.handshake() {
            log::warn!("forkserver TEST handshake failed, falling back to fork-exec per iteration: {e}");
            driver.enabled = false;
            let _ = kill(Pid::from_raw(driver.child.id() as i32), driver.kill_signal);
            let _ = driver.child.wait();
        } else {
            log::info!("Fork server initialized successfully");
        }

        Ok(driver)
    }

    fn handshake(&mut self) -> Result<()> {
        let ready = read_exact_fd(self.info_read, 4)?;
        if ready != [0u8; 4] {
            return Err(FuzzError::ForkserverHandshakeFailed(
                "unexpected handshake bytes".into(),
            ));
        }
        let mut msg = vec![CMD_TEST];
        msg.extend_from_slice(&[0u8; 3]);
        write_all_fd(self.cmd_write, &msg)?;
        let ack = read_exact_fd(self.info_read, 3)?;
        if ack != b"ACK" {
            return Err(FuzzError::ForkserverHandshakeFailed(format!(
                "expected ACK, got {ack:?}"
            )));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write_payload(&self, payload: &[u8]) -> io::Result<()> {
        nix::unistd::ftruncate(self.memfd, 0).map_err(io_err)?;
        nix::unistd::lseek(self.memfd, 0, nix::unistd::Whence::SeekSet).map_err(io_err)?;
        write_all_fd(self.memfd, payload)
    }

    /// Runs one test case. Returns `None` on a plumbing failure (treated as
    /// a per-iteration skip, never fatal).
    pub fn run_iteration(&mut self, payload: &[u8]) -> Option<RunOutcome> {
        if self.write_payload(payload).is_err() {
            return None;
        }

        if self.enabled {
            self.run_via_forkserver()
        } else {
            self.run_via_fork_exec(payload)
        }
    }

    fn run_via_forkserver(&mut self) -> Option<RunOutcome> {
        if write_all_fd(self.cmd_write, &[CMD_RUN]).is_err() {
            return None;
        }
        let reply = read_exact_fd(self.info_read, 8).ok()?;
        let _pid = i32::from_le_bytes(reply[0..4].try_into().unwrap());
        let status = i32::from_le_bytes(reply[4..8].try_into().unwrap());
        Some(decode_status(status))
    }

    /// Used only when the TEST handshake failed: spawns the target fresh
    /// for this one test case with stdin wired to the payload.
    fn run_via_fork_exec(&mut self, payload: &[u8]) -> Option<RunOutcome> {
        nix::unistd::lseek(self.memfd, 0, nix::unistd::Whence::SeekSet).ok()?;
        let stdin_fd = nix::unistd::dup(self.memfd).ok()?;
        let stdin = unsafe { Stdio::from_raw_fd(stdin_fd) };

        let mut child = Command::new(&self.target)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env_clear()
            .envs(self.envs.iter().cloned())
            .spawn()
            .ok()?;
        let _ = payload; // already written into the memfd by `write_payload`
        let status = child.wait().ok()?;
        Some(match status.signal() {
            Some(sig) => RunOutcome::Signaled(sig),
            None => RunOutcome::Exited(status.code().unwrap_or(0)),
        })
    }

    /// Writes QUIT, waits for the forkserver child, closes every descriptor.
    pub fn shutdown(mut self) {
        if self.enabled {
            let _ = write_all_fd(self.cmd_write, &[CMD_QUIT]);
        }
        let _ = self.child.wait();
        let _ = close(self.cmd_write);
        let _ = close(self.info_read);
        let _ = close(self.memfd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_status_recognises_timeout_sentinel() {
        assert_eq!(decode_status(TIMEOUT_STATUS), RunOutcome::TimedOut);
    }

    #[test]
    fn decode_status_recognises_signaled_exit() {
        // WIFSIGNALED/WTERMSIG packed status for SIGSEGV (11): low 7 bits
        // hold the signal, the (status&0x7f)+1 >> 1 test must be positive.
        let status = 11; // raw signal number, no core-dump bit
        assert_eq!(decode_status(status), RunOutcome::Signaled(11));
    }

    #[test]
    fn decode_status_recognises_normal_exit() {
        let status = 0 << 8; // WIFEXITED with code 0
        assert_eq!(decode_status(status), RunOutcome::Exited(0));
    }
}
