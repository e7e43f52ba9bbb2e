// src/os/pty.rs

use crate::config::ShellConfig;
use anyhow::{anyhow, Context, Result};
use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Result as IoResult, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::openpty;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execve, fork, setsid, ForkResult, Pid};

/// The leader side of a pty with a shell running on the follower side.
///
/// Reads and writes go straight to the (nonblocking) leader descriptor.
#[derive(Debug)]
pub struct NixPty {
    master: File,
    child_pid: Pid,
}

impl NixPty {
    /// Opens a pty and runs `shell.program` on it as a session leader with
    /// only `TERM` in its environment.
    pub fn spawn(shell: &ShellConfig) -> Result<Self> {
        // Everything the child needs is allocated before forking.
        let program = CString::new(shell.program.as_os_str().as_bytes())
            .with_context(|| format!("Shell path {:?} contains a NUL byte", shell.program))?;
        let argv0 = login_argv0(shell)?;
        let term = CString::new(format!("TERM={}", shell.term_env_var))
            .context("TERM value contains a NUL byte")?;

        let pty = openpty(None, None).context("Failed to open PTY (nix::pty::openpty call)")?;
        let master_fd = pty.master;
        let slave_fd = pty.slave;

        match unsafe { fork() }.context("Failed to fork process")? {
            ForkResult::Parent { child } => {
                drop(slave_fd);
                log::debug!(
                    "NixPty: forked shell {:?} as PID {}, PTY master FD {}",
                    shell.program,
                    child,
                    master_fd.as_raw_fd()
                );
                Self::set_fd_nonblocking(&master_fd)
                    .context("Parent: Failed to set master PTY to non-blocking")?;
                Ok(NixPty {
                    master: File::from(master_fd),
                    child_pid: child,
                })
            }
            ForkResult::Child => {
                drop(master_fd);
                Self::exec_shell(slave_fd, &program, &argv0, &term)
            }
        }
    }

    /// Runs in the forked child. Only returns control to the caller's stack by
    /// exiting the process.
    fn exec_shell(slave_fd: OwnedFd, program: &CString, argv0: &CString, term: &CString) -> ! {
        let slave = slave_fd.as_raw_fd();
        let ok = setsid().is_ok()
            && unsafe { libc::ioctl(slave, libc::TIOCSCTTY as _, 0) } != -1
            && unsafe { libc::dup2(slave, libc::STDIN_FILENO) } != -1
            && unsafe { libc::dup2(slave, libc::STDOUT_FILENO) } != -1
            && unsafe { libc::dup2(slave, libc::STDERR_FILENO) } != -1;
        if ok {
            drop(slave_fd);
            let _ = execve(program, &[argv0.as_c_str()], &[term.as_c_str()]);
        }
        // Nothing safe to do in the child but leave without running the
        // parent's destructors.
        unsafe { libc::_exit(1) }
    }

    fn set_fd_nonblocking<Fd: AsFd>(fd: Fd) -> Result<()> {
        let raw_fd = fd.as_fd().as_raw_fd();
        let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)
            .with_context(|| format!("Failed to get FD flags for fd {}", raw_fd))?;
        let mut non_blocking_flags = OFlag::from_bits_truncate(flags);
        non_blocking_flags.insert(OFlag::O_NONBLOCK);
        fcntl(fd.as_fd(), FcntlArg::F_SETFL(non_blocking_flags))
            .with_context(|| format!("Failed to set FD {} to non-blocking", raw_fd))?;
        log::trace!("NixPty: Set FD {} to non-blocking", raw_fd);
        Ok(())
    }

    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }
}

/// `argv[0]` for the shell: its file name, prefixed with `-` for a login shell.
fn login_argv0(shell: &ShellConfig) -> Result<CString> {
    let name = shell
        .program
        .file_name()
        .ok_or_else(|| anyhow!("Shell path {:?} has no file name", shell.program))?;
    let mut argv0 = Vec::with_capacity(name.len() + 1);
    if shell.login {
        argv0.push(b'-');
    }
    argv0.extend_from_slice(name.as_bytes());
    CString::new(argv0).context("Shell name contains a NUL byte")
}

impl Drop for NixPty {
    fn drop(&mut self) {
        let pid = self.child_pid;
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                log::debug!("NixPty drop: Child process {} is still alive. Sending SIGHUP.", pid);
                if let Err(e) = kill(pid, Some(Signal::SIGHUP)) {
                    log::warn!("NixPty drop: Failed to send SIGHUP to child process {}: {}", pid, e);
                }
                // Reap it if it already went away; never block here.
                let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
            }
            Ok(status) => {
                log::debug!("NixPty drop: Child process {} already exited: {:?}", pid, status);
            }
            Err(e) => {
                log::debug!("NixPty drop: waitpid on child process {} failed: {}", pid, e);
            }
        }
    }
}

impl Read for NixPty {
    /// EIO from the leader means the follower side was closed; it reads as EOF.
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        match self.master.read(buf) {
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

impl Write for NixPty {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.master.write(buf)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.master.flush()
    }
}

impl AsRawFd for NixPty {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}
