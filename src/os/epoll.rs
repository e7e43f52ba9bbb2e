// src/os/epoll.rs

//! Readiness polling over a small, fixed set of descriptors, using `epoll`
//! through `libc`. Each registered descriptor carries a caller-chosen token
//! that comes back with its events.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::{debug, trace};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

bitflags! {
    /// Interest and readiness bits, as `epoll_event::events` carries them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EpollFlags: u32 {
        const EPOLLIN = libc::EPOLLIN as u32;
        const EPOLLPRI = libc::EPOLLPRI as u32;
        const EPOLLERR = libc::EPOLLERR as u32;
        const EPOLLHUP = libc::EPOLLHUP as u32;
        const EPOLLRDHUP = libc::EPOLLRDHUP as u32;
    }
}

impl EpollFlags {
    /// The descriptor can be read (or has priority data).
    pub fn is_readable(self) -> bool {
        self.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI)
    }

    /// The peer hung up or the descriptor is in an error state.
    pub fn is_hangup(self) -> bool {
        self.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLERR)
    }
}

/// One readiness notification, copied out of the kernel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: u64,
    pub flags: EpollFlags,
}

impl From<&libc::epoll_event> for Readiness {
    fn from(event: &libc::epoll_event) -> Self {
        // Copy out of the packed struct before use.
        let token = event.u64;
        let bits = event.events;
        Readiness {
            token,
            flags: EpollFlags::from_bits_truncate(bits),
        }
    }
}

/// More than the descriptors any caller registers.
const READY_CAPACITY: usize = 8;

/// An epoll instance. The descriptor is closed on drop.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
    ready: [libc::epoll_event; READY_CAPACITY],
}

impl Poller {
    pub fn new() -> Result<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error()).context("epoll_create1 failed");
        }
        // SAFETY: `raw` was just returned by epoll_create1 and nothing else owns it.
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        debug!("Poller: epoll instance {}", raw);
        Ok(Poller {
            epoll,
            ready: [libc::epoll_event { events: 0, u64: 0 }; READY_CAPACITY],
        })
    }

    fn control(&self, op: libc::c_int, fd: RawFd, token: u64, interest: EpollFlags) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        match unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    /// Starts reporting `interest` on `fd` under `token`.
    pub fn add(&self, fd: RawFd, token: u64, interest: EpollFlags) -> Result<()> {
        self.control(libc::EPOLL_CTL_ADD, fd, token, interest)
            .with_context(|| format!("Failed to watch fd {} as token {}", fd, token))?;
        trace!("Poller: fd {} -> token {} ({:?})", fd, token, interest);
        Ok(())
    }

    /// Stops reporting `fd`.
    pub fn delete(&self, fd: RawFd) -> Result<()> {
        self.control(libc::EPOLL_CTL_DEL, fd, 0, EpollFlags::empty())
            .with_context(|| format!("Failed to unwatch fd {}", fd))?;
        trace!("Poller: fd {} removed", fd);
        Ok(())
    }

    /// Waits up to `timeout_ms` (negative blocks indefinitely). An interrupted
    /// wait returns no events.
    pub fn wait(&mut self, timeout_ms: i32) -> Result<Vec<Readiness>> {
        let count = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.ready.as_mut_ptr(),
                READY_CAPACITY as libc::c_int,
                timeout_ms,
            )
        };
        let count = match usize::try_from(count) {
            Ok(count) => count,
            Err(_) => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    trace!("Poller: wait interrupted");
                    return Ok(Vec::new());
                }
                return Err(err).context("epoll_wait failed");
            }
        };
        trace!("Poller: {} ready within {}ms", count, timeout_ms);
        Ok(self.ready[..count].iter().map(Readiness::from).collect())
    }
}
