// src/platform/mod.rs

//! Display-server collaborators.
//!
//! Protocol callbacks never act on application state directly. They are
//! translated into `DisplayEvent`s and handed back from `DisplayBackend::dispatch`,
//! leaving every control decision to the event loop.

pub mod egl;
pub mod keyboard;
pub mod wayland;

use crate::renderer::RenderTarget;
use anyhow::Result;
use std::os::unix::io::RawFd;

pub use keyboard::KeyInput;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// The compositor proposed a surface size. Non-positive dimensions mean
    /// "unchanged". `serial` must be acknowledged before the next commit.
    Configure { width: i32, height: i32, serial: u32 },
    /// The frame callback armed by the last render fired.
    FrameDone,
    Key(KeyInput),
    /// The user asked to close the window.
    Close,
}

/// A window the event loop can poll, dispatch and render into.
pub trait DisplayBackend: RenderTarget {
    /// File descriptor to poll for readability.
    fn event_fd(&self) -> RawFd;

    /// Reads from the connection if `readable`, dispatches everything queued,
    /// flushes outgoing requests and appends the resulting events to `events`.
    ///
    /// An error means the connection is unusable.
    fn dispatch(&mut self, readable: bool, events: &mut Vec<DisplayEvent>) -> Result<()>;
}
