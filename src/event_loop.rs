// src/event_loop.rs

//! The single-threaded loop that owns the grid and drives everything else.
//!
//! Two descriptors are polled: the display connection and the pty. Display
//! events come back from `DisplayBackend::dispatch` as `DisplayEvent`s and are
//! acted on here; pty output is fed byte by byte into the grid. Rendering is
//! never triggered by input. A frame is drawn once at startup and then once
//! per frame-done signal, and it picks up whatever the grid holds by then.

use crate::atlas::GlyphAtlas;
use crate::config::PerformanceConfig;
use crate::os::epoll::{EpollFlags, Poller, Readiness};
use crate::platform::{DisplayBackend, DisplayEvent, KeyInput};
use crate::renderer::FrameRenderer;
use crate::term::TerminalGrid;
use anyhow::{Context, Result};
use log::{debug, error, info, trace, warn};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::process::ExitCode;

const DISPLAY_TOKEN: u64 = 0;
const PTY_TOKEN: u64 = 1;

/// State shared by every event handler.
#[derive(Debug, Default)]
pub struct AppState {
    /// Cleared by Escape or a close request; the loop exits once it is false.
    pub running: bool,
    pub grid: TerminalGrid,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            running: true,
            grid: TerminalGrid::new(),
        }
    }
}

pub struct EventLoop<D, P> {
    display: D,
    pty: P,
    atlas: GlyphAtlas,
    renderer: FrameRenderer,
    app: AppState,
    poller: Poller,
    pty_open: bool,
    poll_timeout_ms: i32,
    read_buf: Vec<u8>,
    events: Vec<DisplayEvent>,
}

impl<D, P> EventLoop<D, P>
where
    D: DisplayBackend,
    P: Read + Write + AsRawFd,
{
    /// Registers both descriptors for readiness. `pty` must be nonblocking.
    pub fn new(display: D, pty: P, atlas: GlyphAtlas, performance: &PerformanceConfig) -> Result<Self> {
        let poller = Poller::new().context("Failed to create the epoll instance")?;
        let interest = EpollFlags::EPOLLIN | EpollFlags::EPOLLPRI;
        poller
            .add(display.event_fd(), DISPLAY_TOKEN, interest)
            .context("Failed to watch the display connection")?;
        poller
            .add(pty.as_raw_fd(), PTY_TOKEN, interest)
            .context("Failed to watch the pty")?;

        Ok(EventLoop {
            display,
            pty,
            atlas,
            renderer: FrameRenderer::new(),
            app: AppState::new(),
            poller,
            pty_open: true,
            poll_timeout_ms: performance.poll_timeout_ms.min(i32::MAX as u32) as i32,
            read_buf: vec![0; performance.pty_read_chunk.max(1)],
            events: Vec::new(),
        })
    }

    /// Runs until Escape or a close request. A lost display connection ends
    /// the loop with a failure code.
    pub fn run(&mut self) -> ExitCode {
        match self.run_loop() {
            Ok(()) => {
                info!("EventLoop: exiting");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("EventLoop: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }

    pub fn app(&self) -> &AppState {
        &self.app
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// False once the pty reached end-of-file or failed and was unregistered.
    pub fn pty_open(&self) -> bool {
        self.pty_open
    }

    fn run_loop(&mut self) -> Result<()> {
        // The display hands out the initial configure here, so the first
        // render acknowledges it before attaching a buffer.
        self.pump_display(false)?;
        self.renderer
            .request_render(&self.app.grid, &self.atlas, &mut self.display);

        while self.app.running {
            // Flush what the handlers sent before blocking.
            self.pump_display(false)?;

            let ready = self.poller.wait(self.poll_timeout_ms)?;
            for Readiness { token, flags } in ready {
                match token {
                    DISPLAY_TOKEN => self.on_display_ready(flags)?,
                    PTY_TOKEN => self.on_pty_ready(flags),
                    other => warn!("EventLoop: event for unknown token {}", other),
                }
            }
        }
        Ok(())
    }

    fn on_display_ready(&mut self, flags: EpollFlags) -> Result<()> {
        let hangup = flags.is_hangup();
        if hangup {
            warn!("EventLoop: hangup on the display connection ({:?})", flags);
        }
        self.pump_display(flags.is_readable() || hangup)
            .with_context(|| {
                if hangup {
                    "Display connection hung up"
                } else {
                    "Display dispatch failed"
                }
            })
    }

    fn on_pty_ready(&mut self, flags: EpollFlags) {
        if !self.pty_open {
            return;
        }
        if flags.is_hangup() {
            debug!("EventLoop: hangup on the pty ({:?})", flags);
        }
        match self.pty.read(&mut self.read_buf) {
            Ok(0) => {
                info!("EventLoop: pty reached end of file");
                self.close_pty();
            }
            Ok(n) => {
                trace!("EventLoop: {} bytes from pty", n);
                self.app.grid.feed_bytes(&self.read_buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("EventLoop: pty read failed: {}", e);
                self.close_pty();
            }
        }
    }

    fn close_pty(&mut self) {
        self.pty_open = false;
        if let Err(e) = self.poller.delete(self.pty.as_raw_fd()) {
            warn!("EventLoop: {:#}", e);
        }
    }

    /// Dispatches display events and acts on each, in order.
    fn pump_display(&mut self, readable: bool) -> Result<()> {
        let mut events = std::mem::take(&mut self.events);
        let result = self.display.dispatch(readable, &mut events);
        for event in events.drain(..) {
            self.handle_display_event(event);
        }
        self.events = events;
        result
    }

    fn handle_display_event(&mut self, event: DisplayEvent) {
        match event {
            DisplayEvent::Configure {
                width,
                height,
                serial,
            } => self.renderer.request_resize(width, height, serial),
            DisplayEvent::FrameDone => {
                self.renderer
                    .on_frame_done(&self.app.grid, &self.atlas, &mut self.display);
            }
            DisplayEvent::Key(KeyInput::Byte(byte)) => {
                if let Err(e) = self.pty.write(&[byte]) {
                    warn!("EventLoop: failed to write {:#04x} to pty: {}", byte, e);
                }
            }
            DisplayEvent::Key(KeyInput::Escape) => {
                info!("EventLoop: Escape pressed");
                self.app.running = false;
            }
            DisplayEvent::Key(KeyInput::Unrecognized(name)) => {
                debug!("EventLoop: ignoring key {}", name);
            }
            DisplayEvent::Close => {
                info!("EventLoop: window closed");
                self.app.running = false;
            }
        }
    }
}

#[cfg(test)]
mod tests;
