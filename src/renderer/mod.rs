// src/renderer/mod.rs

//! Frame pacing and per-frame drawing.
//!
//! `FrameRenderer` keeps at most one frame in flight. A render moves it from
//! `Idle` to `FrameOwed`; only the compositor's frame-done signal moves it back,
//! and that same signal immediately starts the next render. Requests that
//! arrive while a frame is owed are dropped, so the grid is drawn at whatever
//! rate the compositor presents frames and never faster.
//!
//! Configure requests from the compositor are staged in a single pending slot
//! and applied at the start of the next render: one surface resize and one
//! acknowledgement, however many configures arrived in between.

pub mod geometry;
pub mod gl;

use crate::atlas::GlyphAtlas;
use crate::term::TerminalGrid;
use geometry::{build_vertices, GlyphVertex, MAX_VERTICES};
use log::{debug, trace, warn};
use thiserror::Error;

/// Per-frame GPU failures. The frame is abandoned and pacing continues.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to make the GL context current: {0}")]
    MakeCurrent(String),
    #[error("failed to swap buffers: {0}")]
    Swap(String),
    #[error("draw failed: {0}")]
    Draw(String),
}

/// The surface and GPU context a frame is drawn into.
pub trait RenderTarget {
    /// Resizes the native drawing surface.
    fn resize(&mut self, width: i32, height: i32);

    /// Acknowledges the configure event identified by `serial`.
    fn ack_configure(&mut self, serial: u32);

    /// Current drawing surface size in pixels.
    fn surface_size(&self) -> (i32, i32);

    fn make_current(&mut self) -> Result<(), RenderError>;

    /// Uploads `vertices` (the whole buffer) and draws the first `vertex_count`.
    fn draw(&mut self, vertices: &[GlyphVertex], vertex_count: usize) -> Result<(), RenderError>;

    /// Requests a one-shot frame-done signal for the next commit.
    fn arm_frame_callback(&mut self);

    /// Presents the frame. Commits the surface on success.
    fn swap_buffers(&mut self) -> Result<(), RenderError>;

    /// Commits the surface without a new buffer.
    fn commit(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    /// A frame has been submitted and its done signal has not arrived yet.
    FrameOwed,
}

/// A configure waiting for the next render. `None` dimensions keep the
/// current surface size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResize {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub serial: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Render passes started.
    pub renders: u64,
    /// Frame-done signals received.
    pub frames_done: u64,
    /// Render passes that failed after being started.
    pub abandoned: u64,
}

pub struct FrameRenderer {
    state: FrameState,
    pending_resize: Option<PendingResize>,
    vertices: Vec<GlyphVertex>,
    stats: FrameStats,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRenderer {
    pub fn new() -> Self {
        FrameRenderer {
            state: FrameState::Idle,
            pending_resize: None,
            vertices: vec![GlyphVertex::default(); MAX_VERTICES],
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn pending_resize(&self) -> Option<PendingResize> {
        self.pending_resize
    }

    /// Stages a configure for the next render.
    ///
    /// Non-positive dimensions mean "unchanged" and do not override a size
    /// staged by an earlier configure. The latest serial always wins.
    pub fn request_resize(&mut self, width: i32, height: i32, serial: u32) {
        let previous = self.pending_resize.take();
        let width = (width > 0)
            .then_some(width)
            .or(previous.and_then(|p| p.width));
        let height = (height > 0)
            .then_some(height)
            .or(previous.and_then(|p| p.height));
        let pending = PendingResize {
            width,
            height,
            serial,
        };
        debug!("FrameRenderer: staged {:?}", pending);
        self.pending_resize = Some(pending);
    }

    /// Renders now unless a frame is already owed. Returns whether a render ran.
    pub fn request_render<T: RenderTarget + ?Sized>(
        &mut self,
        grid: &TerminalGrid,
        atlas: &GlyphAtlas,
        target: &mut T,
    ) -> bool {
        if self.state == FrameState::FrameOwed {
            trace!("FrameRenderer: frame already owed, render request dropped");
            return false;
        }
        self.state = FrameState::FrameOwed;
        self.render(grid, atlas, target);
        true
    }

    /// Handles the compositor's frame-done signal and draws the next frame.
    pub fn on_frame_done<T: RenderTarget + ?Sized>(
        &mut self,
        grid: &TerminalGrid,
        atlas: &GlyphAtlas,
        target: &mut T,
    ) {
        self.stats.frames_done += 1;
        if self.state != FrameState::FrameOwed {
            warn!("FrameRenderer: frame done with no frame owed");
        }
        self.state = FrameState::Idle;
        self.request_render(grid, atlas, target);
    }

    /// One render pass. The frame callback is armed even when the pass fails,
    /// so the next done signal retries it.
    fn render<T: RenderTarget + ?Sized>(
        &mut self,
        grid: &TerminalGrid,
        atlas: &GlyphAtlas,
        target: &mut T,
    ) {
        self.stats.renders += 1;

        if let Some(pending) = self.pending_resize.take() {
            if pending.width.is_some() || pending.height.is_some() {
                let (current_width, current_height) = target.surface_size();
                let width = pending.width.unwrap_or(current_width);
                let height = pending.height.unwrap_or(current_height);
                debug!("FrameRenderer: resizing surface to {}x{}", width, height);
                target.resize(width, height);
            }
            debug!("FrameRenderer: acking configure {}", pending.serial);
            target.ack_configure(pending.serial);
        }

        let drawn = self.draw_grid(grid, atlas, target);
        target.arm_frame_callback();
        let presented = drawn.and_then(|()| target.swap_buffers());

        if let Err(e) = presented {
            warn!("FrameRenderer: frame abandoned: {}", e);
            self.stats.abandoned += 1;
            target.commit();
        }
    }

    fn draw_grid<T: RenderTarget + ?Sized>(
        &mut self,
        grid: &TerminalGrid,
        atlas: &GlyphAtlas,
        target: &mut T,
    ) -> Result<(), RenderError> {
        target.make_current()?;
        let (width, height) = target.surface_size();
        let count = build_vertices(grid, atlas, width, height, &mut self.vertices);
        trace!(
            "FrameRenderer: drawing {} vertices on {}x{}",
            count,
            width,
            height
        );
        target.draw(&self.vertices, count)
    }
}
