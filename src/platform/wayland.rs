// src/platform/wayland.rs

//! Wayland window: registry globals, an xdg toplevel, seats and keyboards,
//! frame callbacks, and the EGL surface drawn into it.

use super::egl::EglContext;
use super::keyboard::KeyboardState;
use super::{DisplayBackend, DisplayEvent};
use crate::atlas::GlyphAtlas;
use crate::config::Config;
use crate::renderer::geometry::GlyphVertex;
use crate::renderer::gl::GlyphPipeline;
use crate::renderer::{RenderError, RenderTarget};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use std::ffi::c_void;
use std::os::fd::{AsRawFd, RawFd};
use wayland_client::{
    backend::WaylandError,
    protocol::{wl_callback, wl_compositor, wl_keyboard, wl_registry, wl_seat, wl_surface},
    Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum,
};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};

const MAX_SEAT_VERSION: u32 = 5;

// --- Protocol State ---

struct Seat {
    /// Registry name of the `wl_seat` global.
    global: u32,
    seat: wl_seat::WlSeat,
    name: Option<String>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
}

impl Seat {
    fn release_keyboard(&mut self) {
        if let Some(keyboard) = self.keyboard.take() {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
    }

    fn release(mut self) {
        self.release_keyboard();
        if self.seat.version() >= 5 {
            self.seat.release();
        }
    }
}

/// Target of every `Dispatch` impl. Protocol events land in `events`.
struct WaylandState {
    compositor: Option<wl_compositor::WlCompositor>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    seats: Vec<Seat>,
    keyboard: KeyboardState,

    /// Size from the last toplevel configure, sent with the next xdg configure.
    staged_width: i32,
    staged_height: i32,
    frame_callback: Option<wl_callback::WlCallback>,

    events: Vec<DisplayEvent>,
}

impl WaylandState {
    fn new() -> Self {
        WaylandState {
            compositor: None,
            wm_base: None,
            seats: Vec::new(),
            keyboard: KeyboardState::new(),
            staged_width: 0,
            staged_height: 0,
            frame_callback: None,
            events: Vec::new(),
        }
    }
}

// --- Window ---

pub struct WaylandWindow {
    // Fields are torn down explicitly in `Drop`, in dependency order.
    pipeline: Option<GlyphPipeline>,
    egl: Option<EglContext>,
    toplevel: Option<xdg_toplevel::XdgToplevel>,
    xdg_surface: Option<xdg_surface::XdgSurface>,
    surface: wl_surface::WlSurface,
    state: WaylandState,
    event_queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    conn: Connection,
    size: (i32, i32),
}

impl WaylandWindow {
    /// Connects to the compositor named by the environment, creates the
    /// toplevel and its EGL surface, and uploads `atlas` to the GPU.
    pub fn connect(config: &Config, atlas: &GlyphAtlas) -> Result<Self> {
        let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;
        let mut event_queue = conn.new_event_queue::<WaylandState>();
        let qh = event_queue.handle();
        let mut state = WaylandState::new();

        let _registry = conn.display().get_registry(&qh, ());
        event_queue
            .roundtrip(&mut state)
            .context("Wayland registry roundtrip failed")?;

        let compositor = state
            .compositor
            .clone()
            .ok_or_else(|| anyhow!("Compositor does not advertise wl_compositor"))?;
        let wm_base = state
            .wm_base
            .clone()
            .ok_or_else(|| anyhow!("Compositor does not advertise xdg_wm_base"))?;
        if state.seats.is_empty() {
            warn!("Wayland: no wl_seat yet; keyboard input unavailable until one appears");
        }

        let surface = compositor.create_surface(&qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title(config.window.title.clone());
        toplevel.set_app_id(config.window.app_id.clone());
        surface.commit();
        // No buffer may be attached before the first configure is acked; its
        // event waits in `state.events` for the first dispatch.
        event_queue
            .roundtrip(&mut state)
            .context("Wayland roundtrip for the initial configure failed")?;

        let (width, height) = (config.window.width, config.window.height);
        let display_ptr = conn.backend().display_ptr() as *mut c_void;
        let egl = EglContext::new(display_ptr, &surface, width, height)
            .context("Failed to set up EGL on the Wayland surface")?;
        let pipeline = GlyphPipeline::new(egl.gl(), atlas, config.colors)
            .context("Failed to create the glyph pipeline")?;

        info!("Wayland: toplevel '{}' created ({}x{})", config.window.title, width, height);

        Ok(WaylandWindow {
            pipeline: Some(pipeline),
            egl: Some(egl),
            toplevel: Some(toplevel),
            xdg_surface: Some(xdg_surface),
            surface,
            state,
            event_queue,
            qh,
            conn,
            size: (width, height),
        })
    }
}

impl DisplayBackend for WaylandWindow {
    fn event_fd(&self) -> RawFd {
        self.conn.backend().poll_fd().as_raw_fd()
    }

    fn dispatch(&mut self, readable: bool, events: &mut Vec<DisplayEvent>) -> Result<()> {
        if readable {
            if let Some(guard) = self.event_queue.prepare_read() {
                match guard.read() {
                    Ok(n) => trace!("Wayland: read {} events", n),
                    Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e).context("Failed to read from the Wayland socket"),
                }
            }
        }
        self.event_queue
            .dispatch_pending(&mut self.state)
            .context("Wayland dispatch failed")?;
        match self.event_queue.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e).context("Failed to flush the Wayland connection"),
        }
        events.append(&mut self.state.events);
        Ok(())
    }
}

impl RenderTarget for WaylandWindow {
    fn resize(&mut self, width: i32, height: i32) {
        if let Some(egl) = &self.egl {
            egl.resize(width, height);
        }
        self.size = (width, height);
    }

    fn ack_configure(&mut self, serial: u32) {
        if let Some(xdg_surface) = &self.xdg_surface {
            xdg_surface.ack_configure(serial);
        }
    }

    /// The size last given to the `wl_egl_window`. EGL only picks it up at the
    /// next swap, so querying the EGL surface would lag one frame behind.
    fn surface_size(&self) -> (i32, i32) {
        self.size
    }

    fn make_current(&mut self) -> Result<(), RenderError> {
        match &self.egl {
            Some(egl) => egl.make_current(),
            None => Err(RenderError::MakeCurrent("no EGL context".to_string())),
        }
    }

    fn draw(&mut self, vertices: &[GlyphVertex], vertex_count: usize) -> Result<(), RenderError> {
        let viewport = self.surface_size();
        match (&self.egl, &self.pipeline) {
            (Some(egl), Some(pipeline)) => pipeline.draw(egl.gl(), viewport, vertices, vertex_count),
            _ => Err(RenderError::Draw("pipeline released".to_string())),
        }
    }

    fn arm_frame_callback(&mut self) {
        if let Some(previous) = self.state.frame_callback.take() {
            debug!("Wayland: replacing unfired frame callback {:?}", previous.id());
        }
        self.state.frame_callback = Some(self.surface.frame(&self.qh, ()));
    }

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        match &self.egl {
            Some(egl) => egl.swap_buffers(),
            None => Err(RenderError::Swap("no EGL context".to_string())),
        }
    }

    fn commit(&mut self) {
        self.surface.commit();
    }
}

impl Drop for WaylandWindow {
    fn drop(&mut self) {
        if let (Some(egl), Some(pipeline)) = (&self.egl, self.pipeline.take()) {
            if egl.make_current().is_ok() {
                pipeline.destroy(egl.gl());
            }
        }
        drop(self.egl.take());
        if let Some(toplevel) = self.toplevel.take() {
            toplevel.destroy();
        }
        if let Some(xdg_surface) = self.xdg_surface.take() {
            xdg_surface.destroy();
        }
        self.surface.destroy();
        for seat in self.state.seats.drain(..) {
            seat.release();
        }
        if let Some(wm_base) = self.state.wm_base.take() {
            wm_base.destroy();
        }
        if let Err(e) = self.conn.flush() {
            warn!("Wayland: flush during teardown failed: {}", e);
        }
        info!("Wayland: window closed");
    }
}

// --- Dispatch Implementations ---

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => match interface.as_str() {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind::<wl_compositor::WlCompositor, _, _>(
                        name,
                        1.min(version),
                        qh,
                        (),
                    ));
                }
                "xdg_wm_base" => {
                    state.wm_base = Some(registry.bind::<xdg_wm_base::XdgWmBase, _, _>(
                        name,
                        1.min(version),
                        qh,
                        (),
                    ));
                }
                "wl_seat" => {
                    let seat = registry.bind::<wl_seat::WlSeat, _, _>(
                        name,
                        MAX_SEAT_VERSION.min(version),
                        qh,
                        name,
                    );
                    debug!("Wayland: seat global {} bound (v{})", name, seat.version());
                    state.seats.push(Seat {
                        global: name,
                        seat,
                        name: None,
                        keyboard: None,
                    });
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                if let Some(index) = state.seats.iter().position(|s| s.global == name) {
                    let seat = state.seats.remove(index);
                    info!("Wayland: seat {:?} removed", seat.name);
                    seat.release();
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_compositor::WlCompositor,
        _: wl_compositor::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_surface::WlSurface,
        _: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for WaylandState {
    fn event(
        _: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            let (width, height) = (state.staged_width, state.staged_height);
            debug!("Wayland: configure {} ({}x{})", serial, width, height);
            state.events.push(DisplayEvent::Configure {
                width,
                height,
                serial,
            });
            state.staged_width = 0;
            state.staged_height = 0;
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                state.staged_width = width;
                state.staged_height = height;
            }
            xdg_toplevel::Event::Close => {
                info!("Wayland: close requested");
                state.events.push(DisplayEvent::Close);
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for WaylandState {
    fn event(
        state: &mut Self,
        callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            trace!("Wayland: frame done at {}ms", callback_data);
            if state.frame_callback.as_ref() == Some(callback) {
                state.frame_callback = None;
            }
            state.events.push(DisplayEvent::FrameDone);
        }
    }
}

impl Dispatch<wl_seat::WlSeat, u32> for WaylandState {
    fn event(
        state: &mut Self,
        seat: &wl_seat::WlSeat,
        event: wl_seat::Event,
        global: &u32,
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let Some(entry) = state.seats.iter_mut().find(|s| s.global == *global) else {
            return;
        };
        match event {
            wl_seat::Event::Name { name } => {
                info!("Wayland: seat {} is '{}'", global, name);
                entry.name = Some(name);
            }
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(caps),
            } => {
                let has_keyboard = caps.contains(wl_seat::Capability::Keyboard);
                if has_keyboard && entry.keyboard.is_none() {
                    debug!("Wayland: seat {} gained a keyboard", global);
                    entry.keyboard = Some(seat.get_keyboard(qh, ()));
                } else if !has_keyboard && entry.keyboard.is_some() {
                    debug!("Wayland: seat {} lost its keyboard", global);
                    entry.release_keyboard();
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                if format == WEnum::Value(wl_keyboard::KeymapFormat::XkbV1) {
                    state.keyboard.load_keymap(fd, size);
                } else {
                    warn!("Wayland: unsupported keymap format {:?}", format);
                }
            }
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => {
                state
                    .keyboard
                    .update_modifiers(mods_depressed, mods_latched, mods_locked, group);
            }
            wl_keyboard::Event::Key {
                key,
                state: WEnum::Value(wl_keyboard::KeyState::Pressed),
                ..
            } => {
                let inputs = state.keyboard.key_press(key);
                state
                    .events
                    .extend(inputs.into_iter().map(DisplayEvent::Key));
            }
            wl_keyboard::Event::Enter { .. } => debug!("Wayland: keyboard focus gained"),
            wl_keyboard::Event::Leave { .. } => debug!("Wayland: keyboard focus lost"),
            _ => {}
        }
    }
}
