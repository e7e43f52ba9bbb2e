// src/platform/egl.rs

//! EGL context and window surface over a `wl_egl_window`.

use crate::renderer::RenderError;
use anyhow::{anyhow, Context, Result};
use khronos_egl as egl;
use log::{debug, info, warn};
use std::ffi::c_void;
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_client::Proxy;
use wayland_egl::WlEglSurface;

type Egl = egl::Instance<egl::Static>;

pub struct EglContext {
    egl: Egl,
    display: egl::Display,
    context: egl::Context,
    surface: Option<egl::Surface>,
    window: Option<WlEglSurface>,
    gl: glow::Context,
}

impl EglContext {
    /// Creates a GLES2 context and a window surface for `wl_surface`, and makes
    /// it current.
    pub fn new(
        wl_display: *mut c_void,
        wl_surface: &WlSurface,
        width: i32,
        height: i32,
    ) -> Result<Self> {
        let egl = egl::Instance::new(egl::Static);

        // SAFETY: `wl_display` is the live connection's display pointer.
        let display = unsafe { egl.get_display(wl_display as egl::NativeDisplayType) }
            .ok_or_else(|| anyhow!("eglGetDisplay returned no display"))?;
        let (major, minor) = egl
            .initialize(display)
            .context("Failed to initialize EGL")?;
        info!("EGL: initialized version {}.{}", major, minor);

        egl.bind_api(egl::OPENGL_ES_API)
            .context("Failed to bind the OpenGL ES API")?;

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let config = egl
            .choose_first_config(display, &config_attribs)
            .context("eglChooseConfig failed")?
            .ok_or_else(|| anyhow!("No EGL config supports a GLES2 window surface"))?;

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = egl
            .create_context(display, config, None, &context_attribs)
            .context("Failed to create EGL context")?;

        let window = WlEglSurface::new(wl_surface.id(), width, height)
            .map_err(|e| anyhow!("Failed to create wl_egl_window: {:?}", e))?;

        // SAFETY: `window` outlives the EGL surface; it is dropped after it in
        // `Drop`.
        let surface = unsafe {
            egl.create_window_surface(
                display,
                config,
                window.ptr() as egl::NativeWindowType,
                None,
            )
        }
        .context("Failed to create EGL window surface")?;

        egl.make_current(display, Some(surface), Some(surface), Some(context))
            .context("Failed to make the EGL context current")?;
        if let Err(e) = egl.swap_interval(display, 0) {
            warn!("EGL: eglSwapInterval(0) failed: {}", e);
        }

        // SAFETY: the context created above is current on this thread.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const c_void)
            })
        };

        debug!("EGL: window surface {}x{} ready", width, height);
        Ok(EglContext {
            egl,
            display,
            context,
            surface: Some(surface),
            window: Some(window),
            gl,
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn make_current(&self) -> Result<(), RenderError> {
        let surface = self
            .surface
            .ok_or_else(|| RenderError::MakeCurrent("surface destroyed".to_string()))?;
        self.egl
            .make_current(self.display, Some(surface), Some(surface), Some(self.context))
            .map_err(|e| RenderError::MakeCurrent(e.to_string()))
    }

    pub fn swap_buffers(&self) -> Result<(), RenderError> {
        let surface = self
            .surface
            .ok_or_else(|| RenderError::Swap("surface destroyed".to_string()))?;
        self.egl
            .swap_buffers(self.display, surface)
            .map_err(|e| RenderError::Swap(e.to_string()))
    }

    pub fn resize(&self, width: i32, height: i32) {
        if let Some(window) = &self.window {
            window.resize(width, height, 0, 0);
        }
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            warn!("EGL: failed to release the current context: {}", e);
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.egl.destroy_surface(self.display, surface) {
                warn!("EGL: failed to destroy window surface: {}", e);
            }
        }
        // The wl_egl_window goes after the EGL surface that wraps it.
        drop(self.window.take());
        if let Err(e) = self.egl.destroy_context(self.display, self.context) {
            warn!("EGL: failed to destroy context: {}", e);
        }
        if let Err(e) = self.egl.terminate(self.display) {
            warn!("EGL: eglTerminate failed: {}", e);
        }
        debug!("EGL: torn down");
    }
}
