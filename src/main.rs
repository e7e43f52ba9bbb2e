// src/main.rs

use anyhow::Context;
use log::{error, info};
use std::path::Path;
use std::process::ExitCode;
use wlterm::{
    atlas::GlyphAtlas,
    config::{CONFIG, FONT_PATH, FONT_PIXEL_SIZE},
    event_loop::EventLoop,
    os::pty::NixPty,
    platform::wayland::WaylandWindow,
};

/// Main entry point for `wlterm`.
fn main() -> ExitCode {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting wlterm...");

    match start() {
        Ok(mut event_loop) => event_loop.run(),
        Err(e) => {
            error!("wlterm failed to start: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn start() -> anyhow::Result<EventLoop<WaylandWindow, NixPty>> {
    let config = &*CONFIG;

    let atlas = GlyphAtlas::from_font(Path::new(FONT_PATH), FONT_PIXEL_SIZE)
        .context("Failed to build the glyph atlas")?;
    info!(
        "Atlas: {}x{} px, cell {}x{}",
        atlas.bitmap.width, atlas.bitmap.height, atlas.cell_width, atlas.cell_height
    );

    let window = WaylandWindow::connect(config, &atlas).context("Failed to open the window")?;

    let pty = NixPty::spawn(&config.shell)
        .with_context(|| format!("Failed to spawn shell {:?}", config.shell.program))?;
    info!("Shell {:?} running as PID {}", config.shell.program, pty.child_pid());

    EventLoop::new(window, pty, atlas, &config.performance)
}
