// src/lib.rs

//! `wlterm`: a fixed 80x25 terminal surface for Wayland.
//!
//! Bytes from a shell on a pty go into a [`term::TerminalGrid`]; the grid is
//! drawn with a FreeType glyph atlas through GLES2, one frame per compositor
//! frame-done signal.

pub mod atlas;
pub mod config;
pub mod event_loop;
pub mod os;
pub mod platform;
pub mod renderer;
pub mod term;
