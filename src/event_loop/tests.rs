// src/event_loop/tests.rs

use super::*;
use crate::atlas::{AtlasError, GlyphBitmap, GlyphRasterizer};
use crate::renderer::geometry::GlyphVertex;
use crate::renderer::{RenderError, RenderTarget};
use anyhow::anyhow;
use std::collections::VecDeque;
use std::io::Read;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use test_log::test;

// --- Mocks ---

struct DotRasterizer {
    scratch: Vec<u8>,
}

impl GlyphRasterizer for DotRasterizer {
    fn rasterize(&mut self, _code: u8) -> Result<GlyphBitmap<'_>, AtlasError> {
        self.scratch = vec![255; 4];
        Ok(GlyphBitmap {
            width: 2,
            rows: 2,
            buffer: &self.scratch,
            advance_x: 2,
            advance_y: 0,
            top: 2,
            left: 0,
        })
    }
}

fn atlas() -> GlyphAtlas {
    GlyphAtlas::build(&mut DotRasterizer {
        scratch: Vec::new(),
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Resize(i32, i32),
    Ack(u32),
    Draw(usize),
    Swap,
}

/// A display whose readiness comes from a socket: every byte written to the
/// peer releases the next scripted batch of events.
struct MockDisplay {
    socket: UnixStream,
    startup: Vec<DisplayEvent>,
    script: VecDeque<Vec<DisplayEvent>>,
    fail_on_read: bool,
    /// Treat a closed peer as a degraded but usable connection: each
    /// dispatch after the hangup still releases the next batch.
    survive_hangup: bool,
    hangups: usize,
    size: (i32, i32),
    calls: Vec<Call>,
}

impl MockDisplay {
    /// Returns the display and the peer used to signal it.
    fn new(startup: Vec<DisplayEvent>, script: Vec<Vec<DisplayEvent>>) -> (Self, UnixStream) {
        let (socket, mut peer) = UnixStream::pair().unwrap();
        socket.set_nonblocking(true).unwrap();
        peer.write_all(&vec![0u8; script.len()]).unwrap();
        let display = MockDisplay {
            socket,
            startup,
            script: script.into(),
            fail_on_read: false,
            survive_hangup: false,
            hangups: 0,
            size: (800, 600),
            calls: Vec::new(),
        };
        (display, peer)
    }

    fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl DisplayBackend for MockDisplay {
    fn event_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn dispatch(&mut self, readable: bool, events: &mut Vec<DisplayEvent>) -> Result<()> {
        events.append(&mut self.startup);
        if !readable {
            return Ok(());
        }
        if self.fail_on_read {
            return Err(anyhow!("mock connection broken"));
        }
        let mut byte = [0u8; 1];
        match self.socket.read(&mut byte) {
            Ok(0) if self.survive_hangup => {
                self.hangups += 1;
                if let Some(batch) = self.script.pop_front() {
                    events.extend(batch);
                }
            }
            Ok(0) => return Err(anyhow!("mock connection closed")),
            Ok(_) => {
                if let Some(batch) = self.script.pop_front() {
                    events.extend(batch);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl RenderTarget for MockDisplay {
    fn resize(&mut self, width: i32, height: i32) {
        self.size = (width, height);
        self.calls.push(Call::Resize(width, height));
    }

    fn ack_configure(&mut self, serial: u32) {
        self.calls.push(Call::Ack(serial));
    }

    fn surface_size(&self) -> (i32, i32) {
        self.size
    }

    fn make_current(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn draw(&mut self, _vertices: &[GlyphVertex], vertex_count: usize) -> Result<(), RenderError> {
        self.calls.push(Call::Draw(vertex_count));
        Ok(())
    }

    fn arm_frame_callback(&mut self) {}

    fn swap_buffers(&mut self) -> Result<(), RenderError> {
        self.calls.push(Call::Swap);
        Ok(())
    }

    fn commit(&mut self) {}
}

/// A socket pair standing in for the pty: the loop gets one end, the test
/// plays the shell on the other.
fn fake_pty() -> (UnixStream, UnixStream) {
    let (ours, shell) = UnixStream::pair().unwrap();
    ours.set_nonblocking(true).unwrap();
    (ours, shell)
}

fn performance() -> PerformanceConfig {
    PerformanceConfig {
        poll_timeout_ms: 100,
        pty_read_chunk: 4096,
    }
}

fn key(byte: u8) -> DisplayEvent {
    DisplayEvent::Key(KeyInput::Byte(byte))
}

// --- Tests ---

#[test]
fn full_session_feeds_grid_writes_keys_and_paces_frames() {
    let (display, _display_peer) = MockDisplay::new(
        vec![DisplayEvent::Configure {
            width: 0,
            height: 0,
            serial: 1,
        }],
        vec![
            vec![DisplayEvent::FrameDone],
            vec![key(b'l'), key(b's'), key(b'\n')],
            vec![DisplayEvent::Configure {
                width: 1024,
                height: 768,
                serial: 7,
            }],
            vec![DisplayEvent::FrameDone],
            vec![DisplayEvent::Key(KeyInput::Unrecognized("F1".to_string()))],
            vec![DisplayEvent::Key(KeyInput::Escape)],
        ],
    );
    let (pty, mut shell) = fake_pty();
    shell.write_all(b"hello\n").unwrap();

    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();
    assert!(event_loop.run_loop().is_ok());

    assert!(!event_loop.app().running);
    assert_eq!(event_loop.app().grid.row_text(0).unwrap(), "hello");
    assert_eq!(event_loop.app().grid.cursor(), (1, 0));

    let mut typed = [0u8; 3];
    shell.read_exact(&mut typed).unwrap();
    assert_eq!(&typed, b"ls\n");

    let stats = event_loop.renderer().stats();
    assert_eq!(stats.renders, 3);
    assert_eq!(stats.frames_done, 2);

    let display = event_loop.display();
    // The startup configure is acknowledged by the very first render.
    assert_eq!(display.calls.first(), Some(&Call::Ack(1)));
    assert_eq!(display.count(&Call::Resize(1024, 768)), 1);
    assert_eq!(display.count(&Call::Ack(7)), 1);
    assert_eq!(display.count(&Call::Swap), 3);
}

#[test]
fn initial_render_happens_without_any_frame_done() {
    let (display, _peer) = MockDisplay::new(vec![], vec![vec![DisplayEvent::Close]]);
    let (pty, _shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    assert!(event_loop.run_loop().is_ok());
    assert_eq!(event_loop.renderer().stats().renders, 1);
    assert_eq!(event_loop.renderer().stats().frames_done, 0);
    assert_eq!(event_loop.display().calls, vec![Call::Draw(0), Call::Swap]);
}

#[test]
fn configure_delivered_at_startup_is_applied_before_the_first_buffer() {
    let (display, _peer) = MockDisplay::new(
        vec![DisplayEvent::Configure {
            width: 640,
            height: 480,
            serial: 3,
        }],
        vec![vec![DisplayEvent::Close]],
    );
    let (pty, _shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    assert!(event_loop.run_loop().is_ok());
    assert_eq!(
        event_loop.display().calls,
        vec![Call::Resize(640, 480), Call::Ack(3), Call::Draw(0), Call::Swap]
    );
}

#[test]
fn display_hangup_with_successful_dispatch_keeps_running() {
    let (mut display, peer) = MockDisplay::new(vec![], vec![]);
    display.survive_hangup = true;
    display.script.push_back(vec![key(b'x')]);
    display.script.push_back(vec![DisplayEvent::FrameDone]);
    display.script.push_back(vec![DisplayEvent::Close]);
    drop(peer);
    let (pty, mut shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    assert!(event_loop.run_loop().is_ok());
    assert!(!event_loop.app().running);
    assert_eq!(event_loop.display().hangups, 3);
    assert_eq!(event_loop.renderer().stats().renders, 2);

    let mut typed = [0u8; 1];
    shell.read_exact(&mut typed).unwrap();
    assert_eq!(&typed, b"x");
}

#[test]
fn pty_output_arriving_between_frames_shows_on_next_frame() {
    let (display, mut peer) = MockDisplay::new(vec![], vec![]);
    let (pty, mut shell) = fake_pty();
    shell.write_all(b"ab").unwrap();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    // The first batch is empty so the pty is read before the done signal,
    // whichever order the two descriptors are reported in.
    event_loop.display.script.push_back(vec![]);
    event_loop.display.script.push_back(vec![DisplayEvent::FrameDone]);
    event_loop.display.script.push_back(vec![DisplayEvent::Close]);
    peer.write_all(&[0, 0, 0]).unwrap();

    assert!(event_loop.run_loop().is_ok());
    let draws: Vec<_> = event_loop
        .display()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Draw(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[1], 12);
}

#[test]
fn pty_end_of_file_is_logged_and_session_continues() {
    let (display, mut peer) = MockDisplay::new(vec![], vec![]);
    let (pty, shell) = fake_pty();
    drop(shell);
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    // Let the loop observe the hangup before the close arrives.
    event_loop.display.script.push_back(vec![]);
    event_loop.display.script.push_back(vec![DisplayEvent::Close]);
    peer.write_all(&[0]).unwrap();
    let writer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(200));
        peer.write_all(&[0]).unwrap();
        peer
    });

    assert!(event_loop.run_loop().is_ok());
    let _peer = writer.join().unwrap();
    assert!(!event_loop.pty_open());
    assert!(!event_loop.app().running);
}

#[test]
fn key_write_after_pty_closed_is_not_fatal() {
    let (display, _peer) = MockDisplay::new(
        vec![],
        vec![vec![key(b'x')], vec![DisplayEvent::Key(KeyInput::Escape)]],
    );
    let (pty, shell) = fake_pty();
    drop(shell);
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();
    assert!(event_loop.run_loop().is_ok());
}

#[test]
fn display_dispatch_failure_ends_the_loop_with_failure() {
    let (mut display, _peer) = MockDisplay::new(vec![], vec![vec![]]);
    display.fail_on_read = true;
    let (pty, _shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    assert!(event_loop.run_loop().is_err());
    assert!(event_loop.app().running);
}

#[test]
fn display_hangup_is_fatal_when_dispatch_fails() {
    let (display, peer) = MockDisplay::new(vec![], vec![]);
    drop(peer);
    let (pty, _shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();

    let err = event_loop.run_loop().unwrap_err();
    assert!(format!("{:#}", err).contains("hung up"));
}

#[test]
fn run_maps_outcome_to_exit_code() {
    let (display, _peer) = MockDisplay::new(vec![], vec![vec![DisplayEvent::Close]]);
    let (pty, _shell) = fake_pty();
    let mut event_loop = EventLoop::new(display, pty, atlas(), &performance()).unwrap();
    assert_eq!(format!("{:?}", event_loop.run()), format!("{:?}", ExitCode::SUCCESS));
}
