// src/platform/keyboard.rs

//! xkbcommon keymap handling and keysym translation.

use log::{debug, info, warn};
use std::os::fd::{AsRawFd, OwnedFd};
use xkbcommon::xkb;
use xkbcommon::xkb::keysyms::{KEY_Escape, KEY_Return};

/// What a key press means to the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// A byte to write to the pty.
    Byte(u8),
    /// Escape pressed on its own; ends the session.
    Escape,
    /// A keysym with no byte mapping, by name.
    Unrecognized(String),
}

/// Maps a keysym to the byte it sends, if any.
pub fn translate_keysym(sym: u32) -> Option<u8> {
    match sym {
        KEY_Return => Some(b'\n'),
        0x20..=0x7e => Some(sym as u8),
        _ => None,
    }
}

/// Inputs produced by one key press carrying `syms`.
pub fn key_inputs(syms: &[u32]) -> Vec<KeyInput> {
    if let [KEY_Escape] = syms {
        return vec![KeyInput::Escape];
    }
    syms.iter()
        .map(|&sym| match translate_keysym(sym) {
            Some(byte) => KeyInput::Byte(byte),
            None => KeyInput::Unrecognized(xkb::keysym_get_name(xkb::Keysym::from(sym))),
        })
        .collect()
}

/// Keymap and modifier state for the focused keyboard.
pub struct KeyboardState {
    context: xkb::Context,
    state: Option<xkb::State>,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardState {
    pub fn new() -> Self {
        KeyboardState {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            state: None,
        }
    }

    /// Compiles the text keymap shared through `fd`.
    pub fn load_keymap(&mut self, fd: OwnedFd, size: u32) {
        let size = size as usize;
        // SAFETY: the compositor guarantees `fd` holds `size` bytes of keymap;
        // the mapping is private and read-only and unmapped before returning.
        let text = unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd.as_raw_fd(),
                0,
            );
            if ptr == libc::MAP_FAILED {
                warn!(
                    "Keyboard: failed to map keymap: {}",
                    std::io::Error::last_os_error()
                );
                return;
            }
            let bytes = std::slice::from_raw_parts(ptr as *const u8, size);
            let text = String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_string();
            libc::munmap(ptr, size);
            text
        };

        match xkb::Keymap::new_from_string(
            &self.context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        ) {
            Some(keymap) => {
                debug!(
                    "Keyboard: keymap compiled ({} layouts, {} mods)",
                    keymap.num_layouts(),
                    keymap.num_mods()
                );
                self.state = Some(xkb::State::new(&keymap));
            }
            None => warn!("Keyboard: failed to compile keymap"),
        }
    }

    pub fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) {
        if let Some(state) = &mut self.state {
            state.update_mask(depressed, latched, locked, 0, 0, group);
        }
    }

    /// Translates a pressed evdev key code into terminal input.
    pub fn key_press(&self, key: u32) -> Vec<KeyInput> {
        let Some(state) = &self.state else {
            debug!("Keyboard: key {} pressed before a keymap arrived", key);
            return Vec::new();
        };
        let keycode = xkb::Keycode::from(key + 8);
        log_key(state, keycode);

        let syms: Vec<u32> = state
            .key_get_syms(keycode)
            .iter()
            .map(|&sym| u32::from(sym))
            .collect();
        let inputs = key_inputs(&syms);
        for input in &inputs {
            if let KeyInput::Unrecognized(name) = input {
                debug!("Keyboard: no byte for keysym {}", name);
            }
        }
        inputs
    }
}

/// One line per key press: keysyms, text, layout, level, modifiers (consumed
/// ones prefixed with `-`) and lit LEDs.
fn log_key(state: &xkb::State, keycode: xkb::Keycode) {
    if !log::log_enabled!(target: "wlterm::keyboard", log::Level::Info) {
        return;
    }
    let keymap = state.get_keymap();

    let names: Vec<String> = state
        .key_get_syms(keycode)
        .iter()
        .map(|&sym| xkb::keysym_get_name(sym))
        .collect();
    let text = state.key_get_utf8(keycode);
    let layout = state.key_get_layout(keycode);
    let level = state.key_get_level(keycode, layout);

    let mods: Vec<String> = (0..keymap.num_mods())
        .filter(|&m| state.mod_index_is_active(m, xkb::STATE_MODS_EFFECTIVE))
        .map(|m| {
            let prefix = if state.mod_index_is_consumed(keycode, m) {
                "-"
            } else {
                ""
            };
            format!("{}{}", prefix, keymap.mod_get_name(m))
        })
        .collect();
    let leds: Vec<&str> = (0..keymap.num_leds())
        .filter(|&l| state.led_index_is_active(l))
        .map(|l| keymap.led_get_name(l))
        .collect();

    info!(
        target: "wlterm::keyboard",
        "keysyms [{}] unicode {:?} layout {:?} ({}) level {} mods [{}] leds [{}]",
        names.join(" "),
        text,
        keymap.layout_get_name(layout),
        layout + 1,
        level,
        mods.join(" "),
        leds.join(" ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;
    use xkbcommon::xkb::keysyms::{KEY_BackSpace, KEY_F1, KEY_Left, KEY_a, KEY_asciitilde, KEY_space};

    #[test]
    fn printable_keysyms_map_to_ascii() {
        assert_eq!(translate_keysym(KEY_space), Some(b' '));
        assert_eq!(translate_keysym(KEY_a), Some(b'a'));
        assert_eq!(translate_keysym(KEY_asciitilde), Some(b'~'));
    }

    #[test]
    fn return_maps_to_newline() {
        assert_eq!(translate_keysym(KEY_Return), Some(b'\n'));
        assert_eq!(key_inputs(&[KEY_Return]), vec![KeyInput::Byte(b'\n')]);
    }

    #[test]
    fn non_printable_keysyms_are_unrecognized() {
        assert_eq!(translate_keysym(KEY_BackSpace), None);
        assert_eq!(translate_keysym(KEY_F1), None);
        assert_eq!(
            key_inputs(&[KEY_Left]),
            vec![KeyInput::Unrecognized("Left".to_string())]
        );
    }

    #[test]
    fn lone_escape_ends_the_session() {
        assert_eq!(key_inputs(&[KEY_Escape]), vec![KeyInput::Escape]);
    }

    #[test]
    fn escape_among_other_syms_is_not_escape() {
        let inputs = key_inputs(&[KEY_a, KEY_Escape]);
        assert_eq!(inputs[0], KeyInput::Byte(b'a'));
        assert!(matches!(inputs[1], KeyInput::Unrecognized(_)));
    }

    #[test]
    fn keys_before_keymap_produce_nothing() {
        assert!(KeyboardState::new().key_press(30).is_empty());
    }
}
