//! Key-down input interface

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use once_cell::sync::Lazy;

use crate::error::HostError;
use crate::handle::KeyBindId;

/// Virtual key code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub u8);

bitflags! {
    /// Modifier keys that must be held for a binding to fire.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ModifierKeys: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT = 1 << 2;
    }
}

/// Invoked when a bound key goes down. May run on the host's input thread.
pub type KeyCallback = Arc<dyn Fn() + Send + Sync>;

pub trait InputSubsystem: Send + Sync {
    fn register_keydown(
        &self,
        key: Key,
        modifiers: ModifierKeys,
        callback: KeyCallback,
    ) -> Result<KeyBindId, HostError>;

    fn unregister_keydown(&self, id: KeyBindId) -> bool;
}

static KEY_NAMES: Lazy<BTreeMap<&'static str, Key>> = Lazy::new(|| {
    let mut names = BTreeMap::new();
    let fixed: &[(&str, u8)] = &[
        ("LEFT_MOUSE_BUTTON", 0x01),
        ("RIGHT_MOUSE_BUTTON", 0x02),
        ("MIDDLE_MOUSE_BUTTON", 0x04),
        ("BACKSPACE", 0x08),
        ("TAB", 0x09),
        ("RETURN", 0x0D),
        ("PAUSE", 0x13),
        ("CAPS_LOCK", 0x14),
        ("ESCAPE", 0x1B),
        ("SPACE", 0x20),
        ("PAGE_UP", 0x21),
        ("PAGE_DOWN", 0x22),
        ("END", 0x23),
        ("HOME", 0x24),
        ("LEFT_ARROW", 0x25),
        ("UP_ARROW", 0x26),
        ("RIGHT_ARROW", 0x27),
        ("DOWN_ARROW", 0x28),
        ("INS", 0x2D),
        ("DEL", 0x2E),
        ("MULTIPLY", 0x6A),
        ("ADD", 0x6B),
        ("SUBTRACT", 0x6D),
        ("DECIMAL_POINT", 0x6E),
        ("DIVIDE", 0x6F),
        ("NUM_LOCK", 0x90),
        ("SCROLL_LOCK", 0x91),
    ];
    for (name, code) in fixed {
        names.insert(*name, Key(*code));
    }

    const DIGITS: [&str; 10] = [
        "ZERO", "ONE", "TWO", "THREE", "FOUR", "FIVE", "SIX", "SEVEN", "EIGHT", "NINE",
    ];
    const NUM_DIGITS: [&str; 10] = [
        "NUM_ZERO", "NUM_ONE", "NUM_TWO", "NUM_THREE", "NUM_FOUR", "NUM_FIVE", "NUM_SIX",
        "NUM_SEVEN", "NUM_EIGHT", "NUM_NINE",
    ];
    for (i, name) in DIGITS.iter().enumerate() {
        names.insert(*name, Key(0x30 + i as u8));
    }
    for (i, name) in NUM_DIGITS.iter().enumerate() {
        names.insert(*name, Key(0x60 + i as u8));
    }

    const LETTERS: [&str; 26] = [
        "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
        "S", "T", "U", "V", "W", "X", "Y", "Z",
    ];
    for (i, name) in LETTERS.iter().enumerate() {
        names.insert(*name, Key(0x41 + i as u8));
    }

    const FUNCTION_KEYS: [&str; 24] = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
        "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
    ];
    for (i, name) in FUNCTION_KEYS.iter().enumerate() {
        names.insert(*name, Key(0x70 + i as u8));
    }

    names
});

impl Key {
    pub const SPACE: Key = Key(0x20);
    pub const F1: Key = Key(0x70);

    /// Look up a key by its script-facing name (`"F1"`, `"A"`, `"NUM_ZERO"`).
    pub fn from_name(name: &str) -> Option<Key> {
        KEY_NAMES.get(name).copied()
    }

    pub fn name(&self) -> Option<&'static str> {
        KEY_NAMES
            .iter()
            .find(|(_, key)| *key == self)
            .map(|(name, _)| *name)
    }

    /// Every named key, ordered by name.
    pub fn all() -> impl Iterator<Item = (&'static str, Key)> {
        KEY_NAMES.iter().map(|(name, key)| (*name, *key))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Key({:#04x})", self.0),
        }
    }
}
