#![forbid(unsafe_code)]

//! The message model carried by the owner thread's message stream.
//!
//! Codes follow the classic window-message numbering so that collaborators
//! ported from a native toolkit can keep their constants: system codes live
//! below [`codes::APP`], application-defined codes occupy
//! `[APP, FIRST_REGISTERED)`.

use std::fmt;
use std::num::NonZeroU64;

/// Identity of a dispatch target (a window or form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(NonZeroU64);

impl TargetId {
    /// The application's own message target. Bridge wakeups are addressed here.
    pub const APPLICATION: Self = Self(NonZeroU64::MIN);

    /// Build a target id; `None` for zero.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Raw numeric value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Well-known message codes.
pub mod codes {
    pub const NULL: u32 = 0x0000;
    pub const CLOSE: u32 = 0x0010;
    /// Posted quit. `arg` carries the exit code.
    pub const QUIT: u32 = 0x0012;

    pub const KEY_DOWN: u32 = 0x0100;
    pub const KEY_UP: u32 = 0x0101;
    pub const CHAR: u32 = 0x0102;
    pub const KEY_LAST: u32 = 0x0109;

    pub const MOUSE_MOVE: u32 = 0x0200;
    pub const LBUTTON_DOWN: u32 = 0x0201;
    pub const LBUTTON_UP: u32 = 0x0202;
    pub const MOUSE_WHEEL: u32 = 0x020A;
    pub const MOUSE_LAST: u32 = 0x020E;

    /// The owner entered an interactive move/resize loop.
    pub const ENTER_SIZE_MOVE: u32 = 0x0231;
    /// The owner left the interactive move/resize loop.
    pub const EXIT_SIZE_MOVE: u32 = 0x0232;

    /// First application-defined code.
    pub const APP: u32 = 0x8000;
    /// Exclusive upper bound of application-defined codes.
    pub const FIRST_REGISTERED: u32 = 0xC000;

    /// Base for modal message-filter codes; the loop depth is added to it.
    pub const MSGF_USER: i32 = 4096;

    /// Keyboard or mouse input.
    #[inline]
    #[must_use]
    pub const fn is_input(code: u32) -> bool {
        (code >= KEY_DOWN && code <= KEY_LAST) || (code >= MOUSE_MOVE && code <= MOUSE_LAST)
    }

    /// Inside the application-defined range.
    #[inline]
    #[must_use]
    pub const fn is_app(code: u32) -> bool {
        code >= APP && code < FIRST_REGISTERED
    }
}

/// One entry in the message stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Destination; `None` for thread messages such as quit.
    pub target: Option<TargetId>,
    pub code: u32,
    pub arg: usize,
    pub data: isize,
}

impl Message {
    /// A message addressed to `target`.
    #[inline]
    #[must_use]
    pub const fn new(target: TargetId, code: u32) -> Self {
        Self {
            target: Some(target),
            code,
            arg: 0,
            data: 0,
        }
    }

    /// A thread message with no destination.
    #[inline]
    #[must_use]
    pub const fn thread(code: u32) -> Self {
        Self {
            target: None,
            code,
            arg: 0,
            data: 0,
        }
    }

    /// The quit message carrying `exit_code`.
    #[must_use]
    pub const fn quit(exit_code: i32) -> Self {
        Self {
            target: None,
            code: codes::QUIT,
            arg: exit_code as u32 as usize,
            data: 0,
        }
    }

    #[must_use]
    pub const fn with_arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    #[must_use]
    pub const fn with_data(mut self, data: isize) -> Self {
        self.data = data;
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_quit(&self) -> bool {
        self.code == codes::QUIT
    }

    /// Exit code of a quit message.
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.arg as u32 as i32
    }
}
