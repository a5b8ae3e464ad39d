//! Decoding of raw terminal bytes into editor keys.

/// An editing operation recognized by the line editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable byte to insert at the cursor.
    Char(u8),
    Enter,
    Home,
    End,
    Left,
    Right,
    Delete,
    Backspace,
    CutToEnd,
    CutToStart,
    Paste,
    Redraw,
    HistoryPrev,
    HistoryNext,
    Abort,
    /// Ctrl-D: forward delete, or end of input on an empty line.
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    EscSeen,
    CsiSeen,
    /// `ESC [ 3` waiting for the closing `~`.
    CsiDelete,
}

/// Finite-state matcher for the control bytes and escape sequences we support.
///
/// Recognized sequences: `ESC [ A..D` (and the bare `ESC A..D` form) for the
/// arrow keys, `ESC [ 3 ~` for forward delete. Anything else that starts with
/// `ESC` is swallowed without effect.
#[derive(Debug)]
pub struct KeyDecoder {
    state: State,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Normal,
        }
    }

    /// Feeds one byte; yields a key once a complete sequence has been seen.
    pub fn feed(&mut self, byte: u8) -> Option<Key> {
        match self.state {
            State::Normal => self.normal(byte),
            State::EscSeen => match byte {
                b'[' => {
                    self.state = State::CsiSeen;
                    None
                }
                _ => {
                    self.state = State::Normal;
                    arrow(byte)
                }
            },
            State::CsiSeen => match byte {
                b'3' => {
                    self.state = State::CsiDelete;
                    None
                }
                _ => {
                    self.state = State::Normal;
                    arrow(byte)
                }
            },
            State::CsiDelete => {
                self.state = State::Normal;
                (byte == b'~').then_some(Key::Delete)
            }
        }
    }

    fn normal(&mut self, byte: u8) -> Option<Key> {
        let key = match byte {
            0x1b => {
                self.state = State::EscSeen;
                return None;
            }
            0 | b'\n' | b'\r' => Key::Enter,
            0x01 => Key::Home,
            0x02 => Key::Left,
            0x03 => Key::Abort,
            0x04 => Key::EndOfInput,
            0x05 => Key::End,
            0x06 => Key::Right,
            0x08 | 0x7f => Key::Backspace,
            0x0b => Key::CutToEnd,
            0x0c => Key::Redraw,
            0x0e => Key::HistoryNext,
            0x10 => Key::HistoryPrev,
            0x15 => Key::CutToStart,
            0x19 => Key::Paste,
            b if b < b' ' => return None,
            b => Key::Char(b),
        };
        Some(key)
    }
}

impl Default for KeyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn arrow(byte: u8) -> Option<Key> {
    match byte {
        b'A' => Some(Key::HistoryPrev),
        b'B' => Some(Key::HistoryNext),
        b'C' => Some(Key::Right),
        b'D' => Some(Key::Left),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Vec<Key> {
        let mut decoder = KeyDecoder::new();
        bytes.iter().filter_map(|b| decoder.feed(*b)).collect()
    }

    #[test]
    fn test_arrow_sequences() {
        assert_eq!(
            decode(b"\x1b[A\x1b[B\x1b[C\x1b[D"),
            vec![Key::HistoryPrev, Key::HistoryNext, Key::Right, Key::Left]
        );
    }

    #[test]
    fn test_short_escape_form_is_accepted() {
        assert_eq!(decode(b"\x1bA\x1bD"), vec![Key::HistoryPrev, Key::Left]);
    }

    #[test]
    fn test_forward_delete_sequence() {
        assert_eq!(decode(b"\x1b[3~"), vec![Key::Delete]);
    }

    #[test]
    fn test_unknown_sequences_are_swallowed() {
        assert_eq!(decode(b"\x1b[Zx"), vec![Key::Char(b'x')]);
        assert_eq!(decode(b"\x1b[3xy"), vec![Key::Char(b'y')]);
        assert_eq!(decode(b"\x1bqz"), vec![Key::Char(b'z')]);
    }

    #[test]
    fn test_control_bytes() {
        assert_eq!(
            decode(&[0x01, 0x05, 0x0b, 0x15, 0x19, 0x03, 0x04, 0x7f, 0x08, b'\r']),
            vec![
                Key::Home,
                Key::End,
                Key::CutToEnd,
                Key::CutToStart,
                Key::Paste,
                Key::Abort,
                Key::EndOfInput,
                Key::Backspace,
                Key::Backspace,
                Key::Enter,
            ]
        );
    }

    #[test]
    fn test_unbound_control_bytes_are_ignored() {
        assert_eq!(decode(&[0x07, 0x14, b'a']), vec![Key::Char(b'a')]);
    }
}
