//! Raw-terminal line editor.
//!
//! [`LineEditor::edit`] draws a prompt, switches the terminal to raw mode and
//! turns keystrokes into one confirmed line. Every mutation redraws the line
//! from the prompt's first row, so wrapped lines of any length stay consistent
//! with the terminal. Positions are measured as offsets from the start of the
//! prompt; offset `n` lives on row `n / width`, column `n % width`.

use crate::history::History;
use crate::keys::{Key, KeyDecoder};
use crate::terminal::Terminal;
use std::io::{self, Write};
use tracing::trace;

/// Longest line the editor accepts, in bytes.
pub const LINE_CAPACITY: usize = 4095;

/// Single-slot cut buffer shared by every [`LineEditor::edit`] call.
#[derive(Debug, Clone, Default)]
pub struct KillRing {
    text: Vec<u8>,
}

impl KillRing {
    /// Replaces the slot with the most recent cut.
    pub fn store(&mut self, text: Vec<u8>) {
        self.text = text;
    }

    pub fn contents(&self) -> &[u8] {
        &self.text
    }
}

/// The bytes being edited and the cursor into them.
///
/// Invariant: `cursor <= len() <= capacity`.
#[derive(Debug, Clone)]
pub struct EditBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    capacity: usize,
}

impl EditBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cursor: 0,
            capacity,
        }
    }

    /// Inserts at the cursor as much of `text` as fits; returns how much did.
    pub fn insert(&mut self, text: &[u8]) -> usize {
        let room = self.capacity - self.bytes.len();
        let text = &text[..text.len().min(room)];
        self.bytes
            .splice(self.cursor..self.cursor, text.iter().copied());
        self.cursor += text.len();
        text.len()
    }

    pub fn delete_forward(&mut self) -> bool {
        if self.cursor < self.bytes.len() {
            self.bytes.remove(self.cursor);
            true
        } else {
            false
        }
    }

    pub fn delete_backward(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.bytes.remove(self.cursor);
            true
        } else {
            false
        }
    }

    pub fn cut_to_end(&mut self) -> Vec<u8> {
        self.bytes.drain(self.cursor..).collect()
    }

    pub fn cut_to_start(&mut self) -> Vec<u8> {
        let cut = self.bytes.drain(..self.cursor).collect();
        self.cursor = 0;
        cut
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor < self.bytes.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.bytes.len();
    }

    /// Replaces the whole contents and puts the cursor at the end.
    pub fn replace(&mut self, text: &[u8]) {
        self.bytes.clear();
        self.bytes
            .extend_from_slice(&text[..text.len().min(self.capacity)]);
        self.cursor = self.bytes.len();
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Row, counted from the prompt's first row, that holds offset `offset` of
/// the prompt-plus-content text.
fn row_of(offset: usize, width: usize) -> usize {
    offset / width.max(1)
}

/// Escape output moving the terminal cursor from offset `from` to offset `to`.
fn cursor_motion(out: &mut Vec<u8>, from: usize, to: usize, width: usize) {
    if from == to {
        return;
    }
    let (from_row, to_row) = (row_of(from, width), row_of(to, width));
    if to_row < from_row {
        let _ = write!(out, "\x1b[{}A", from_row - to_row);
    } else if to_row > from_row {
        let _ = write!(out, "\x1b[{}B", to_row - from_row);
    }
    out.push(b'\r');
    let col = to % width.max(1);
    if col > 0 {
        let _ = write!(out, "\x1b[{col}C");
    }
}

/// Interactive line editor. Owns the kill ring, which outlives each line.
pub struct LineEditor {
    kill_ring: KillRing,
    capacity: usize,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::with_capacity(LINE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kill_ring: KillRing::default(),
            capacity,
        }
    }

    pub fn kill_ring(&self) -> &KillRing {
        &self.kill_ring
    }

    /// Reads one confirmed line from `term`.
    ///
    /// Raw mode is held only for the duration of the call and is restored on
    /// every return path, errors included.
    pub fn edit<T: Terminal>(
        &mut self,
        term: &mut T,
        prompt: &str,
        history: &History,
    ) -> io::Result<String> {
        let _raw = term.raw_mode()?;
        let session = EditSession {
            prompt,
            prompt_len: prompt.chars().count(),
            width: term.columns(),
            buffer: EditBuffer::new(self.capacity),
            history,
            history_cursor: history.len(),
            kill_ring: &mut self.kill_ring,
            drawn: 0,
            out: Vec::new(),
            term,
        };
        session.run()
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

struct EditSession<'a, T: Terminal> {
    term: &'a mut T,
    prompt: &'a str,
    prompt_len: usize,
    width: usize,
    buffer: EditBuffer,
    history: &'a History,
    /// Index into `history`; `history.len()` means "past the newest entry".
    history_cursor: usize,
    kill_ring: &'a mut KillRing,
    /// Offset the terminal cursor was last left at.
    drawn: usize,
    out: Vec<u8>,
}

impl<T: Terminal> EditSession<'_, T> {
    fn run(mut self) -> io::Result<String> {
        self.refresh();
        self.flush()?;

        let mut decoder = KeyDecoder::new();
        loop {
            let Some(byte) = self.term.read_byte()? else {
                return self.forced_submit("exit");
            };
            if self.term.take_resize() {
                self.width = self.term.columns();
                trace!(width = self.width, "terminal resized");
            }
            let Some(key) = decoder.feed(byte) else {
                continue;
            };
            match key {
                Key::Enter => return self.submit(),
                Key::EndOfInput if self.buffer.is_empty() => return self.forced_submit("exit"),
                Key::EndOfInput | Key::Delete => {
                    if self.buffer.delete_forward() {
                        self.refresh();
                    }
                }
                Key::Backspace => {
                    if self.buffer.delete_backward() {
                        self.refresh();
                    }
                }
                Key::Char(byte) => {
                    if self.buffer.insert(&[byte]) > 0 {
                        self.refresh();
                    }
                }
                Key::Left => {
                    if self.buffer.move_left() {
                        self.place_cursor();
                    }
                }
                Key::Right => {
                    if self.buffer.move_right() {
                        self.place_cursor();
                    }
                }
                Key::Home => {
                    self.buffer.move_home();
                    self.place_cursor();
                }
                Key::End => {
                    self.buffer.move_end();
                    self.place_cursor();
                }
                Key::CutToEnd => {
                    let cut = self.buffer.cut_to_end();
                    self.kill_ring.store(cut);
                    self.refresh();
                }
                Key::CutToStart => {
                    let cut = self.buffer.cut_to_start();
                    self.kill_ring.store(cut);
                    self.refresh();
                }
                Key::Paste => {
                    if self.buffer.insert(self.kill_ring.contents()) > 0 {
                        self.refresh();
                    }
                }
                Key::Redraw => {
                    self.out.extend_from_slice(b"\x1b[H\x1b[2J");
                    self.drawn = 0;
                    self.refresh();
                }
                Key::HistoryPrev => self.history_prev(),
                Key::HistoryNext => self.history_next(),
                Key::Abort => {
                    self.buffer.clear();
                    self.refresh();
                }
            }
            self.flush()?;
        }
    }

    // Browsing replaces the buffer wholesale; unsaved edits are dropped.
    fn history_prev(&mut self) {
        if self.history_cursor == 0 {
            return;
        }
        self.history_cursor -= 1;
        if let Some(entry) = self.history.get(self.history_cursor) {
            self.buffer.replace(entry.as_bytes());
        }
        self.refresh();
    }

    fn history_next(&mut self) {
        if self.history_cursor >= self.history.len() {
            return;
        }
        self.history_cursor += 1;
        match self.history.get(self.history_cursor) {
            Some(entry) => self.buffer.replace(entry.as_bytes()),
            None => self.buffer.clear(),
        }
        self.refresh();
    }

    fn end_offset(&self) -> usize {
        self.prompt_len + self.buffer.len()
    }

    /// Redraws prompt and contents from the first row, then places the cursor.
    fn refresh(&mut self) {
        let width = self.width.max(1);
        let up = row_of(self.drawn, width);
        if up > 0 {
            let _ = write!(self.out, "\x1b[{up}A");
        }
        self.out.extend_from_slice(b"\r\x1b[J");
        self.out.extend_from_slice(self.prompt.as_bytes());
        self.out.extend_from_slice(self.buffer.as_bytes());

        let end = self.end_offset();
        if end > 0 && end % width == 0 {
            // The terminal holds the cursor on the last column until the next
            // byte; force it onto the fresh row so the row math stays exact.
            self.out.extend_from_slice(b"\r\n");
        }
        self.drawn = end;
        self.place_cursor();
    }

    fn place_cursor(&mut self) {
        let target = self.prompt_len + self.buffer.cursor();
        cursor_motion(&mut self.out, self.drawn, target, self.width);
        self.drawn = target;
    }

    fn forced_submit(mut self, text: &str) -> io::Result<String> {
        self.buffer.replace(text.as_bytes());
        self.refresh();
        self.submit()
    }

    fn submit(mut self) -> io::Result<String> {
        let end = self.end_offset();
        cursor_motion(&mut self.out, self.drawn, end, self.width);
        if end == 0 || end % self.width.max(1) != 0 {
            self.out.extend_from_slice(b"\r\n");
        }
        self.flush()?;
        Ok(String::from_utf8_lossy(self.buffer.as_bytes()).into_owned())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.term.write_all(&self.out)?;
        self.out.clear();
        self.term.flush()
    }
}
