//! Session history: an append-only list of submitted lines.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Total number of bytes the history may hold before the oldest entries go.
pub const HISTORY_BUDGET: usize = 256 * 1024;

/// Ordered past lines, oldest first.
///
/// No two consecutive entries are equal and the summed length of all entries
/// stays within the byte budget.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    bytes: usize,
    budget: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_budget(HISTORY_BUDGET)
    }

    pub fn with_budget(budget: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            budget,
        }
    }

    /// Reads a history file, one entry per line. A missing file is an empty history.
    pub fn load(path: &Path, budget: usize) -> Result<Self> {
        let mut history = Self::with_budget(budget);
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(history),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("can't read history {}", path.display()));
            }
        };
        for line in text.lines() {
            history.add(line);
        }
        debug!(path = %path.display(), entries = history.len(), "history loaded");
        Ok(history)
    }

    /// Writes the history, dropping any trailing run of `exit` entries.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("can't write history {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for entry in self.persisted() {
            writeln!(out, "{entry}")?;
        }
        out.flush()?;
        debug!(path = %path.display(), "history saved");
        Ok(())
    }

    /// Appends `line` unless it is empty or repeats the newest entry.
    pub fn add(&mut self, line: &str) {
        if line.is_empty() || self.entries.back().is_some_and(|last| last == line) {
            return;
        }
        self.bytes += line.len();
        self.entries.push_back(line.to_string());
        while self.bytes > self.budget {
            match self.entries.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    fn persisted(&self) -> impl Iterator<Item = &str> {
        let keep = self.entries.len()
            - self
                .entries
                .iter()
                .rev()
                .take_while(|entry| entry.as_str() == "exit")
                .count();
        self.entries.iter().take(keep).map(String::as_str)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("abysh_history_{tag}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn test_consecutive_duplicates_are_stored_once() {
        let mut history = History::new();
        history.add("ls");
        history.add("ls");
        history.add("pwd");
        history.add("ls");
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["ls", "pwd", "ls"]);
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let mut history = History::new();
        history.add("");
        assert!(history.is_empty());
    }

    #[test]
    fn test_budget_evicts_oldest() {
        let mut history = History::with_budget(10);
        history.add("aaaa");
        history.add("bbbb");
        history.add("cccc");
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["bbbb", "cccc"]);
    }

    #[test]
    fn test_save_strips_trailing_exits() {
        let path = temp_file("save");
        let mut history = History::new();
        for line in ["echo hi", "exit", "ls", "exit", "exit 2", "exit"] {
            history.add(line);
        }
        history.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "echo hi\nexit\nls\nexit\nexit 2\n");

        let mut history = History::new();
        history.add("ls");
        history.add("exit");
        history.save(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "ls\n");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_load_deduplicates_and_respects_budget() {
        let path = temp_file("load");
        fs::write(&path, "one\none\ntwo\n\nthree\n").unwrap();

        let history = History::load(&path, HISTORY_BUDGET).unwrap();
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["one", "two", "three"]);

        let history = History::load(&path, 8).unwrap();
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["two", "three"]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let history = History::load(&temp_file("missing"), HISTORY_BUDGET).unwrap();
        assert!(history.is_empty());
    }
}
