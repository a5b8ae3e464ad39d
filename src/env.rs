use crate::command::{ExitCode, ExitStatus};
use nix::unistd::{User, getuid};
use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Search path used when `PATH` is not set.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/bin";

/// Shell level at which `SHLVL` is considered runaway and reset.
pub const SHLVL_LIMIT: i64 = 999;

const FALLBACK_NAME: &str = "(abysh)";

/// Mutable, user-level view of the session state used by the interpreter.
///
/// The environment contains:
/// - `vars`: the shell's own variable table; it is handed to children as their
///   environment and is never written back into the OS environment of the shell.
/// - `current_dir`: the working directory for command execution.
/// - `status`: the exit status register behind `$?`.
/// - `should_exit`: set by the `exit` builtin; the REPL terminates with that code.
/// - `shell_name`: the name used in the prompt and in diagnostics.
///
/// Note: fields are public for simplicity.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// Raw wait status of the last foreground pipeline or builtin.
    pub status: ExitStatus,
    /// When set, indicates that an interactive loop should exit with this code.
    pub should_exit: Option<ExitCode>,
    /// Name shown in the prompt and prefixed to diagnostics.
    pub shell_name: String,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// This copies variables from `std::env::vars()` and initializes `current_dir`
    /// from `std::env::current_dir()`.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            vars,
            current_dir,
            status: ExitStatus::default(),
            should_exit: None,
            shell_name: "abysh".to_string(),
        }
    }

    /// An environment with exactly the given variables, rooted at `current_dir`.
    pub fn with_vars<I, K, V>(vars: I, current_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            current_dir: current_dir.into(),
            status: ExitStatus::default(),
            should_exit: None,
            shell_name: "abysh".to_string(),
        }
    }

    /// Get the value of a shell variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a shell variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    pub fn unset_var(&mut self, key: &str) {
        self.vars.remove(key);
    }

    /// Persistent assignment as performed by a bare `NAME=value` line.
    ///
    /// An empty or missing value removes the variable.
    pub fn assign(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(v) if !v.is_empty() => self.set_var(name, v),
            _ => self.unset_var(name),
        }
    }

    pub fn home(&self) -> Option<&str> {
        self.get_var("HOME")
    }

    /// The `PATH` value used to resolve commands.
    pub fn search_path(&self) -> &str {
        self.get_var("PATH").unwrap_or(DEFAULT_PATH)
    }

    /// Re-read the working directory of the process and publish it as `PWD`.
    pub fn refresh_pwd(&mut self) {
        if let Ok(cwd) = stdenv::current_dir() {
            self.current_dir = cwd;
        }
        let pwd = self.current_dir.to_string_lossy().into_owned();
        self.set_var("PWD", pwd);
    }

    /// Startup defaults for an interactive session.
    ///
    /// Derives the shell name from `argv0`, fills in `HOME` and `PATH` when they
    /// are missing and bumps `SHLVL`. Returns the warnings the caller should
    /// print on the error stream, already prefixed with the shell name.
    pub fn bootstrap(&mut self, argv0: &str) -> Vec<String> {
        let mut warnings = Vec::new();

        match shell_name_from(argv0) {
            Some(name) => self.shell_name = name,
            None => {
                self.shell_name = FALLBACK_NAME.to_string();
                warnings.push(format!("{FALLBACK_NAME}: warning: weird environment"));
            }
        }

        if self.home().is_none() {
            match User::from_uid(getuid()) {
                Ok(Some(user)) => {
                    debug!(home = %user.dir.display(), "HOME synthesized from user database");
                    self.set_var("HOME", user.dir.to_string_lossy().into_owned());
                }
                Ok(None) => warn!("no user database entry for the current uid"),
                Err(err) => warn!(%err, "user database lookup failed"),
            }
        }

        if self.get_var("PATH").is_none() {
            self.set_var("PATH", DEFAULT_PATH);
        }

        let mut level = parse_level(self.get_var("SHLVL").unwrap_or(""));
        if level >= SHLVL_LIMIT {
            warnings.push(format!(
                "{}: warning: shell level ({level}) is too high, resetting to 1",
                self.shell_name
            ));
            level = 0;
        }
        self.set_var("SHLVL", (level + 1).to_string());

        self.refresh_pwd();
        warnings
    }

    /// Text shown for the working directory in the prompt.
    ///
    /// `~` at `HOME`, otherwise the last path component (the full path at `/`).
    pub fn prompt_dir(&self) -> String {
        if let Some(home) = self.home() {
            if !home.is_empty() && Path::new(home) == self.current_dir {
                return "~".to_string();
            }
        }
        match self.current_dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.current_dir.to_string_lossy().into_owned(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

fn shell_name_from(argv0: &str) -> Option<String> {
    let name = argv0.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

// Lenient like atoi: garbage and negative levels count as zero.
fn parse_level(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(0).max(0)
}
