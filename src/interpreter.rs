use crate::command::{CommandFactory, ExitCode};
use crate::editor::LineEditor;
use crate::env::Environment;
use crate::history::{HISTORY_BUDGET, History};
use crate::job::{self, JobControl};
use crate::parser;
use crate::terminal::Tty;
use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{debug, info};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports the builtins defined in this crate; everything else is an
/// external program resolved by the job layer.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The builtins every session starts with: `cd`, `exit`, `help`, `version`.
pub(crate) fn default_builtins() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Help>::default()),
        Box::new(Factory::<Version>::default()),
    ]
}

/// An interactive shell session.
///
/// The interpreter owns the [`Environment`] (variables, cwd, status register),
/// the list of [`CommandFactory`] objects consulted for builtins, the
/// [`History`] and the [`LineEditor`]. See [`Default`] for the builtins
/// included out of the box.
///
/// Example
/// ```
/// use abysh::Interpreter;
/// let mut sh = Interpreter::default();
/// sh.execute_line("GREETING=hello").unwrap();
/// assert_eq!(sh.env().get_var("GREETING"), Some("hello"));
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    history: History,
    history_path: Option<PathBuf>,
    editor: LineEditor,
    job_control: JobControl,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env: Environment::new(),
            commands,
            history: History::new(),
            history_path: None,
            editor: LineEditor::new(),
            job_control: JobControl::new(false),
        }
    }

    /// Replace the session environment.
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Load history from `path` and remember it for [`Interpreter::save_history`].
    pub fn attach_history(&mut self, path: PathBuf) -> Result<()> {
        self.history = History::load(&path, HISTORY_BUDGET)?;
        self.history_path = Some(path);
        Ok(())
    }

    /// Write history back to the file it was loaded from, if any.
    pub fn save_history(&self) -> Result<()> {
        match &self.history_path {
            Some(path) => self.history.save(path),
            None => Ok(()),
        }
    }

    /// `<name> <dir> > `, with ` [<code>]` before the `>` after a failure.
    pub fn prompt(&self) -> String {
        let code = self.env.status.code();
        if code == 0 {
            format!("{} {} > ", self.env.shell_name, self.env.prompt_dir())
        } else {
            format!("{} {} [{code}] > ", self.env.shell_name, self.env.prompt_dir())
        }
    }

    /// Takes charge of the terminal when stdin is one, so that pipelines get
    /// the foreground and the shell can take it back afterwards.
    ///
    /// Until this is called lines run without any terminal handoff.
    pub fn acquire_terminal(&mut self) -> Result<()> {
        self.job_control = JobControl::acquire()?;
        Ok(())
    }

    /// Exit code the process should terminate with right now.
    pub fn exit_code(&self) -> ExitCode {
        self.env.should_exit.unwrap_or_else(|| self.env.status.code())
    }

    /// Parse and run one line.
    ///
    /// A syntax error is reported on stderr and the line is dropped; it is not
    /// an error of the session.
    pub fn execute_line(&mut self, line: &str) -> Result<()> {
        let mut pipeline = match parser::parse(line, &self.env, self.env.status) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                debug!(%err, line, "line rejected");
                eprintln!("{}: {err}", self.env.shell_name);
                return Ok(());
            }
        };
        if pipeline.is_empty() {
            return Ok(());
        }
        debug!(stages = pipeline.stages.len(), ?pipeline, "line parsed");
        job::run(
            &mut pipeline,
            &mut self.env,
            &self.commands,
            &self.job_control,
        )
    }

    /// Read-eval-print loop on the controlling terminal.
    ///
    /// Returns the code the shell should exit with.
    pub fn repl(&mut self) -> Result<ExitCode> {
        self.acquire_terminal()?;
        let mut tty = Tty::new();
        info!(shell = %self.env.shell_name, "interactive session started");

        loop {
            self.env.refresh_pwd();
            let prompt = self.prompt();
            let line = match self.editor.edit(&mut tty, &prompt, &self.history) {
                Ok(line) => line,
                Err(err) => {
                    // Losing the terminal ends the session like `exit` would.
                    eprintln!("{}: can't read input: {err}", self.env.shell_name);
                    return Ok(self.exit_code());
                }
            };
            let line = line.trim();
            self.history.add(line);
            self.run_reporting(line);
            if let Some(code) = self.env.should_exit {
                return Ok(code);
            }
        }
    }

    /// Runs lines from a non-interactive source until it ends or `exit` runs.
    pub fn run_stream(&mut self, input: impl BufRead) -> Result<ExitCode> {
        for line in input.lines() {
            let line = line.context("can't read input")?;
            self.env.refresh_pwd();
            self.run_reporting(line.trim());
            if let Some(code) = self.env.should_exit {
                return Ok(code);
            }
        }
        Ok(self.exit_code())
    }

    fn run_reporting(&mut self, line: &str) {
        if let Err(err) = self.execute_line(line) {
            eprintln!("{}: {err:#}", self.env.shell_name);
        }
    }
}

impl Default for Interpreter {
    /// Create an interpreter with the default builtins: `cd`, `exit`, `help`
    /// and `version`. Any other name is run as an external program.
    fn default() -> Self {
        Self::new(default_builtins())
    }
}
