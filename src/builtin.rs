use crate::VERSION;
use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "exit" or "cd".
    fn name() -> &'static str;

    /// One-line summary shown by `help`.
    fn summary() -> &'static str;

    /// Executes the command using the provided output stream and environment.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        env: &mut Environment,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdout, env) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stderr, "{}: {e:#}", env.shell_name)?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        _env: &mut Environment,
    ) -> Result<ExitCode> {
        if self.is_error {
            writeln!(stderr, "{}", self.output.trim_end())?;
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// Names and summaries of every builtin, in the order `help` lists them.
pub(crate) fn catalog() -> [(&'static str, &'static str); 4] {
    [
        (Cd::name(), Cd::summary()),
        (Exit::name(), Exit::summary()),
        (Help::name(), Help::summary()),
        (Version::name(), Version::summary()),
    ]
}

fn version_line(env: &Environment) -> String {
    format!("{} (Abyss Shell) version {VERSION}", env.shell_name)
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn summary() -> &'static str {
        "change the working directory"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => t.clone(),
            _ => match env.home() {
                Some(home) => home.to_string(),
                None => anyhow::bail!("cd: HOME not set"),
            },
        };

        let path = PathBuf::from(&target);
        let new_dir = if path.is_absolute() {
            path
        } else {
            env.current_dir.join(path)
        };

        let canonical = fs::canonicalize(&new_dir).with_context(|| format!("cd {target}"))?;
        env::set_current_dir(&canonical).with_context(|| format!("cd {target}"))?;
        debug!(dir = %canonical.display(), "working directory changed");
        env.current_dir = canonical;
        env.refresh_pwd();
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell.
/// Without a code, exits with the status of the last command.
pub struct Exit {
    #[argh(positional)]
    /// exit code to terminate the shell with.
    pub code: Option<i32>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn summary() -> &'static str {
        "exit the shell"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let code = self.code.unwrap_or_else(|| env.status.code());
        env.should_exit = Some(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Print the shell version.
pub struct Version {}

impl BuiltinCommand for Version {
    fn name() -> &'static str {
        "version"
    }

    fn summary() -> &'static str {
        "print the shell version"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        writeln!(stdout, "{}", version_line(env))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List the builtin commands.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn summary() -> &'static str {
        "list the builtin commands"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        writeln!(stdout, "{}", version_line(env))?;
        writeln!(stdout)?;
        writeln!(stdout, "List of builtin commands:")?;
        for (name, summary) in catalog() {
            writeln!(stdout, "  {name:<10}{summary}")?;
        }
        Ok(0)
    }
}
