use abysh::{Interpreter, VERSION};
use anyhow::{Context, Result};
use argh::FromArgs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::info;

const HISTORY_FILE: &str = ".abysh_history";

#[derive(FromArgs)]
/// Abyss Shell: an interactive shell with pipelines and job control.
struct Args {
    /// history file to load and save (default: $HOME/.abysh_history)
    #[argh(option)]
    history: Option<PathBuf>,

    /// do not load or save history
    #[argh(switch)]
    no_history: bool,

    /// write diagnostic logs to this file
    #[argh(option)]
    log: Option<PathBuf>,

    /// run a single line and exit with its status
    #[argh(option, short = 'c')]
    command: Option<String>,

    /// print the version and exit
    #[argh(switch)]
    version: bool,
}

fn main() {
    let args: Args = argh::from_env();
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("abysh: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    init_tracing(args.log.as_ref())?;

    let argv0 = std::env::args().next().unwrap_or_default();
    let mut shell = Interpreter::default();
    let warnings = shell.env_mut().bootstrap(&argv0);
    for warning in warnings {
        eprintln!("{warning}");
    }

    if args.version {
        println!("{} (Abyss Shell) version {VERSION}", shell.env().shell_name);
        return Ok(0);
    }

    shell.acquire_terminal()?;
    if let Some(line) = &args.command {
        shell.execute_line(line)?;
        return Ok(shell.exit_code());
    }

    if !args.no_history {
        let path = args.history.clone().or_else(|| {
            shell
                .env()
                .home()
                .map(|home| PathBuf::from(home).join(HISTORY_FILE))
        });
        if let Some(path) = path {
            if let Err(e) = shell.attach_history(path) {
                eprintln!("{}: {e:#}", shell.env().shell_name);
            }
        }
    }

    let code = if io::stdin().is_terminal() {
        shell.repl()?
    } else {
        shell.run_stream(io::stdin().lock())?
    };
    info!(code, "session finished");

    shell
        .save_history()
        .context("history was not saved")?;
    Ok(code)
}

// Logs go to a file so they never interleave with the prompt. Enabled by
// --log or RUST_LOG; with only RUST_LOG set they go to stderr.
fn init_tracing(log: Option<&PathBuf>) -> Result<()> {
    let from_env = std::env::var("RUST_LOG").is_ok();
    if log.is_none() && !from_env {
        return Ok(());
    }
    let filter = if from_env {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new("debug")
    };
    match log {
        Some(path) => {
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("can't create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(log_file)
                .with_ansi(false)
                .init();
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(false)
            .init(),
    }
    Ok(())
}
