//! Pipeline execution and terminal ownership.
//!
//! Every external stage of a pipeline is forked into one process group whose
//! id is the pid of the first child. Pipes connect consecutive external stages.
//! Once the group is complete the terminal is handed to it, the whole group is
//! reaped, and the shell takes the terminal back.

use crate::command::{CommandFactory, ExecutableCommand, ExitCode, ExitStatus};
use crate::env::Environment;
use crate::external::{EXEC_FAILED, PreparedCommand, exit_child};
use crate::parser::{CommandStage, Pipeline};
use crate::terminal;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, dup2, fork, getpgrp, pipe2, setpgid, tcsetpgrp};
use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::{debug, trace, warn};

/// Whether the shell moves the terminal's foreground group around.
///
/// Only meaningful when stdin is a terminal; otherwise every transfer is skipped.
#[derive(Debug, Clone, Copy)]
pub struct JobControl {
    interactive: bool,
}

impl JobControl {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    pub fn detect() -> Self {
        Self::new(io::stdin().is_terminal())
    }

    /// Detects a terminal on stdin and, if there is one, prepares the shell
    /// to pass it back and forth with pipelines.
    pub fn acquire() -> Result<Self> {
        let job_control = Self::detect();
        job_control
            .prepare()
            .context("can't install signal handlers")?;
        Ok(job_control)
    }

    // Reclaiming the terminal from a background group raises SIGTTOU, so the
    // job-control signals must be ignored before the first handoff.
    fn prepare(&self) -> nix::Result<()> {
        if self.interactive {
            terminal::install_signal_handlers()?;
            trace!("job-control signals ignored");
        }
        Ok(())
    }

    fn give_terminal(&self, pgid: Pid) {
        if !self.interactive {
            return;
        }
        match tcsetpgrp(io::stdin(), pgid) {
            Ok(()) => trace!(%pgid, "terminal handed to pipeline"),
            Err(err) => warn!(%err, %pgid, "failed to hand over the terminal"),
        }
    }

    fn reclaim_terminal(&self) {
        if !self.interactive {
            return;
        }
        let own = getpgrp();
        match tcsetpgrp(io::stdin(), own) {
            Ok(()) => trace!(pgid = %own, "terminal reclaimed"),
            Err(err) => warn!(%err, "failed to reclaim the terminal"),
        }
    }
}

enum Step {
    Skip,
    Builtin(Box<dyn ExecutableCommand>),
    External,
}

/// Who decides the exit status: the rightmost stage that ran.
#[derive(Debug, Clone, Copy)]
enum FinalStage {
    Builtin(ExitCode),
    External(Pid),
}

#[derive(Default)]
struct Job {
    pgid: Option<Pid>,
    final_stage: Option<FinalStage>,
}

/// Runs a parsed line.
///
/// Bare assignment lines update the shell's variables. Otherwise builtins run
/// in the shell process at their position (outside the pipe chain), external
/// stages are forked and connected, and `env.status` ends up holding the
/// status of the rightmost stage.
pub fn run(
    pipeline: &mut Pipeline,
    env: &mut Environment,
    builtins: &[Box<dyn CommandFactory>],
    job_control: &JobControl,
) -> Result<()> {
    if pipeline.is_bare_assignment() {
        for assignment in &pipeline.stages[0].assignments {
            debug!(name = %assignment.name, value = assignment.value(), "shell variable assigned");
            env.assign(&assignment.name, assignment.value.as_deref());
        }
        return Ok(());
    }

    let steps: Vec<Step> = pipeline
        .stages
        .iter()
        .map(|stage| classify(stage, builtins))
        .collect();

    let mut job = Job::default();
    let launched = launch(pipeline, steps, env, &mut job);

    let mut final_external = None;
    if let Some(pgid) = job.pgid {
        job_control.give_terminal(pgid);
        let watched = match job.final_stage {
            Some(FinalStage::External(pid)) => Some(pid),
            _ => None,
        };
        final_external = reap(pgid, pipeline, watched, &env.shell_name);
        job_control.reclaim_terminal();
    }

    match job.final_stage {
        Some(FinalStage::Builtin(code)) => env.status = ExitStatus::exited(code),
        Some(FinalStage::External(_)) => {
            if let Some(status) = final_external {
                env.status = status;
            }
        }
        None => {}
    }
    launched
}

fn classify(stage: &CommandStage, builtins: &[Box<dyn CommandFactory>]) -> Step {
    let Some((name, args)) = stage.argv.split_first() else {
        return Step::Skip;
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match builtins
        .iter()
        .find_map(|factory| factory.try_create(name, &args))
    {
        Some(command) => Step::Builtin(command),
        None => Step::External,
    }
}

fn launch(
    pipeline: &mut Pipeline,
    steps: Vec<Step>,
    env: &mut Environment,
    job: &mut Job,
) -> Result<()> {
    let last_external = steps.iter().rposition(|step| matches!(step, Step::External));
    // Read end of the pipe feeding the next external stage.
    let mut upstream: Option<OwnedFd> = None;

    for (index, (stage, step)) in pipeline.stages.iter_mut().zip(steps).enumerate() {
        match step {
            Step::Skip => trace!(index, "stage has nothing to execute"),
            Step::Builtin(command) => {
                let code = run_builtin(command, env);
                job.final_stage = Some(FinalStage::Builtin(code));
            }
            Step::External => {
                let is_last = Some(index) == last_external;
                let command = PreparedCommand::prepare(stage, env)?;
                let (downstream_read, downstream_write) = if is_last {
                    (None, None)
                } else {
                    let (read, write) = pipe2(OFlag::O_CLOEXEC).context("pipe failed")?;
                    (Some(read), Some(write))
                };
                let sync = if is_last {
                    Some(pipe2(OFlag::O_CLOEXEC).context("pipe failed")?)
                } else {
                    None
                };
                io::stdout().flush()?;

                // SAFETY: the shell is single-threaded and everything the child
                // needs was allocated above; it only dups, writes and execs.
                match unsafe { fork() }.context("fork failed")? {
                    ForkResult::Child => exec_stage(
                        job.pgid,
                        upstream.as_ref(),
                        downstream_write.as_ref(),
                        sync.map(|(_, write)| write),
                        &command,
                    ),
                    ForkResult::Parent { child } => {
                        let pgid = *job.pgid.get_or_insert(child);
                        // The child does the same; whichever runs first wins and
                        // the other gets EACCES or ESRCH once it has exec'd.
                        if let Err(err) = setpgid(child, pgid) {
                            trace!(%err, %child, "setpgid from parent");
                        }
                        debug!(index, %child, %pgid, name = command.name(), "stage spawned");
                        stage.pid = Some(child);
                        job.final_stage = Some(FinalStage::External(child));

                        // Dropping the replaced read end closes our copy of it.
                        upstream = downstream_read;
                        drop(downstream_write);
                        if let Some((read, write)) = sync {
                            drop(write);
                            wait_for_group(read);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_builtin(command: Box<dyn ExecutableCommand>, env: &mut Environment) -> ExitCode {
    let stdout = io::stdout();
    let stderr = io::stderr();
    match command.execute(&mut stdout.lock(), &mut stderr.lock(), env) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {err:#}", env.shell_name);
            1
        }
    }
}

/// Child side of a fork: join the group, wire stdio, signal readiness, exec.
fn exec_stage(
    pgid: Option<Pid>,
    stdin: Option<&OwnedFd>,
    stdout: Option<&OwnedFd>,
    sync: Option<OwnedFd>,
    command: &PreparedCommand,
) -> ! {
    let _ = setpgid(Pid::from_raw(0), pgid.unwrap_or(Pid::from_raw(0)));
    // Every pipe end is close-on-exec; only the dup'ed copies survive.
    if let Some(fd) = stdin {
        if dup2(fd.as_raw_fd(), libc::STDIN_FILENO).is_err() {
            exit_child(EXEC_FAILED);
        }
    }
    if let Some(fd) = stdout {
        if dup2(fd.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
            exit_child(EXEC_FAILED);
        }
    }
    terminal::restore_default_signals();
    if let Some(sync) = sync {
        let _ = File::from(sync).write_all(&[1]);
    }
    command.exec()
}

// Blocks until the last child has joined the group (or died trying).
fn wait_for_group(read: OwnedFd) {
    let mut byte = [0u8; 1];
    let mut file = File::from(read);
    loop {
        match file.read(&mut byte) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(%err, "pipeline sync read failed");
                return;
            }
            Ok(_) => return,
        }
    }
}

/// Waits for every member of the group. Returns the status of `watched`.
fn reap(
    pgid: Pid,
    pipeline: &Pipeline,
    watched: Option<Pid>,
    shell_name: &str,
) -> Option<ExitStatus> {
    let group = Pid::from_raw(-pgid.as_raw());
    let mut watched_status = None;
    loop {
        let (pid, status) = match waitpid(group, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(pid, code)) => (pid, ExitStatus::exited(code)),
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                if signal != Signal::SIGPIPE {
                    let name = stage_name(pipeline, pid);
                    eprintln!(
                        "{shell_name}: {name} ({pid}) terminated by {}",
                        signal.as_str()
                    );
                }
                (pid, ExitStatus::signaled(signal as i32))
            }
            Ok(WaitStatus::Stopped(pid, signal)) => {
                let name = stage_name(pipeline, pid);
                eprintln!(
                    "{shell_name}: {name} ({pid}) stopped by {}, terminating",
                    signal.as_str()
                );
                // There is no job table to park a stopped pipeline in.
                terminate_stopped(pgid);
                continue;
            }
            Ok(other) => {
                trace!(?other, "ignoring wait status");
                continue;
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(err) => {
                warn!(%err, %pgid, "waitpid failed");
                break;
            }
        };
        debug!(%pid, raw = status.raw(), "pipeline member reaped");
        if Some(pid) == watched {
            watched_status = Some(status);
        }
    }
    watched_status
}

fn terminate_stopped(pgid: Pid) {
    for signal in [Signal::SIGTERM, Signal::SIGCONT] {
        if let Err(err) = killpg(pgid, signal) {
            warn!(%err, %pgid, ?signal, "failed to signal stopped pipeline");
        }
    }
}

fn stage_name(pipeline: &Pipeline, pid: Pid) -> &str {
    pipeline
        .stages
        .iter()
        .find(|stage| stage.pid == Some(pid))
        .and_then(CommandStage::name)
        .unwrap_or("?")
}
