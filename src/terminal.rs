//! Terminal primitives used by the line editor and the job layer.

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

/// Width assumed when the terminal cannot be queried.
pub const DEFAULT_COLUMNS: usize = 80;

static RESIZED: AtomicBool = AtomicBool::new(false);

/// Signals the interactive shell ignores so that it can hand the terminal to a
/// pipeline and take it back afterwards. Children reset them before `exec`.
const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

nix::ioctl_read_bad!(window_size, libc::TIOCGWINSZ, libc::winsize);

extern "C" fn on_resize(_: libc::c_int) {
    RESIZED.store(true, Ordering::SeqCst);
}

/// Byte-level terminal surface the line editor works against.
///
/// [`Tty`] is the real implementation; tests drive the editor through an
/// in-memory one.
pub trait Terminal: Write {
    /// Blocks for the next input byte. `None` means end of input.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Current width in columns, never zero.
    fn columns(&mut self) -> usize;

    /// Returns and clears the pending resize notification.
    fn take_resize(&mut self) -> bool;

    /// Switches the terminal to raw mode until the returned guard is dropped.
    fn raw_mode(&mut self) -> io::Result<RawMode>;
}

/// Scoped raw mode. Dropping it restores the attributes saved on entry.
pub struct RawMode {
    saved: Option<Termios>,
}

impl RawMode {
    /// A guard that restores nothing, for surfaces that are not a real tty.
    pub fn inactive() -> Self {
        Self { saved: None }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = termios::tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &saved) {
                warn!(%err, "failed to restore terminal attributes");
            }
        }
    }
}

/// The controlling terminal: keys from stdin, output to stdout.
pub struct Tty {
    stdin: io::Stdin,
    stdout: io::Stdout,
}

impl Tty {
    pub fn new() -> Self {
        Self {
            stdin: io::stdin(),
            stdout: io::stdout(),
        }
    }
}

impl Default for Tty {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Tty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()
    }
}

impl Terminal for Tty {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.stdin.lock().read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn columns(&mut self) -> usize {
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCGWINSZ only writes into the winsize we hand it.
        match unsafe { window_size(self.stdout.as_raw_fd(), &mut size) } {
            Ok(_) if size.ws_col > 0 => usize::from(size.ws_col),
            _ => DEFAULT_COLUMNS,
        }
    }

    fn take_resize(&mut self) -> bool {
        RESIZED.swap(false, Ordering::SeqCst)
    }

    fn raw_mode(&mut self) -> io::Result<RawMode> {
        if !self.stdin.is_terminal() {
            return Ok(RawMode::inactive());
        }
        let saved = termios::tcgetattr(&self.stdin)?;
        let mut raw = saved.clone();
        raw.local_flags
            .remove(LocalFlags::ISIG | LocalFlags::ICANON | LocalFlags::ECHO);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&self.stdin, SetArg::TCSAFLUSH, &raw)?;
        trace!("terminal switched to raw mode");
        Ok(RawMode { saved: Some(saved) })
    }
}

/// Installs the resize handler and ignores the job-control signals.
///
/// Called once by an interactive session before the first prompt.
pub fn install_signal_handlers() -> nix::Result<()> {
    let resize = SigAction::new(
        SigHandler::Handler(on_resize),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: the handler only touches an atomic.
    unsafe {
        signal::sigaction(Signal::SIGWINCH, &resize)?;
        for sig in JOB_CONTROL_SIGNALS {
            signal::sigaction(sig, &ignore)?;
        }
    }
    Ok(())
}

/// Puts every signal the shell may have ignored back to its default action.
///
/// Runs in a freshly forked child. Ignored dispositions survive `exec`, and the
/// Rust runtime ignores `SIGPIPE`, which would keep `yes | head` running forever.
pub fn restore_default_signals() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in JOB_CONTROL_SIGNALS.iter().chain([Signal::SIGPIPE].iter()) {
        // SAFETY: installing SIG_DFL has no handler to race with.
        let _ = unsafe { signal::sigaction(*sig, &default) };
    }
}
