//! Abyss Shell: a small interactive shell with pipelines and job control.
//!
//! The crate is split along the path a line of input travels. The [`editor`]
//! reads one line from a raw-mode terminal (cursor motion, history browsing,
//! a single-slot kill ring). The [`parser`] expands and splits that line in a
//! single pass into a [`parser::Pipeline`] of stages, each with its own
//! arguments and leading `NAME=value` assignments. The job layer then forks
//! every stage into one process group, wires pipes between them, hands the
//! terminal to that group and reaps it.
//!
//! The main entry point is [`Interpreter`], which owns the session state
//! (variables, history, exit status) and drives the read-eval-print loop.

mod builtin;
pub mod command;
pub mod editor;
pub mod env;
mod external;
pub mod history;
mod interpreter;
mod job;
mod keys;
pub mod parser;
pub mod terminal;

/// Just a convenient re-export of the interactive session.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;

/// Version reported by the `version` and `help` builtins.
pub const VERSION: &str = "0.3.0";
