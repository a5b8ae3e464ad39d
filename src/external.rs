use crate::env::Environment;
use crate::parser::CommandStage;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::libc;
use nix::unistd::{AccessFlags, access, execve};
use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exit status of a child whose command could not be found.
pub const NOT_FOUND: i32 = 127;
/// Exit status of a child whose `exec` failed for another reason.
pub const EXEC_FAILED: i32 = 1;

/// Resolve a command path the way the shell does.
///
/// Behavior:
/// - Name containing `/`: used as-is, joined onto `cwd` when relative. No
///   existence check; `exec` reports a missing file.
/// - Otherwise: each `:`-separated entry of `search_paths` is tried as
///   `entry/name`, and the first executable regular file wins.
/// - Empty name, or no match: `None`.
pub fn find_command_path(search_paths: &str, cwd: &Path, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = Path::new(name);
        return Some(if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        });
    }
    find_in_path(search_paths, name)
}

fn find_in_path(search_paths: &str, name: &str) -> Option<PathBuf> {
    search_paths
        .split(':')
        .map(|dir| PathBuf::from(format!("{dir}/{name}")))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Everything a forked child needs to `exec` one stage.
///
/// Built in the parent so that the child only has to call `execve`.
pub struct PreparedCommand {
    name: String,
    path: Option<CString>,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl PreparedCommand {
    /// Resolves the stage's executable and assembles its argv and environment.
    ///
    /// The child environment is the shell's variables, overlaid with the
    /// stage-local assignments and `_` set to the resolved path.
    pub fn prepare(stage: &CommandStage, env: &Environment) -> Result<Self> {
        let name = stage.name().unwrap_or_default().to_string();
        let resolved = find_command_path(env.search_path(), &env.current_dir, &name);
        debug!(%name, resolved = ?resolved, "command resolved");

        let resolved_text = resolved
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut vars: HashMap<&str, &str> = env
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for assignment in &stage.assignments {
            vars.insert(&assignment.name, assignment.value());
        }
        vars.insert("_", &resolved_text);

        let envp = vars
            .iter()
            .map(|(k, v)| CString::new(format!("{k}={v}")))
            .collect::<Result<Vec<_>, _>>()
            .context("environment contains a NUL byte")?;
        let argv = stage
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context("argument contains a NUL byte")?;
        let path = match resolved {
            Some(_) => Some(CString::new(resolved_text).context("path contains a NUL byte")?),
            None => None,
        };

        Ok(Self {
            name,
            path,
            argv,
            envp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the current process image. Only returns by exiting.
    ///
    /// Must be called in a forked child.
    pub fn exec(&self) -> ! {
        let Some(path) = &self.path else {
            eprintln!("Unknown command: {}", self.name);
            exit_child(NOT_FOUND);
        };
        let err = match execve(path, &self.argv, &self.envp) {
            Err(err) => err,
            Ok(never) => match never {},
        };
        match err {
            Errno::ENOENT | Errno::ENOTDIR | Errno::EACCES => {
                eprintln!("Unknown command: {}", self.name);
                exit_child(NOT_FOUND)
            }
            err => {
                eprintln!("{}: {}", self.name, err.desc());
                exit_child(EXEC_FAILED)
            }
        }
    }
}

/// Leaves a forked child without running the parent's exit handlers.
pub fn exit_child(code: i32) -> ! {
    // SAFETY: _exit never returns and touches no Rust state.
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Assignment;
    use std::fs;
    use std::fs::File;

    #[test]
    fn absolute_path_is_used_as_is() {
        let res = find_command_path("/bin", Path::new("/somewhere"), "/bin/sh");
        assert_eq!(res, Some(PathBuf::from("/bin/sh")));
    }

    #[test]
    fn relative_path_with_slash_joins_cwd() {
        let res = find_command_path("/bin", Path::new("/work"), "./run.sh");
        assert_eq!(res, Some(PathBuf::from("/work/./run.sh")));
        let res = find_command_path("/bin", Path::new("/work"), "bin/tool");
        assert_eq!(res, Some(PathBuf::from("/work/bin/tool")));
    }

    #[test]
    fn single_component_found_in_path() {
        let found = find_command_path("/nonexistent:/bin", Path::new("/"), "sh")
            .expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path("/bin:/usr/bin", Path::new("/"), "nonexisting_cmd_for_abysh");
        assert!(res.is_none(), "Expected not to find the command in PATH");
    }

    #[test]
    fn empty_name_is_none() {
        assert!(find_command_path("/bin", Path::new("/"), "").is_none());
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let dir = std::env::temp_dir().join(format!("abysh_external_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        File::create(dir.join("plain")).expect("touch plain");

        let search = format!("{}:/bin", dir.display());
        assert!(find_command_path(&search, Path::new("/"), "plain").is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn prepared_environment_overlays_stage_assignments() {
        let env = Environment::with_vars([("PATH", "/bin"), ("FOO", "bar"), ("KEEP", "1")], "/");
        let stage = CommandStage {
            argv: vec!["sh".to_string(), "-c".to_string(), "true".to_string()],
            assignments: vec![
                Assignment {
                    name: "FOO".to_string(),
                    value: Some("baz".to_string()),
                },
                Assignment {
                    name: "NEW".to_string(),
                    value: None,
                },
            ],
            pid: None,
        };
        let prepared = PreparedCommand::prepare(&stage, &env).unwrap();
        let mut envp: Vec<String> = prepared
            .envp
            .iter()
            .map(|entry| entry.to_string_lossy().into_owned())
            .collect();
        envp.sort();
        assert_eq!(envp, vec!["FOO=baz", "KEEP=1", "NEW=", "PATH=/bin", "_=/bin/sh"]);
        assert_eq!(prepared.argv.len(), 3);
        assert_eq!(prepared.name(), "sh");
        // the shell's own table is untouched
        assert_eq!(env.get_var("FOO"), Some("bar"));
    }

    #[test]
    fn unresolved_command_has_no_path() {
        let env = Environment::with_vars([("PATH", "/bin")], "/");
        let stage = CommandStage {
            argv: vec!["nonexisting_cmd_for_abysh".to_string()],
            ..CommandStage::default()
        };
        let prepared = PreparedCommand::prepare(&stage, &env).unwrap();
        assert!(prepared.path.is_none());
    }
}
