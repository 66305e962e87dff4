//! Invocation of external dump, archive and restore tools.
//!
//! Commands are built as argument vectors and never pass through a shell.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use derive_more::{Display, Error};

/// One external command line.
#[derive(Clone, Debug, Default)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Environment variable set for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Feeds the file at `path` to the child's stdin.
    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Writes the child's stdout to a new file at `path`.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The same command prefixed with `nice -n <level>`.
    fn niced(&self, level: i32) -> Self {
        let mut args = vec![
            OsString::from("-n"),
            OsString::from(level.to_string()),
            self.program.clone(),
        ];
        args.extend(self.args.iter().cloned());

        Self {
            program: OsString::from("nice"),
            args,
            ..self.clone()
        }
    }
}

/// Renders the command like a shell line. Environment values are masked.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.envs {
            write!(f, "{key}=*** ")?;
        }
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " > {}", stdout.display())?;
        }
        Ok(())
    }
}

/// Outcome of a finished child process.
#[derive(Clone, Debug)]
pub struct ProcessResult {
    /// Exit code, `-1` if the child was terminated by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }

    /// Turns a non-zero exit into [ProcessError::Failed].
    pub fn ensure_success(self, command: &CommandLine) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                program: command.program().to_string_lossy().into_owned(),
                exit_code: self.exit_code,
                stderr: self.stderr_lossy(),
            })
        }
    }
}

#[derive(Debug, Display, Error)]
/// Errors running an external command.
pub enum ProcessError {
    /// The program could not be started.
    #[display("Unable to run `{program}`: {source}")]
    Spawn { program: String, source: io::Error },
    /// A stdin/stdout redirect could not be opened.
    #[display("Unable to redirect to {}: {source}", path.display())]
    Redirect { path: PathBuf, source: io::Error },
    /// The program exited unsuccessfully.
    #[display("`{program}` exited with status {exit_code}: {stderr}")]
    Failed {
        program: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Runs [CommandLine]s, optionally with lowered CPU priority.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner {
    verbose: bool,
    nice_level: Option<i32>,
}

impl ProcessRunner {
    pub fn new(verbose: bool, nice_level: Option<i32>) -> Self {
        Self {
            verbose,
            nice_level,
        }
    }

    /// The command line that is actually executed for `command`.
    pub fn effective(&self, command: &CommandLine) -> CommandLine {
        match self.nice_level {
            Some(level) => command.niced(level),
            None => command.clone(),
        }
    }

    /// Runs `command` to completion.
    ///
    /// A non-zero exit is not an error here, callers decide with
    /// [ProcessResult::ensure_success].
    pub fn run(&self, command: &CommandLine) -> Result<ProcessResult, ProcessError> {
        let command = self.effective(command);
        if self.verbose {
            log::info!(target: "process", "Running: {command}");
        } else {
            log::debug!(target: "process", "Running: {command}");
        }

        let program = command.program.to_string_lossy().into_owned();
        let mut process = Command::new(&command.program);
        process.args(&command.args);
        for (key, value) in &command.envs {
            process.env(key, value);
        }

        process.stdin(match &command.stdin {
            Some(path) => Stdio::from(File::open(path).map_err(redirect_error(path))?),
            None => Stdio::null(),
        });
        let captures_stdout = command.stdout.is_none();
        process.stdout(match &command.stdout {
            Some(path) => Stdio::from(File::create(path).map_err(redirect_error(path))?),
            None => Stdio::piped(),
        });
        process.stderr(Stdio::piped());

        let output = process
            .output()
            .map_err(|source| ProcessError::Spawn { program, source })?;

        let result = ProcessResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: if captures_stdout {
                output.stdout
            } else {
                Vec::new()
            },
            stderr: output.stderr,
        };

        let stderr = result.stderr_lossy();
        if result.success() && !stderr.is_empty() {
            log::warn!(target: "process", "{stderr}");
        }
        log::trace!(target: "process", "Exited with {}", result.exit_code);

        Ok(result)
    }
}

fn redirect_error(path: &Path) -> impl FnOnce(io::Error) -> ProcessError + '_ {
    move |source| ProcessError::Redirect {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nice_is_a_pure_prefix() {
        let command = CommandLine::new("pg_dump").args(["-F", "c", "acme"]);
        let niced = ProcessRunner::new(false, Some(10)).effective(&command);

        assert_eq!(niced.program(), "nice");
        let args: Vec<_> = niced
            .arguments()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-n", "10", "pg_dump", "-F", "c", "acme"]);

        let plain = ProcessRunner::new(true, None).effective(&command);
        assert_eq!(plain.to_string(), "pg_dump -F c acme");
    }

    #[test]
    fn rendering_masks_environment_values() {
        let command = CommandLine::new("pg_restore")
            .env("PGPASSWORD", "hunter2")
            .arg("--clean")
            .stdout_to("/tmp/out");

        let rendered = command.to_string();
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "PGPASSWORD=*** pg_restore --clean > /tmp/out");
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner::default();

        let result = runner.run(&CommandLine::new("echo").arg("hello")).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_lossy(), "hello\n");

        let command = CommandLine::new("false");
        let result = runner.run(&command).unwrap();
        assert!(!result.success());
        assert!(matches!(
            result.ensure_success(&command),
            Err(ProcessError::Failed { .. })
        ));
    }

    #[test]
    fn redirects_stdout_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.sql");

        let result = ProcessRunner::default()
            .run(&CommandLine::new("echo").arg("dump").stdout_to(&out))
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(out).unwrap(), "dump\n");
    }

    #[test]
    fn feeds_stdin_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.sql");
        std::fs::write(&input, "select 1;").unwrap();

        let result = ProcessRunner::default()
            .run(&CommandLine::new("cat").stdin_from(&input))
            .unwrap();
        assert_eq!(result.stdout_lossy(), "select 1;");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let result = ProcessRunner::default().run(&CommandLine::new("backup-fu-no-such-binary"));
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
