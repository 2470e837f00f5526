//! Secure process execution specification

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

/// Specification for a command to execute.
///
/// All subprocess execution goes through this type to ensure argv-style
/// invocation. Arguments are `Vec<OsString>`, never shell strings; no
/// `sh -c` or `cmd /C` evaluation occurs, so renderer input paths that
/// contain shell metacharacters are passed through verbatim.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Optional environment overrides
    pub env: Option<HashMap<OsString, OsString>>,
}

impl CommandSpec {
    /// Create a new `CommandSpec` for the given program.
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable override.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Build a `std::process::Command` from this spec.
    ///
    /// Uses `Command::new().args()` only; no shell interpretation.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            for (key, value) in env {
                command.env(key, value);
            }
        }
        command
    }

    /// Program name as a lossy string, for error messages.
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}
