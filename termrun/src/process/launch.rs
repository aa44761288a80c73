//! Immutable launch configuration shared by every invocation of a runner.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// What to run and where.
///
/// Built once, then handed to a [`Runner`](super::Runner), which keeps it
/// behind an `Arc` and never mutates it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path, or a bare command name still awaiting resolution.
    pub executable: PathBuf,

    /// Complete child environment. `None` inherits the parent's.
    ///
    /// When present, it replaces the inherited environment entirely.
    pub env: Option<HashMap<String, String>>,

    /// Working directory for the child. `None` inherits the parent's.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Create a spec for the given executable path or command name.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            env: None,
            working_dir: None,
        }
    }

    /// Set an environment variable, switching the spec to an explicit
    /// environment if it was inheriting.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Point the spec at a different executable, keeping env and cwd.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// True when the executable is a bare name like `ls` rather than a path.
    pub fn is_bare_name(&self) -> bool {
        is_bare_name(&self.executable)
    }

    pub fn program(&self) -> String {
        self.executable.display().to_string()
    }

    /// Build the command for one invocation, with all three stdio streams
    /// piped.
    pub(crate) fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if let Some(ref env) = self.env {
            cmd.env_clear();
            cmd.envs(env);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

pub(crate) fn is_bare_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
