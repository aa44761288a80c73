//! Bare command name to absolute path, via an external lookup program.
//!
//! Results are cached per name for the resolver's lifetime. Each name has
//! its own once-cell, so concurrent first-time lookups of the same name
//! share a single lookup subprocess instead of racing to launch several.
//! Failed lookups are not cached and leave no entry behind; the next call
//! tries again.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

use super::handle::ProcessHandle;
use super::launch::LaunchSpec;
use super::message::MessagesExt;

#[cfg(not(windows))]
const DEFAULT_LOOKUP_PROGRAM: &str = "/usr/bin/which";

#[cfg(windows)]
const DEFAULT_LOOKUP_PROGRAM: &str = "where.exe";

type Slot = Arc<OnceCell<PathBuf>>;

struct Inner {
    program: PathBuf,
    leading_args: Vec<OsString>,
    cache: Mutex<HashMap<String, Slot>>,
}

/// Shared resolution cache.
///
/// Construct one per application (or per test) and clone it freely; clones
/// share the cache.
#[derive(Clone)]
pub struct ExecutableResolver {
    inner: Arc<Inner>,
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutableResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableResolver")
            .field("program", &self.inner.program)
            .field("cached", &self.lock().len())
            .finish()
    }
}

impl ExecutableResolver {
    /// Resolver backed by the platform's `which` equivalent.
    pub fn new() -> Self {
        Self::with_lookup_program(DEFAULT_LOOKUP_PROGRAM, Vec::<OsString>::new())
    }

    /// Resolver backed by a custom lookup command.
    ///
    /// The lookup runs as `program leading_args... <name>` and must print
    /// the resolved path on its first output line, exiting 0 on success.
    pub fn with_lookup_program<I, S>(program: impl Into<PathBuf>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            inner: Arc::new(Inner {
                program: program.into(),
                leading_args: leading_args.into_iter().map(Into::into).collect(),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `name`, running the lookup program with the given
    /// environment and working directory on a cache miss.
    ///
    /// The first successful resolution of a name wins; later calls return
    /// it regardless of the environment they pass.
    pub async fn resolve(
        &self,
        name: &str,
        env: Option<&HashMap<String, String>>,
        working_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        let slot = Arc::clone(self.lock().entry(name.to_owned()).or_default());

        if let Some(path) = slot.get() {
            debug!(command = name, path = %path.display(), "resolver cache hit");
            return Ok(path.clone());
        }

        match slot
            .get_or_try_init(|| self.lookup(name, env, working_dir))
            .await
        {
            Ok(path) => Ok(path.clone()),
            Err(e) => {
                self.evict_empty(name, &slot);
                Err(e)
            }
        }
    }

    /// Forget `slot` if it is still the entry for `name` and never filled,
    /// so names that keep failing do not pile up in the cache.
    fn evict_empty(&self, name: &str, slot: &Slot) {
        let mut cache = self.lock();
        if cache
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
        {
            cache.remove(name);
        }
    }

    /// Previously resolved path for `name`, without running anything.
    pub fn cached(&self, name: &str) -> Option<PathBuf> {
        self.lock().get(name).and_then(|slot| slot.get().cloned())
    }

    async fn lookup(
        &self,
        name: &str,
        env: Option<&HashMap<String, String>>,
        working_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        debug!(command = name, lookup = %self.inner.program.display(), "resolver cache miss");

        let spec = LaunchSpec {
            executable: self.inner.program.clone(),
            env: env.cloned(),
            working_dir: working_dir.map(Path::to_path_buf),
        };

        let mut args = self.inner.leading_args.clone();
        args.push(name.into());

        let outcome = match ProcessHandle::accumulating(Arc::new(spec)).launch(args) {
            Ok(handle) => handle.drain_all().await,
            Err(e) => Err(e),
        };

        let messages = outcome.map_err(|e| {
            warn!(command = name, error = %e, "executable lookup failed");
            RunnerError::NotFound(name.to_owned())
        })?;

        let path = messages
            .joined_text()
            .as_deref()
            .and_then(first_line)
            .map(PathBuf::from)
            .ok_or_else(|| RunnerError::NotFound(name.to_owned()))?;

        debug!(command = name, path = %path.display(), "resolved executable");
        Ok(path)
    }
}

/// First non-blank line of the lookup output.
fn first_line(text: &str) -> Option<&str> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| !line.trim().is_empty())
}
