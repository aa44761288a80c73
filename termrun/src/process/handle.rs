//! One process invocation: spawn, stream, write, wait.
//!
//! A [`ProcessHandle`] starts out `Idle`, becomes `Running` once the OS
//! process is up, and reaches `Completed` only after the process has exited
//! *and* both output streams have drained. Every chunk the observer will
//! ever see has therefore been delivered before any termination callback
//! runs or any waiter wakes.

use std::ffi::OsStr;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

use super::launch::LaunchSpec;
use super::message::Message;
use super::multiplexer::{Observer, StreamMultiplexer};
use super::status::{Status, Termination};

/// Exit code reported when the OS gives neither a code nor a signal.
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Writers serialize on the inner lock; the outer slot is only ever held
/// for a clone or a `take`, never across an await.
type StdinSlot = Arc<tokio::sync::Mutex<ChildStdin>>;

struct Shared {
    spec: Arc<LaunchSpec>,
    termination: Termination,
    stdin: Mutex<Option<StdinSlot>>,
    observer: Mutex<Option<Observer>>,
    collected: Option<Arc<Mutex<Vec<Message>>>>,
    launched: AtomicBool,
    pid: AtomicU32,
    kill: Notify,
}

/// Caller-side view of a single process invocation.
///
/// Cheap to clone; every clone refers to the same process.
#[derive(Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.shared.spec.program())
            .field("status", &self.status())
            .field("pid", &self.id())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Create an idle handle that will report chunks to `observer`.
    pub fn new(spec: Arc<LaunchSpec>, observer: Option<Observer>) -> Self {
        Self::build(spec, observer, None)
    }

    /// Create an idle handle that keeps every chunk for [`drain_all`].
    ///
    /// [`drain_all`]: Self::drain_all
    pub fn accumulating(spec: Arc<LaunchSpec>) -> Self {
        let store = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&store);
        let observer: Observer = Box::new(move |message| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
        });
        Self::build(spec, Some(observer), Some(store))
    }

    fn build(
        spec: Arc<LaunchSpec>,
        observer: Option<Observer>,
        collected: Option<Arc<Mutex<Vec<Message>>>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                spec,
                termination: Termination::new(),
                stdin: Mutex::new(None),
                observer: Mutex::new(observer),
                collected,
                launched: AtomicBool::new(false),
                pid: AtomicU32::new(0),
                kill: Notify::new(),
            }),
        }
    }

    /// Spawn the process with `args` and start streaming its output.
    ///
    /// Must be called within a Tokio runtime. A handle launches at most
    /// once; a second call fails with [`RunnerError::AlreadyLaunched`].
    /// If the spawn itself fails, every waiter on this handle, past or
    /// future, gets [`RunnerError::WatcherLost`].
    pub fn launch<I, S>(self, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if self.shared.launched.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyLaunched);
        }

        let spec = &self.shared.spec;
        let args: Vec<_> = args.into_iter().collect();
        let mut child = match spec.command(&args).spawn() {
            Ok(child) => child,
            Err(source) => {
                // No watcher will ever publish; release anyone already waiting.
                self.shared.termination.abandon();
                return Err(RunnerError::Launch {
                    program: spec.program(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        self.shared.pid.store(pid, Ordering::SeqCst);
        debug!(program = %spec.program(), args = args.len(), pid, "process started");

        *self.shared.stdin_slot() = child
            .stdin
            .take()
            .map(|stdin| Arc::new(tokio::sync::Mutex::new(stdin)));

        let observer = self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let multiplexer =
            StreamMultiplexer::start(child.stdout.take(), child.stderr.take(), observer);

        self.shared.termination.mark_running();
        tokio::spawn(watch_termination(child, multiplexer, Arc::clone(&self.shared)));

        Ok(self)
    }

    pub fn status(&self) -> Status {
        self.shared.termination.status()
    }

    /// OS process id, once launched.
    pub fn id(&self) -> Option<u32> {
        match self.shared.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.shared.spec
    }

    /// Write bytes to the child's stdin.
    ///
    /// Fails with [`RunnerError::Write`] before launch, after
    /// [`close_stdin`](Self::close_stdin), after completion, or when the
    /// child has stopped reading.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let slot = self.shared.stdin_slot().clone().ok_or_else(stdin_closed)?;
        let mut stdin = slot.lock().await;
        stdin.write_all(bytes).await.map_err(RunnerError::Write)?;
        stdin.flush().await.map_err(RunnerError::Write)
    }

    /// Close the child's stdin so it sees end-of-input.
    pub async fn close_stdin(&self) {
        let slot = self.shared.stdin_slot().take();
        if let Some(slot) = slot {
            let _ = slot.lock().await.shutdown().await;
        }
    }

    /// Register `callback` to run once with the final status.
    ///
    /// Registering after completion runs the callback immediately on the
    /// calling thread. Otherwise it runs on the runtime worker that
    /// publishes completion.
    pub fn on_termination<F>(&self, callback: F)
    where
        F: FnOnce(Status) + Send + 'static,
    {
        self.shared.termination.subscribe(Box::new(callback));
    }

    /// Block the calling thread until the process completes.
    ///
    /// Must not be called from a runtime worker thread. Use
    /// [`wait`](Self::wait) in async code.
    pub fn wait_blocking(&self) -> Result<()> {
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.on_termination(move |status| {
            let _ = tx.send(status);
        });
        rx.recv()
            .map_err(|_| RunnerError::WatcherLost)?
            .into_result()
    }

    /// Wait for completion without blocking a thread.
    pub async fn wait(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.on_termination(move |status| {
            let _ = tx.send(status);
        });
        rx.await.map_err(|_| RunnerError::WatcherLost)?.into_result()
    }

    /// Wait for completion and hand back every chunk, in delivery order.
    ///
    /// Only handles built with [`accumulating`](Self::accumulating) collect
    /// chunks; any other handle yields an empty list.
    pub async fn drain_all(&self) -> Result<Vec<Message>> {
        self.wait().await?;
        Ok(self.take_collected())
    }

    fn take_collected(&self) -> Vec<Message> {
        self.shared
            .collected
            .as_ref()
            .map(|store| std::mem::take(&mut *store.lock().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default()
    }

    /// Ask the OS to kill the process.
    ///
    /// Completion still goes through the usual drain-then-publish path.
    /// Calling this before launch or after completion has no effect.
    pub fn kill(&self) {
        if self.status() == Status::Running {
            self.shared.kill.notify_one();
        }
    }
}

impl Shared {
    fn stdin_slot(&self) -> std::sync::MutexGuard<'_, Option<StdinSlot>> {
        self.stdin.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stdin_closed() -> RunnerError {
    RunnerError::Write(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "stdin is closed",
    ))
}

/// Drops pending termination callbacks if the watcher goes away without
/// publishing, so waiters fail with [`RunnerError::WatcherLost`] instead of
/// hanging.
struct AbandonOnDrop(Arc<Shared>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.termination.abandon();
    }
}

/// Wait for exit, then for the streams to drain, then publish completion.
async fn watch_termination(mut child: Child, multiplexer: StreamMultiplexer, shared: Arc<Shared>) {
    let guard = AbandonOnDrop(shared);
    let shared = &guard.0;

    let exit = tokio::select! {
        exit = child.wait() => exit,
        () = shared.kill.notified() => {
            debug!(pid = ?child.id(), "kill requested");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill process");
            }
            child.wait().await
        }
    };

    let code = match exit {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!(error = %e, "failed to collect process exit status");
            UNKNOWN_EXIT_CODE
        }
    };
    debug!(program = %shared.spec.program(), exit_code = code, "process exited");

    multiplexer.drained().await;
    shared.stdin_slot().take();
    shared.termination.complete(code);
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn sh(script: &str) -> (Arc<LaunchSpec>, Vec<String>) {
        (
            Arc::new(LaunchSpec::new("/bin/sh")),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    async fn test_idle_until_launched() {
        let (spec, _) = sh("true");
        let handle = ProcessHandle::new(spec, None);
        assert_eq!(handle.status(), Status::Idle);
        assert_eq!(handle.id(), None);
        assert!(matches!(
            handle.write(b"x").await,
            Err(RunnerError::Write(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_reports_running_then_completed() {
        let (spec, args) = sh("sleep 0.2");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        assert_eq!(handle.status(), Status::Running);
        assert!(handle.id().is_some());

        handle.wait().await.unwrap();
        assert_eq!(handle.status(), Status::Completed(0));
    }

    #[tokio::test]
    async fn test_launch_twice_fails() {
        let (spec, args) = sh("true");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        let again = handle.clone().launch(&args);
        assert!(matches!(again, Err(RunnerError::AlreadyLaunched)));
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let spec = Arc::new(LaunchSpec::new("/definitely/not/here"));
        let result = ProcessHandle::new(spec, None).launch(Vec::<String>::new());
        match result {
            Err(RunnerError::Launch { program, .. }) => assert_eq!(program, "/definitely/not/here"),
            other => panic!("expected launch error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_launch_releases_waiters() {
        let spec = Arc::new(LaunchSpec::new("/definitely/not/here"));
        let handle = ProcessHandle::new(spec, None);

        let waiter = handle.clone();
        let early = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;

        assert!(handle.clone().launch(Vec::<String>::new()).is_err());

        let early = tokio::time::timeout(Duration::from_secs(2), early)
            .await
            .expect("waiter registered before launch should resolve")
            .unwrap();
        assert!(matches!(early, Err(RunnerError::WatcherLost)));

        let late = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .expect("waiter registered after launch should resolve");
        assert!(matches!(late, Err(RunnerError::WatcherLost)));
        assert!(matches!(handle.wait_blocking(), Err(RunnerError::WatcherLost)));
        assert_eq!(handle.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let (spec, args) = sh("exit 7");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        let result = handle.wait().await;
        assert!(matches!(result, Err(RunnerError::NonZeroExit(7))));
        assert_eq!(handle.status(), Status::Completed(7));
    }

    #[tokio::test]
    async fn test_output_delivered_before_completion() {
        let (spec, args) = sh("i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done; echo err >&2");
        let delivered = Arc::new(AtomicUsize::new(0));
        let at_completion = Arc::new(AtomicUsize::new(usize::MAX));

        let counter = Arc::clone(&delivered);
        let observer: Observer = Box::new(move |m| {
            counter.fetch_add(m.len(), Ordering::SeqCst);
        });
        let handle = ProcessHandle::new(spec, Some(observer)).launch(&args).unwrap();

        let (seen, snapshot) = (Arc::clone(&delivered), Arc::clone(&at_completion));
        handle.on_termination(move |_| {
            snapshot.store(seen.load(Ordering::SeqCst), Ordering::SeqCst);
        });
        handle.wait().await.unwrap();

        let expected: usize = (0..200).map(|i| format!("line-{i}\n").len()).sum::<usize>() + 4;
        assert_eq!(delivered.load(Ordering::SeqCst), expected);
        assert_eq!(at_completion.load(Ordering::SeqCst), expected);
    }

    #[tokio::test]
    async fn test_late_on_termination_fires_immediately() {
        let (spec, args) = sh("exit 3");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        let _ = handle.wait().await;

        let fired = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&fired);
        handle.on_termination(move |status| *slot.lock().unwrap() = Some(status));
        assert_eq!(*fired.lock().unwrap(), Some(Status::Completed(3)));
    }

    #[tokio::test]
    async fn test_write_then_close_stdin() {
        let spec = Arc::new(LaunchSpec::new("/bin/cat"));
        let handle = ProcessHandle::accumulating(spec)
            .launch(Vec::<String>::new())
            .unwrap();

        handle.write(b"ping\n").await.unwrap();
        handle.close_stdin().await;
        let messages = handle.drain_all().await.unwrap();

        let out: Vec<u8> = messages.iter().flat_map(|m| m.bytes().to_vec()).collect();
        assert_eq!(out, b"ping\n");
        assert!(messages.iter().all(Message::is_output));

        assert!(matches!(
            handle.write(b"late").await,
            Err(RunnerError::Write(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_right_after_launch_reach_stdin() {
        let spec = Arc::new(LaunchSpec::new("/bin/cat"));
        let handle = ProcessHandle::accumulating(spec);
        assert!(handle.write(b"early").await.is_err());

        let handle = handle.launch(Vec::<String>::new()).unwrap();
        let writers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.write(b"abcd").await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        handle.close_stdin().await;

        let messages = handle.drain_all().await.unwrap();
        let total: usize = messages.iter().map(Message::len).sum();
        assert_eq!(total, 32);
    }

    #[tokio::test]
    async fn test_kill_completes_with_signal_code() {
        let (spec, args) = sh("exec sleep 30");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.kill();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("kill should end the process");
        // SIGKILL = 9
        assert!(matches!(result, Err(RunnerError::NonZeroExit(137))));
    }

    #[test]
    fn test_wait_blocking_from_plain_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();

        let (spec, args) = sh("exit 7");
        let handle = ProcessHandle::new(spec, None).launch(&args).unwrap();
        assert!(matches!(
            handle.wait_blocking(),
            Err(RunnerError::NonZeroExit(7))
        ));
        // Already completed: must not hang.
        assert!(matches!(
            handle.wait_blocking(),
            Err(RunnerError::NonZeroExit(7))
        ));
    }
}
