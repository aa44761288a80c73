//! Process status and the once-only termination signal.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Lifecycle of one [`ProcessHandle`](super::ProcessHandle).
///
/// Transitions only move forward: `Idle -> Running -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "lowercase")]
pub enum Status {
    /// Constructed, not yet launched.
    Idle,
    /// OS process started and streams attached.
    Running,
    /// Process exited and both output streams drained.
    Completed(i32),
}

impl Status {
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Completed(code) => Some(code),
            _ => None,
        }
    }

    /// Map a final status onto the wait contract: `Ok` for exit code 0,
    /// [`RunnerError::NonZeroExit`] otherwise.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed(0) => Ok(()),
            Self::Completed(code) => Err(RunnerError::NonZeroExit(code)),
            Self::Idle | Self::Running => Err(RunnerError::WatcherLost),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed(code) => write!(f, "completed ({code})"),
        }
    }
}

/// Callback fired once with the final status.
pub type TerminationCallback = Box<dyn FnOnce(Status) + Send + 'static>;

struct State {
    status: Status,
    pending: Vec<TerminationCallback>,
    abandoned: bool,
}

/// Status cell plus the callbacks waiting on it.
///
/// Status and the pending list share one lock, so a registration either
/// lands in the list before completion is published (and is drained by
/// [`Termination::complete`]) or observes the completed status and fires
/// right away. Callbacks always run with the lock released.
pub(crate) struct Termination {
    state: Mutex<State>,
}

impl Termination {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                status: Status::Idle,
                pending: Vec::new(),
                abandoned: false,
            }),
        }
    }

    // Every critical section is a plain assignment or a `take`, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> Status {
        self.lock().status
    }

    /// `Idle -> Running`. Any other starting state is left untouched.
    pub(crate) fn mark_running(&self) {
        let mut state = self.lock();
        if state.status == Status::Idle {
            state.status = Status::Running;
        }
    }

    pub(crate) fn subscribe(&self, callback: TerminationCallback) {
        let mut state = self.lock();
        if state.status.is_completed() {
            let status = state.status;
            drop(state);
            callback(status);
        } else if state.abandoned {
            drop(state);
            drop(callback);
        } else {
            state.pending.push(callback);
        }
    }

    /// Drop every pending callback without running it, and every callback
    /// registered afterwards.
    ///
    /// No-op once completed. Used when completion can no longer happen.
    pub(crate) fn abandon(&self) {
        let mut state = self.lock();
        if state.status.is_completed() {
            return;
        }
        state.abandoned = true;
        let pending = std::mem::take(&mut state.pending);
        drop(state);
        drop(pending);
    }

    /// Publish `Completed(code)` and fire every pending callback.
    ///
    /// Only the first call has any effect.
    pub(crate) fn complete(&self, code: i32) {
        let mut state = self.lock();
        if state.status.is_completed() {
            return;
        }
        state.status = Status::Completed(code);
        let status = state.status;
        let pending = std::mem::take(&mut state.pending);
        drop(state);

        debug!(exit_code = code, callbacks = pending.len(), "termination published");
        for callback in pending {
            callback(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<Status>>>) -> TerminationCallback {
        let counter = Arc::clone(counter);
        let seen = Arc::clone(seen);
        Box::new(move |status| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(status);
        })
    }

    #[test]
    fn test_status_transitions_forward_only() {
        let term = Termination::new();
        assert_eq!(term.status(), Status::Idle);
        term.mark_running();
        assert_eq!(term.status(), Status::Running);
        term.complete(3);
        assert_eq!(term.status(), Status::Completed(3));

        term.mark_running();
        term.complete(9);
        assert_eq!(term.status(), Status::Completed(3));
    }

    #[test]
    fn test_callbacks_fire_once_before_and_after_completion() {
        let term = Termination::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        term.mark_running();
        term.subscribe(counting(&counter, &seen));
        term.subscribe(counting(&counter, &seen));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        term.complete(0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // Late registration fires immediately with the stored status.
        term.subscribe(counting(&counter, &seen));
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        term.complete(1);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(seen.lock().unwrap().iter().all(|s| *s == Status::Completed(0)));
    }

    #[test]
    fn test_callback_may_reenter() {
        let term = Arc::new(Termination::new());
        let observed = Arc::new(Mutex::new(None));
        let (t, o) = (Arc::clone(&term), Arc::clone(&observed));
        term.subscribe(Box::new(move |_| {
            *o.lock().unwrap() = Some(t.status());
        }));
        term.complete(5);
        assert_eq!(*observed.lock().unwrap(), Some(Status::Completed(5)));
    }

    #[test]
    fn test_concurrent_subscribe_and_complete() {
        for _ in 0..50 {
            let term = Arc::new(Termination::new());
            let counter = Arc::new(AtomicUsize::new(0));
            let seen = Arc::new(Mutex::new(Vec::new()));
            term.mark_running();

            let threads: Vec<_> = (0..8)
                .map(|_| {
                    let term = Arc::clone(&term);
                    let cb = counting(&counter, &seen);
                    std::thread::spawn(move || term.subscribe(cb))
                })
                .collect();
            term.complete(2);
            for t in threads {
                t.join().unwrap();
            }

            assert_eq!(counter.load(Ordering::SeqCst), 8);
        }
    }

    #[test]
    fn test_abandon_drops_pending_without_firing() {
        let term = Termination::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std::sync::mpsc::channel::<Status>();

        term.subscribe(counting(&counter, &seen));
        term.subscribe(Box::new(move |s| {
            let _ = tx.send(s);
        }));
        term.abandon();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_subscribe_after_abandon_is_dropped() {
        let term = Termination::new();
        let (tx, rx) = std::sync::mpsc::channel::<Status>();

        term.abandon();
        term.subscribe(Box::new(move |s| {
            let _ = tx.send(s);
        }));

        assert!(rx.recv().is_err());
        assert_eq!(term.status(), Status::Idle);
    }

    #[test]
    fn test_into_result() {
        assert!(Status::Completed(0).into_result().is_ok());
        assert!(matches!(
            Status::Completed(7).into_result(),
            Err(RunnerError::NonZeroExit(7))
        ));
        assert!(matches!(
            Status::Running.into_result(),
            Err(RunnerError::WatcherLost)
        ));
    }

    #[test]
    fn test_status_serializes_with_code() {
        assert_eq!(
            serde_json::to_string(&Status::Completed(7)).unwrap(),
            r#"{"state":"completed","code":7}"#
        );
        assert_eq!(
            serde_json::to_string(&Status::Running).unwrap(),
            r#"{"state":"running"}"#
        );
    }
}
