use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use thiserror::Error;

use crate::error::GsacResult;

/// Cooperative stop shared by every thread of a session.
#[derive(Clone, Debug, Default)]
pub struct QuitSignal(Arc<AtomicBool>);

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinFailure {
    #[error("worker '{0}' did not stop within the join timeout")]
    TimedOut(String),
    #[error("worker '{0}' panicked")]
    Panicked(String),
}

/// A named OS thread whose return value comes back over a channel, so the
/// join can give up after a deadline instead of hanging the supervisor.
pub struct Worker<T> {
    name: String,
    handle: JoinHandle<()>,
    result: Receiver<T>,
}

pub fn spawn_worker<T, F>(name: &str, f: F) -> GsacResult<Worker<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = channel::bounded(1);
    let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
        let _ = tx.send(f());
    })?;
    Ok(Worker {
        name: name.to_string(),
        handle,
        result: rx,
    })
}

impl<T> Worker<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the result. A timed-out thread is left detached.
    pub fn join_timeout(self, timeout: Duration) -> Result<T, JoinFailure> {
        match self.result.recv_timeout(timeout) {
            Ok(value) => {
                let _ = self.handle.join();
                Ok(value)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("{} still running after {:?}, detaching", self.name, timeout);
                Err(JoinFailure::TimedOut(self.name))
            }
            // sender dropped without a value: the closure unwound
            Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                Err(JoinFailure::Panicked(self.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_signal_is_shared() {
        let quit = QuitSignal::new();
        let other = quit.clone();
        assert!(!other.is_set());
        quit.set();
        assert!(other.is_set());
    }

    #[test]
    fn test_worker_returns_value() {
        let w = spawn_worker("adder", || 2 + 3).unwrap();
        assert_eq!(w.name(), "adder");
        assert_eq!(w.join_timeout(Duration::from_secs(1)), Ok(5));
    }

    #[test]
    fn test_worker_stops_on_quit() {
        let quit = QuitSignal::new();
        let q = quit.clone();
        let w = spawn_worker("looper", move || {
            let mut n = 0u64;
            while !q.is_set() {
                n += 1;
                thread::sleep(Duration::from_millis(1));
            }
            n
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        quit.set();
        assert!(w.join_timeout(Duration::from_millis(500)).unwrap() > 0);
    }

    #[test]
    fn test_join_times_out() {
        let quit = QuitSignal::new();
        let q = quit.clone();
        let w = spawn_worker("stuck", move || {
            while !q.is_set() {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        let err = w.join_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, JoinFailure::TimedOut("stuck".into()));
        quit.set();
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let w = spawn_worker("boom", || -> u32 { panic!("boom") }).unwrap();
        let err = w.join_timeout(Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, JoinFailure::Panicked("boom".into()));
    }
}
