//! Versioned snapshot surface between a sensor thread and its readers.
//!
//! Each publish boxes a whole snapshot and swaps the pointer in, so a reader
//! that sees version `v` sees every field written for `v`. Retired snapshots
//! are freed through the epoch collector once no pinned reader can still hold
//! them. Readers never block the writer; a slow reader simply misses
//! intermediate versions.

use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub iteration: u64,
    pub active: bool,
    pub mean: f64,
    pub std: f64,
    pub z: f64,
    pub last_accel: f64,
    pub last_state_time: f64,
    pub ank_ang: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Published {
    #[default]
    Empty,
    Snapshot(Snapshot),
}

impl Published {
    pub fn version(&self) -> u64 {
        match self {
            Published::Empty => 0,
            Published::Snapshot(s) => s.version,
        }
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        match self {
            Published::Empty => None,
            Published::Snapshot(s) => Some(*s),
        }
    }
}

/// Single-writer, many-reader cell. Only the owning sensor thread calls `publish`.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: Atomic<Snapshot>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` as the next version and return that version.
    pub fn publish(&self, mut snapshot: Snapshot) -> u64 {
        let guard = epoch::pin();
        let prev = self.current.load(Ordering::Acquire, &guard);
        // SAFETY: `prev` is protected by `guard` and is only freed through `retire`.
        snapshot.version = unsafe { prev.as_ref() }.map_or(0, |s| s.version) + 1;
        let version = snapshot.version;
        let old = self.current.swap(Owned::new(snapshot), Ordering::AcqRel, &guard);
        retire(old, &guard);
        version
    }

    pub fn latest(&self) -> Published {
        let guard = epoch::pin();
        let current = self.current.load(Ordering::Acquire, &guard);
        // SAFETY: pinned; the pointee outlives `guard`.
        match unsafe { current.as_ref() } {
            Some(s) => Published::Snapshot(*s),
            None => Published::Empty,
        }
    }

    /// Last published version; 0 before the first publish.
    pub fn version(&self) -> u64 {
        self.latest().version()
    }

    /// Back to `Empty` at trial start.
    pub fn clear(&self) {
        let guard = epoch::pin();
        let old = self.current.swap(Shared::null(), Ordering::AcqRel, &guard);
        retire(old, &guard);
    }
}

fn retire(old: Shared<'_, Snapshot>, guard: &Guard) {
    if !old.is_null() {
        // SAFETY: `old` was unlinked by the caller's swap; no new reader can reach it.
        unsafe { guard.defer_destroy(old) };
    }
}

impl Drop for SnapshotCell {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader still holds the cell.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.current.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}
