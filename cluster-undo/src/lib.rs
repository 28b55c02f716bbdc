//! The undo tracker (spec §4.9), grounded directly on
//! `modules/adminapi/common/undo.{h,cc}`'s `Undo_tracker`: a LIFO list of
//! compensating actions, one per forward effect a command applies past its
//! "commit point" (spec §4.3: "data flow per command ... on any exception
//! past the commit point of GR membership or async-channel change, the undo
//! tracker runs in reverse order").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cluster_errors::ClusterResult;
use cluster_instance::Instance;
use cluster_metadata::SqlUndoList;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A shared handle to the connected instance a `Sql_undo_list`-backed unit
/// should replay its inverse statements against, typically the current
/// Metadata primary (spec §4.9's "designated instance provider").
pub type SharedInstance = Arc<Mutex<Instance>>;

/// Returned by `add`/`add_back`; lets the caller cancel a unit that turned
/// out not to be needed (e.g. the forward effect committed successfully and
/// a later step superseded it), mirroring `Undo_tracker::Undo_entry::cancel`.
#[derive(Debug, Clone)]
pub struct UndoHandle {
    cancelled: Arc<AtomicBool>,
}

impl UndoHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

enum UndoAction {
    Callable(Option<Box<dyn FnOnce() -> ClusterResult<()> + Send>>),
    Sql { undo: SqlUndoList, instance: SharedInstance },
}

struct UndoEntry {
    note: String,
    cancelled: Arc<AtomicBool>,
    action: UndoAction,
}

impl UndoEntry {
    /// Runs the unit unless it was cancelled, returning whether it actually
    /// ran. Mirrors `Undo_entry::call`'s one-shot semantics: a second call
    /// is always a no-op.
    async fn call(&mut self) -> ClusterResult<bool> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        match &mut self.action {
            UndoAction::Callable(f) => match f.take() {
                Some(f) => {
                    f()?;
                    Ok(true)
                }
                None => Ok(false),
            },
            UndoAction::Sql { undo, instance } => {
                let mut guard = instance.lock().await;
                undo.execute(&mut *guard).await?;
                Ok(true)
            }
        }
    }
}

/// Accumulates compensating actions during a command and replays them in
/// reverse-of-registration order if the command fails past its commit
/// point. `add` pushes to the front (undone first, i.e. newest-effect-first)
/// and `add_back` pushes to the back, for the rare step that must be undone
/// only after everything registered later has already been reverted (spec
/// §4.9).
#[derive(Default)]
pub struct UndoTracker {
    entries: VecDeque<UndoEntry>,
}

impl UndoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a plain compensating closure, undone before anything
    /// already registered (LIFO).
    pub fn add(&mut self, note: impl Into<String>, f: impl FnOnce() -> ClusterResult<()> + Send + 'static) -> UndoHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push_front(UndoEntry {
            note: note.into(),
            cancelled: cancelled.clone(),
            action: UndoAction::Callable(Some(Box::new(f))),
        });
        UndoHandle { cancelled }
    }

    /// Registers a plain compensating closure, undone after everything
    /// already registered.
    pub fn add_back(&mut self, note: impl Into<String>, f: impl FnOnce() -> ClusterResult<()> + Send + 'static) -> UndoHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push_back(UndoEntry {
            note: note.into(),
            cancelled: cancelled.clone(),
            action: UndoAction::Callable(Some(Box::new(f))),
        });
        UndoHandle { cancelled }
    }

    /// Registers a `Sql_undo_list`-backed unit (a Metadata write's inverse
    /// statements), undone before anything already registered.
    pub fn add_sql(&mut self, note: impl Into<String>, undo: SqlUndoList, instance: SharedInstance) -> UndoHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push_front(UndoEntry {
            note: note.into(),
            cancelled: cancelled.clone(),
            action: UndoAction::Sql { undo, instance },
        });
        UndoHandle { cancelled }
    }

    /// Registers a `Sql_undo_list`-backed unit, undone after everything
    /// already registered.
    pub fn add_sql_back(&mut self, note: impl Into<String>, undo: SqlUndoList, instance: SharedInstance) -> UndoHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.push_back(UndoEntry {
            note: note.into(),
            cancelled: cancelled.clone(),
            action: UndoAction::Sql { undo, instance },
        });
        UndoHandle { cancelled }
    }

    /// Runs every registered unit front-to-back, logging and continuing
    /// past individual failures so one broken revert step doesn't strand
    /// the rest (spec §4.9: "per-unit failure logging/continuation").
    pub async fn execute(&mut self) {
        for mut entry in self.entries.drain(..) {
            if !entry.note.is_empty() {
                info!(note = %entry.note, "revert");
            }
            match entry.call().await {
                Ok(true) => {}
                Ok(false) => info!(note = %entry.note, "revert skipped (cancelled)"),
                Err(error) => warn!(note = %entry.note, %error, "revert step failed, continuing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[tokio::test]
    async fn units_execute_newest_first() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut tracker = UndoTracker::new();

        let o1 = order.clone();
        tracker.add("first registered", move || {
            o1.lock().unwrap().push(1);
            Ok(())
        });

        let o2 = order.clone();
        tracker.add("second registered", move || {
            o2.lock().unwrap().push(2);
            Ok(())
        });

        tracker.execute().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn add_back_runs_after_front_entries() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut tracker = UndoTracker::new();

        let o1 = order.clone();
        tracker.add("front", move || {
            o1.lock().unwrap().push("front");
            Ok(())
        });

        let o2 = order.clone();
        tracker.add_back("back", move || {
            o2.lock().unwrap().push("back");
            Ok(())
        });

        tracker.execute().await;
        assert_eq!(*order.lock().unwrap(), vec!["front", "back"]);
    }

    #[tokio::test]
    async fn cancelled_unit_does_not_run() {
        let ran = Arc::new(StdMutex::new(false));
        let mut tracker = UndoTracker::new();

        let flag = ran.clone();
        let handle = tracker.add("cancel me", move || {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        handle.cancel();

        tracker.execute().await;
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn a_failing_unit_does_not_stop_the_rest() {
        let ran = Arc::new(StdMutex::new(false));
        let mut tracker = UndoTracker::new();

        tracker.add("failing", || Err(cluster_errors::ClusterError::Cancelled));

        let flag = ran.clone();
        tracker.add("runs anyway", move || {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        tracker.execute().await;
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn executed_tracker_is_empty_afterward() {
        let mut tracker = UndoTracker::new();
        tracker.add("noop", || Ok(()));
        tracker.execute().await;
        assert!(tracker.is_empty());
    }
}
