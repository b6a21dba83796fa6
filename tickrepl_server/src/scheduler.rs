// Host scheduler contract and an in-process cooperative implementation.
//
// The host owns a single-threaded, timer-driven loop. The server never calls
// into the host from another thread; it only registers a periodic task that
// the host runs on its own thread. `HostScheduler` is that seam, so an
// embedding application can plug its own timer system in (a game engine's
// frame callback, a GUI's idle timer, ...).
//
// `CooperativeScheduler` is the implementation the `tickrepl` binary and the
// tests use: the host loop calls `run_due(now)` and sleeps until
// `next_deadline()`. Tasks run in registration order. A task is taken out of
// the scheduler while it runs, so a task may itself register or unregister
// timers without re-borrowing.
//
// Tasks are not `Send`: the evaluator lives inside the task and is only ever
// touched on the host thread.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// What a periodic task wants after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickControl {
    /// Run again after this long.
    Continue(Duration),
    /// Unregister.
    Stop,
}

pub trait PeriodicTask {
    fn tick(&mut self) -> TickControl;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

pub trait HostScheduler {
    /// Run `task` every `interval` (first run one interval from now).
    fn register_periodic(&self, task: Box<dyn PeriodicTask>, interval: Duration) -> TimerHandle;

    /// Stop and drop a task. Returns false if the handle is unknown (already
    /// unregistered, or the task returned `Stop`).
    fn unregister(&self, handle: TimerHandle) -> bool;
}

struct Entry {
    handle: TimerHandle,
    due: Instant,
    task: Box<dyn PeriodicTask>,
}

#[derive(Default)]
pub struct CooperativeScheduler {
    entries: RefCell<Vec<Entry>>,
    next_id: Cell<u64>,
    /// Handles whose task is currently executing (taken out of `entries`).
    running: RefCell<HashSet<TimerHandle>>,
    /// Handles unregistered while their task was executing.
    cancelled: RefCell<HashSet<TimerHandle>>,
}

impl CooperativeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every task whose deadline is at or before `now`. Returns how many
    /// ran.
    pub fn run_due(&self, now: Instant) -> usize {
        self.run_matching(now, |entry| entry.due <= now)
    }

    /// Run every registered task once, regardless of deadlines.
    pub fn run_all(&self) -> usize {
        self.run_matching(Instant::now(), |_| true)
    }

    /// Earliest deadline among registered tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.borrow().iter().map(|e| e.due).min()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len() + self.running.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run_matching(&self, now: Instant, pick: impl Fn(&Entry) -> bool) -> usize {
        let due: Vec<Entry> = {
            let mut entries = self.entries.borrow_mut();
            let (due, waiting): (Vec<Entry>, Vec<Entry>) =
                std::mem::take(&mut *entries).into_iter().partition(&pick);
            *entries = waiting;
            due
        };
        let ran = due.len();
        for mut entry in due {
            self.running.borrow_mut().insert(entry.handle);
            let control = entry.task.tick();
            self.running.borrow_mut().remove(&entry.handle);
            if self.cancelled.borrow_mut().remove(&entry.handle) {
                continue;
            }
            if let TickControl::Continue(interval) = control {
                entry.due = now + interval;
                self.insert(entry);
            }
        }
        ran
    }

    fn insert(&self, entry: Entry) {
        let mut entries = self.entries.borrow_mut();
        let at = entries.partition_point(|e| e.handle < entry.handle);
        entries.insert(at, entry);
    }
}

impl HostScheduler for CooperativeScheduler {
    fn register_periodic(&self, task: Box<dyn PeriodicTask>, interval: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_id.get());
        self.next_id.set(handle.0 + 1);
        self.insert(Entry {
            handle,
            due: Instant::now() + interval,
            task,
        });
        handle
    }

    fn unregister(&self, handle: TimerHandle) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter()
                .position(|e| e.handle == handle)
                .map(|at| entries.remove(at))
        };
        if removed.is_some() {
            // Dropped outside the borrow: a task's Drop may touch the scheduler.
            drop(removed);
            return true;
        }
        if self.running.borrow().contains(&handle) {
            return self.cancelled.borrow_mut().insert(handle);
        }
        false
    }
}
