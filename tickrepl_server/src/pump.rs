// The host-side half of the bridge: one `tick()` per scheduler callback.
//
// Each tick first forwards sessions retired by connection threads to the
// evaluator, then drains the whole work queue and answers every item in
// arrival order, synchronously, on the host thread. Nothing here blocks on
// the network: replies go into per-request channels and the connection
// threads do the socket writes.
//
// A tick that is skipped or late loses nothing; work simply waits in the
// queue. A panicking evaluator is contained to the item that triggered it,
// and a failure anywhere else in the tick is logged (`nrepl-work-fn-error`)
// without unregistering the callback.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tickrepl_protocol::status;
use tracing::{debug, error, trace};

use crate::evaluator::Evaluator;
use crate::queue::{WorkItem, WorkQueue};
use crate::scheduler::{PeriodicTask, TickControl};
use crate::session::{SessionRegistry, dispatch};

/// Counters shared between a pump and its `Server` (both host-thread only).
#[derive(Debug, Default)]
pub struct PumpStats {
    processed: Cell<u64>,
    abandoned: Cell<u64>,
    ticks: Cell<u64>,
}

impl PumpStats {
    /// Work items answered.
    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    /// Work items dropped because their connection went away first.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.get()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    fn bump(counter: &Cell<u64>) {
        counter.set(counter.get() + 1);
    }
}

pub struct TickPump {
    queue: Arc<WorkQueue>,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    evaluator: Box<dyn Evaluator>,
    interval: Duration,
    stats: Rc<PumpStats>,
}

impl TickPump {
    pub fn new(
        queue: Arc<WorkQueue>,
        registry: Arc<SessionRegistry>,
        running: Arc<AtomicBool>,
        evaluator: Box<dyn Evaluator>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            running,
            evaluator,
            interval,
            stats: Rc::new(PumpStats::default()),
        }
    }

    pub fn stats(&self) -> Rc<PumpStats> {
        self.stats.clone()
    }

    /// Drain and answer everything queued. Returns how many items were
    /// answered.
    pub fn pump_once(&mut self) -> usize {
        for retired in self.registry.take_retired() {
            self.evaluator.close_session(&retired);
        }
        let items = self.queue.drain_all();
        if !items.is_empty() {
            trace!(count = items.len(), "draining nREPL work queue");
        }
        let mut answered = 0;
        for item in items {
            if self.process(item) {
                answered += 1;
            }
        }
        answered
    }

    fn process(&mut self, item: WorkItem) -> bool {
        if item.sink.is_abandoned() {
            PumpStats::bump(&self.stats.abandoned);
            debug!(
                session = %item.session,
                op = item.request.op().unwrap_or("<none>"),
                "dropping work item from a closed connection"
            );
            return false;
        }

        self.registry.note_op(&item.session, item.request.id());
        let mut done_sent = false;
        let outcome = {
            let mut emit = |frame: tickrepl_protocol::Response| {
                done_sent |= frame.is_done();
                if let Err(e) = item.sink.send(frame) {
                    debug!(session = %item.session, error = %e, "reply not delivered");
                }
            };
            let evaluator = &mut *self.evaluator;
            let registry = &*self.registry;
            panic::catch_unwind(AssertUnwindSafe(|| {
                dispatch(registry, evaluator, item.session, &item.request, &mut emit);
            }))
        };

        if let Err(payload) = outcome {
            let reason = panic_message(payload.as_ref());
            error!(session = %item.session, %reason, "evaluator panicked");
            if !done_sent {
                let frame = item
                    .reply()
                    .with("err", format!("evaluator panicked: {reason}\n"))
                    .with("ex", "Panic")
                    .with_status(&[status::EVAL_ERROR, status::DONE]);
                let _ = item.sink.send(frame);
            }
        }
        let _ = item.sink.finish();
        PumpStats::bump(&self.stats.processed);
        true
    }
}

impl PeriodicTask for TickPump {
    fn tick(&mut self) -> TickControl {
        if !self.running.load(Ordering::SeqCst) {
            return TickControl::Stop;
        }
        PumpStats::bump(&self.stats.ticks);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.pump_once())) {
            error!(reason = %panic_message(payload.as_ref()), "nrepl-work-fn-error");
        }
        TickControl::Continue(self.interval)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
