// Hand-off between connection threads and the host tick.
//
// Connection threads are the producers: each decoded request becomes a
// `WorkItem` pushed onto the shared `WorkQueue`. The host tick is the single
// consumer: `drain_all` takes everything queued so far, in arrival order.
//
// Each `WorkItem` carries a `ResponseSink`, the sending half of a per-request
// channel back to the connection that produced it. The connection blocks on
// the matching `ReplyReceiver` until it sees `Reply::Finished`. A connection
// that notices its peer has gone calls `ReplyReceiver::abandon`, and the pump
// then drops the item instead of evaluating it.
//
// The queue lock is only ever held for a push or a swap; no I/O and no
// evaluation happens under it. Once closed (shutdown), pushes are refused and
// hand the item back so the connection can answer it directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tickrepl_protocol::{Request, Response, SessionId, status};

use crate::error::DeliveryError;

/// What a connection receives for one request.
#[derive(Debug)]
pub enum Reply {
    Frame(Response),
    /// No more frames for this request.
    Finished,
}

/// Sending half of a request's reply channel. Used on the host thread only.
#[derive(Debug)]
pub struct ResponseSink {
    tx: Sender<Reply>,
    abandoned: Arc<AtomicBool>,
}

/// Receiving half, held by the connection thread that made the request.
#[derive(Debug)]
pub struct ReplyReceiver {
    rx: Receiver<Reply>,
    abandoned: Arc<AtomicBool>,
}

pub fn reply_channel() -> (ResponseSink, ReplyReceiver) {
    let (tx, rx) = mpsc::channel();
    let abandoned = Arc::new(AtomicBool::new(false));
    (
        ResponseSink {
            tx,
            abandoned: abandoned.clone(),
        },
        ReplyReceiver { rx, abandoned },
    )
}

impl ResponseSink {
    pub fn send(&self, frame: Response) -> Result<(), DeliveryError> {
        if self.is_abandoned() {
            return Err(DeliveryError::Abandoned);
        }
        self.tx
            .send(Reply::Frame(frame))
            .map_err(|_| DeliveryError::Abandoned)
    }

    pub fn finish(self) -> Result<(), DeliveryError> {
        self.tx
            .send(Reply::Finished)
            .map_err(|_| DeliveryError::Abandoned)
    }

    /// The connection no longer wants these replies (or no longer exists).
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

impl ReplyReceiver {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Reply, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }
}

impl Drop for ReplyReceiver {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// One request waiting for the host tick.
#[derive(Debug)]
pub struct WorkItem {
    pub session: SessionId,
    pub request: Request,
    pub sink: ResponseSink,
}

impl WorkItem {
    /// Start a reply frame for this item (echoes `id`, names the session).
    pub fn reply(&self) -> Response {
        Response::reply_to(self.request.id(), Some(&self.session))
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding this lock can't leave the deque half-updated, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`. Hands it back if the queue has been closed.
    pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        Ok(())
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain_all(&self) -> Vec<WorkItem> {
        let items = std::mem::take(&mut self.lock().items);
        items.into()
    }

    /// Close the queue and answer every queued item with a shutdown error.
    /// Returns how many items were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let items = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.items)
        };
        let count = items.len();
        for item in items {
            let frame = item
                .reply()
                .with("err", reason)
                .with_status(&[status::ERROR, status::SERVER_SHUTDOWN, status::DONE]);
            // The connection may already be gone; nothing to do about that.
            let _ = item.sink.send(frame);
            let _ = item.sink.finish();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tickrepl_protocol::Value;

    use super::*;

    fn item(producer: i64, seq: i64) -> (WorkItem, ReplyReceiver) {
        let (sink, rx) = reply_channel();
        let request = Request::new("eval")
            .with_id(Value::Int(producer * 1_000 + seq))
            .with("producer", producer)
            .with("seq", seq);
        (
            WorkItem {
                session: SessionId::new(),
                request,
                sink,
            },
            rx,
        )
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let queue = WorkQueue::new();
        assert!(queue.drain_all().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: i64 = 8;
        const PER_PRODUCER: i64 = 250;

        let queue = Arc::new(WorkQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut receivers = Vec::new();
                    for seq in 0..PER_PRODUCER {
                        let (item, rx) = item(p, seq);
                        queue.push(item).unwrap();
                        receivers.push(rx);
                    }
                    receivers
                })
            })
            .collect();
        let _receivers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let drained = queue.drain_all();
        assert_eq!(drained.len(), (PRODUCERS * PER_PRODUCER) as usize);
        assert!(queue.is_empty());

        let mut last_seen = vec![-1; PRODUCERS as usize];
        for item in &drained {
            let producer = item.request.get("producer").and_then(Value::as_int).unwrap();
            let seq = item.request.get("seq").and_then(Value::as_int).unwrap();
            let last = &mut last_seen[producer as usize];
            assert_eq!(seq, *last + 1, "producer {producer} out of order");
            *last = seq;
        }
    }

    #[test]
    fn drain_preserves_global_push_order() {
        let queue = WorkQueue::new();
        let mut receivers = Vec::new();
        for seq in 0..5 {
            let (item, rx) = item(0, seq);
            queue.push(item).unwrap();
            receivers.push(rx);
        }
        let seqs: Vec<_> = queue
            .drain_all()
            .iter()
            .map(|i| i.request.get("seq").and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_all_answers_and_closes() {
        let queue = WorkQueue::new();
        let (queued, rx) = item(1, 1);
        queue.push(queued).unwrap();

        assert_eq!(queue.cancel_all("server shutting down"), 1);
        assert!(queue.is_closed());
        assert!(queue.is_empty());

        let Ok(Reply::Frame(frame)) = rx.recv_timeout(Duration::from_secs(1)) else {
            panic!("expected a shutdown frame");
        };
        assert_eq!(frame.get_str("err"), Some("server shutting down"));
        assert!(frame.has_status(status::SERVER_SHUTDOWN));
        assert!(frame.is_done());
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)),
            Ok(Reply::Finished)
        ));

        let (late, _rx) = item(1, 2);
        assert!(queue.push(late).is_err());
    }

    #[test]
    fn abandoned_sink_refuses_frames() {
        let (sink, rx) = reply_channel();
        rx.abandon();
        assert!(sink.is_abandoned());
        assert_eq!(
            sink.send(Response::default()),
            Err(DeliveryError::Abandoned)
        );
    }

    #[test]
    fn dropped_receiver_counts_as_abandoned() {
        let (sink, rx) = reply_channel();
        drop(rx);
        assert!(sink.is_abandoned());
        assert_eq!(sink.finish(), Err(DeliveryError::Abandoned));
    }
}
