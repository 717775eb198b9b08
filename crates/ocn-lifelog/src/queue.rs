//! The bounded ingest queue (spec §4.5): a `VecDeque` guarded by a
//! mutex plus a `Notify`, rather than `tokio::sync::mpsc`, because
//! `drop_oldest` needs to reach into the middle of the channel and
//! mpsc only ever lets you push/pop at the ends under its own locking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ocn_domain::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::metrics::IngestMetrics;
use crate::pipeline::IngestOutcome;

#[derive(Debug, Clone)]
pub enum OverflowPolicy {
    Reject,
    Wait { timeout: Duration },
    DropOldest,
}

pub struct IngestJob {
    pub session_id: String,
    pub image_bytes: Vec<u8>,
    pub question: Option<String>,
    pub mime: String,
    pub metadata: serde_json::Value,
    pub ts_ms: i64,
    pub reply: oneshot::Sender<Result<IngestOutcome>>,
}

enum EnqueueStep {
    Done(Result<()>),
    WaitThenRetry,
}

pub struct IngestQueue {
    inner: Mutex<VecDeque<IngestJob>>,
    notify: Notify,
    max_size: usize,
    policy: OverflowPolicy,
    metrics: Arc<IngestMetrics>,
}

impl IngestQueue {
    pub fn new(max_size: usize, policy: OverflowPolicy, metrics: Arc<IngestMetrics>) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(VecDeque::new()), notify: Notify::new(), max_size, policy, metrics })
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().len()
    }

    // Split out of `enqueue` (and kept fully synchronous) so the
    // `parking_lot::MutexGuard` it takes never coexists in the same
    // stack frame as an `.await` point — parking_lot guards are `!Send`,
    // and the borrow checker otherwise treats the guard as potentially
    // live across the loop's `.await` even though it is always dropped
    // beforehand.
    fn try_enqueue_once(&self, job: &mut Option<IngestJob>) -> EnqueueStep {
        let mut queue = self.inner.lock();
        if queue.len() < self.max_size {
            let depth = queue.len() + 1;
            queue.push_back(job.take().unwrap());
            drop(queue);
            self.metrics.record_enqueued(depth);
            self.notify.notify_one();
            return EnqueueStep::Done(Ok(()));
        }

        match &self.policy {
            OverflowPolicy::Reject => {
                drop(queue);
                self.metrics.record_rejected();
                EnqueueStep::Done(Err(Error::QueueFull("lifelog ingest queue is full".into())))
            }
            OverflowPolicy::DropOldest => {
                if let Some(evicted) = queue.pop_front() {
                    let _ = evicted.reply.send(Err(Error::QueueDropped("evicted to make room for a newer frame".into())));
                    self.metrics.record_dropped();
                }
                let depth = queue.len() + 1;
                queue.push_back(job.take().unwrap());
                drop(queue);
                self.metrics.record_enqueued(depth);
                self.notify.notify_one();
                EnqueueStep::Done(Ok(()))
            }
            OverflowPolicy::Wait { .. } => {
                drop(queue);
                EnqueueStep::WaitThenRetry
            }
        }
    }

    pub async fn enqueue(&self, job: IngestJob) -> Result<()> {
        let deadline = match &self.policy {
            OverflowPolicy::Wait { timeout } => Some(Instant::now() + *timeout),
            _ => None,
        };
        let mut job = Some(job);
        loop {
            match self.try_enqueue_once(&mut job) {
                EnqueueStep::Done(result) => return result,
                EnqueueStep::WaitThenRetry => {
                    let deadline = deadline.expect("wait policy always sets a deadline");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.metrics.record_rejected();
                        return Err(Error::QueueFull("lifelog ingest queue stayed full past enqueue_timeout_ms".into()));
                    }
                    let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
                }
            }
        }
    }

    pub async fn dequeue(self: &Arc<Self>) -> IngestJob {
        loop {
            {
                let mut queue = self.inner.lock();
                if let Some(job) = queue.pop_front() {
                    drop(queue);
                    self.notify.notify_waiters();
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(session_id: &str) -> (IngestJob, oneshot::Receiver<Result<IngestOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (
            IngestJob {
                session_id: session_id.into(),
                image_bytes: vec![],
                question: None,
                mime: "image/png".into(),
                metadata: serde_json::Value::Null,
                ts_ms: 0,
                reply: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn reject_policy_fails_once_full() {
        let queue = IngestQueue::new(1, OverflowPolicy::Reject, Arc::new(IngestMetrics::new(1)));
        let (j1, _r1) = job("s1");
        let (j2, _r2) = job("s2");
        queue.enqueue(j1).await.unwrap();
        let err = queue.enqueue(j2).await.unwrap_err();
        assert_eq!(err.error_code(), "queue_full");
    }

    #[tokio::test]
    async fn drop_oldest_evicts_the_head_with_a_queue_dropped_reply() {
        let queue = IngestQueue::new(1, OverflowPolicy::DropOldest, Arc::new(IngestMetrics::new(1)));
        let (j1, r1) = job("s1");
        let (j2, _r2) = job("s2");
        queue.enqueue(j1).await.unwrap();
        queue.enqueue(j2).await.unwrap();
        let evicted = r1.await.unwrap().unwrap_err();
        assert_eq!(evicted.error_code(), "queue_dropped");
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn wait_policy_unblocks_once_a_slot_frees_up() {
        let queue = IngestQueue::new(1, OverflowPolicy::Wait { timeout: Duration::from_millis(500) }, Arc::new(IngestMetrics::new(1)));
        let (j1, _r1) = job("s1");
        queue.enqueue(j1).await.unwrap();

        let queue2 = queue.clone();
        let waiter = tokio::spawn(async move {
            let (j2, _r2) = job("s2");
            queue2.enqueue(j2).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = queue.dequeue().await;
        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_policy_degrades_to_reject_after_timeout() {
        let queue = IngestQueue::new(1, OverflowPolicy::Wait { timeout: Duration::from_millis(30) }, Arc::new(IngestMetrics::new(1)));
        let (j1, _r1) = job("s1");
        let (j2, _r2) = job("s2");
        queue.enqueue(j1).await.unwrap();
        let err = queue.enqueue(j2).await.unwrap_err();
        assert_eq!(err.error_code(), "queue_full");
    }
}
