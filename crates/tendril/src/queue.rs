//! FIFO task queue with a single worker, gated by pause/resume.
//!
//! Tasks pushed while paused are held and drained in arrival order once resumed.
//! Dropping the last handle aborts the worker; queued tasks are discarded.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

struct Inner<T> {
    tx: mpsc::UnboundedSender<T>,
    paused: watch::Sender<bool>,
    pending: Arc<AtomicUsize>,
    done: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Cloneable handle to a pausable queue.
pub struct PausableQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for PausableQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> PausableQueue<T> {
    /// Creates a running queue whose tasks are handled by `worker`, one at a time.
    /// Must be called within a tokio runtime.
    pub fn new<F, Fut>(worker: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (paused, paused_rx) = watch::channel(false);
        let pending = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());
        let worker = tokio::spawn(drain(
            rx,
            paused_rx,
            Arc::clone(&pending),
            Arc::clone(&done),
            worker,
        ));
        Self {
            inner: Arc::new(Inner {
                tx,
                paused,
                pending,
                done,
                worker,
            }),
        }
    }

    pub fn push(&self, task: T) {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(task).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Stops the worker before its next task. A task already running completes.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Tasks queued or in flight.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once no task is queued or in flight.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.done.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn drain<T, F, Fut>(
    mut rx: mpsc::UnboundedReceiver<T>,
    mut paused: watch::Receiver<bool>,
    pending: Arc<AtomicUsize>,
    done: Arc<Notify>,
    worker: F,
) where
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if paused.wait_for(|p| !*p).await.is_err() {
            return;
        }
        let Some(task) = rx.recv().await else {
            return;
        };
        // paused while waiting for the task
        if paused.wait_for(|p| !*p).await.is_err() {
            return;
        }
        worker(task).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        done.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording_queue() -> (PausableQueue<u64>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let queue = PausableQueue::new(move |n: u64| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(n);
            }
        });
        (queue, seen)
    }

    #[tokio::test]
    async fn drains_in_arrival_order() {
        let (queue, seen) = recording_queue();
        for n in [3, 1, 2] {
            queue.push(n);
        }
        queue.idle().await;
        assert_eq!(*seen.lock().unwrap(), vec![3, 1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn holds_tasks_while_paused() {
        let (queue, seen) = recording_queue();
        queue.pause();
        assert!(queue.is_paused());
        queue.push(10);
        queue.push(11);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 2);

        queue.resume();
        queue.idle().await;
        assert_eq!(*seen.lock().unwrap(), vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_handle_discards_queue() {
        let (queue, seen) = recording_queue();
        queue.pause();
        queue.push(1);
        let clone = queue.clone();
        drop(queue);
        clone.resume();
        clone.idle().await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        clone.pause();
        clone.push(2);
        drop(clone);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
