use std::collections::VecDeque;
use std::future::Future;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("work queue is empty")]
    Empty,
}

/// FIFO of pending jobs shared by the workers of [`run_pool`].
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: VecDeque<T>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }
}

impl<T> From<Vec<T>> for WorkQueue<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            inner: items.into(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn enqueue(&mut self, item: T) {
        self.inner.push_back(item);
    }

    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        self.inner.pop_front().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Runs `job` over every item with at most `workers` jobs in flight.
///
/// Each worker takes the next item once its previous job finished and stops
/// when the queue is drained. Results are returned in completion order; a
/// failing job is just another result and never stops the other workers.
pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, workers: usize, job: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let worker_count = workers.max(1).min(items.len());
    let queue = Mutex::new(WorkQueue::from(items));
    let results = Mutex::new(Vec::new());
    let (queue, results, job) = (&queue, &results, &job);

    let workers = (0..worker_count).map(|_| async move {
        loop {
            let next = queue.lock().await.dequeue();
            let Ok(item) = next else {
                break;
            };
            let result = job(item).await;
            results.lock().await.push(result);
        }
    });
    join_all(workers).await;

    std::mem::take(&mut *results.lock().await)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = WorkQueue::default();
        queue.enqueue("A");
        queue.enqueue("B");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap(), "A");
        assert_eq!(queue.dequeue().unwrap(), "B");
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_on_empty_returns_error() {
        let mut queue: WorkQueue<u32> = WorkQueue::default();
        assert!(matches!(queue.dequeue(), Err(QueueError::Empty)));
    }

    #[tokio::test]
    async fn pool_runs_every_item_once() {
        let mut results = run_pool((0..10).collect(), 3, |n: u32| async move { n * 2 }).await;
        results.sort();
        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn pool_never_exceeds_worker_count() {
        let running = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let results = run_pool((0..9).collect::<Vec<u32>>(), 3, move |_| async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(results.len(), 9);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn pool_with_zero_workers_still_runs() {
        let results = run_pool(vec!["a", "b"], 0, |item| async move {
            if item == "a" { Err(item) } else { Ok(item) }
        })
        .await;
        assert_eq!(results, vec![Err("a"), Ok("b")]);
    }

    #[tokio::test]
    async fn empty_pool_returns_nothing() {
        let results: Vec<u32> = run_pool(Vec::new(), 3, |n: u32| async move { n }).await;
        assert!(results.is_empty());
    }
}
