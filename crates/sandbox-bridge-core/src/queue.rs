//! Pending-input queue between the transport and the runtime.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use tokio::sync::Notify;

/// FIFO buffer of messages awaiting delivery to the runtime.
///
/// Producers call [`push`](Self::push); the single consumer awaits
/// [`next_batch`](Self::next_batch), which wakes as soon as anything is
/// queued. Items come out in exactly the order they went in.
pub struct InputQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for InputQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InputQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append an item and wake the consumer.
    pub fn push(&self, item: T) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.notify.notify_one();
    }

    /// Put `items` back at the head of the queue, ahead of anything pushed
    /// since, keeping their relative order.
    pub fn push_front_all<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut queued = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        for item in items.into_iter().rev() {
            queued.push_front(item);
        }
        drop(queued);
        self.notify.notify_one();
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Wait until at least one item is queued, then take all of them.
    pub async fn next_batch(&self) -> Vec<T> {
        loop {
            let batch = self.drain();
            if !batch.is_empty() {
                return batch;
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // between drain() and here is not lost.
            self.notify.notified().await;
        }
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let queue = InputQueue::new();
        queue.push("m1");
        queue.push("m2");
        queue.push("m3");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec!["m1", "m2", "m3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_returned_items_go_ahead_of_newer_ones() {
        let queue = InputQueue::new();
        queue.push("m1");
        queue.push("m2");
        queue.push("m3");
        let mut taken = queue.drain().into_iter();
        let first = taken.next().unwrap();
        queue.push("m4");

        queue.push_front_all(std::iter::once(first).chain(taken));
        assert_eq!(queue.drain(), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn test_next_batch_pending_until_push() {
        let queue = InputQueue::new();
        let mut batch = tokio_test::task::spawn(queue.next_batch());
        tokio_test::assert_pending!(batch.poll());

        queue.push("m1");
        assert!(batch.is_woken());
        assert_eq!(tokio_test::assert_ready!(batch.poll()), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_next_batch_wakes_on_push() {
        let queue = Arc::new(InputQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_batch().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(1);

        let batch = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer woke")
            .unwrap();
        assert_eq!(batch, vec![1]);
    }

    #[tokio::test]
    async fn test_burst_is_delivered_in_submission_order() {
        let queue = Arc::new(InputQueue::new());
        for i in 0..100 {
            queue.push(i);
        }

        let mut received = Vec::new();
        while received.len() < 100 {
            received.extend(queue.next_batch().await);
        }
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
