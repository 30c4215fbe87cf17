use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::tensor::{Shape, Tensor, TensorView, TensorViewMut};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO queue blocking on emptiness, safe for one writer and one reader.
///
/// `close()` wakes every parked waiter; after close the queue drains its
/// remaining items and then yields `None`. Closing is how the scheduler
/// unparks workers at shutdown.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Push an item and wake one waiter. Pushing onto a closed queue drops
    /// the item.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.items.push_back(item);
        drop(state);
        self.cond.notify_one();
    }

    /// Put an item back at the front of the queue, undoing a pop. FIFO
    /// order is preserved for every item behind it.
    pub fn push_front(&self, item: T) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state.items.push_front(item);
        drop(state);
        self.cond.notify_one();
    }

    /// Pop the front item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Block until an item is available or the queue is closed and drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the queue and wake all waiters.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One directed edge of the graph: a tensor-recycling ring between exactly
/// one producer and one consumer.
///
/// `full` carries filled tensors from producer to consumer; `free` returns
/// consumed tensors back to the producer. For a pair of capacity *k* the sum
/// of tensors in `full`, in `free` and currently borrowed is always *k* —
/// the `free` return path is what gives a fast producer backpressure.
pub struct BlockingQueuePair {
    front_name: String,
    rear_name: String,
    capacity: usize,
    full: BlockingQueue<Tensor>,
    free: BlockingQueue<Tensor>,
}

impl BlockingQueuePair {
    /// Allocate a pair for the edge `front -> rear` and pre-populate `free`
    /// with `capacity` tensors of the edge's shape contract.
    pub fn new(front_name: &str, rear_name: &str, shape: &Shape, capacity: usize) -> Result<Self> {
        let pair = Self {
            front_name: front_name.to_string(),
            rear_name: rear_name.to_string(),
            capacity,
            full: BlockingQueue::new(),
            free: BlockingQueue::new(),
        };
        for _ in 0..capacity {
            pair.free.push(Tensor::new(shape)?);
        }
        Ok(pair)
    }

    /// Producer node name.
    pub fn front_name(&self) -> &str {
        &self.front_name
    }

    /// Consumer node name.
    pub fn rear_name(&self) -> &str {
        &self.rear_name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `src` into a recycled tensor and publish it.
    ///
    /// Blocks until the consumer has returned a free tensor. Used by the
    /// external feeder and by composite-node adapters.
    pub fn enqueue(&self, src: &TensorView<'_>) -> Result<()> {
        let mut tensor = self.free.wait_and_pop().ok_or(Error::Stopped)?;
        if let Err(e) = tensor.copy_from(src) {
            self.free.push(tensor);
            return Err(e);
        }
        self.full.push(tensor);
        Ok(())
    }

    /// Block for a published tensor, copy it into `dst` and recycle it.
    ///
    /// A failed copy leaves the undelivered tensor at the head of `full`;
    /// only a delivered tensor is recycled.
    pub fn dequeue(&self, dst: &mut TensorViewMut<'_>) -> Result<()> {
        let tensor = self.full.wait_and_pop().ok_or(Error::Stopped)?;
        match tensor.copy_to(dst) {
            Ok(()) => {
                self.free.push(tensor);
                Ok(())
            }
            Err(e) => {
                self.full.push_front(tensor);
                Err(e)
            }
        }
    }

    /// Take a published tensor off the edge without copying.
    pub fn borrow_full(&self) -> Option<Tensor> {
        self.full.wait_and_pop()
    }

    /// Publish a filled tensor onto the edge.
    pub fn return_full(&self, tensor: Tensor) {
        self.full.push(tensor);
    }

    /// Take a recycled tensor for writing without copying.
    pub fn borrow_free(&self) -> Option<Tensor> {
        self.free.wait_and_pop()
    }

    /// Hand a consumed tensor back to the producer side.
    pub fn return_free(&self, tensor: Tensor) {
        self.free.push(tensor);
    }

    pub fn has_full(&self) -> bool {
        !self.full.is_empty()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn full_len(&self) -> usize {
        self.full.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Close both queues, waking every parked producer and consumer.
    pub fn close(&self) {
        self.full.close();
        self.free.close();
    }
}

impl std::fmt::Debug for BlockingQueuePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueuePair")
            .field("front_name", &self.front_name)
            .field("rear_name", &self.rear_name)
            .field("capacity", &self.capacity)
            .field("full_len", &self.full_len())
            .field("free_len", &self.free_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.wait_and_pop(), Some(1));
        assert_eq!(queue.wait_and_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn close_drains_then_yields_none() {
        let queue = BlockingQueue::new();
        queue.push(7);
        queue.close();
        assert_eq!(queue.wait_and_pop(), Some(7));
        assert_eq!(queue.wait_and_pop(), None);
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let queue: Arc<BlockingQueue<i32>> = Arc::new(BlockingQueue::new());
        let reader = {
            let queue = queue.clone();
            thread::spawn(move || queue.wait_and_pop())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        queue.close();
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn pair_prepopulates_free() {
        let pair = BlockingQueuePair::new("a", "b", &vec![4], 2).unwrap();
        assert_eq!(pair.free_len(), 2);
        assert_eq!(pair.full_len(), 0);
        assert_eq!(pair.capacity(), 2);
    }

    #[test]
    fn pair_recycles_tensors() {
        let pair = BlockingQueuePair::new("a", "b", &vec![4], 2).unwrap();
        let src = Tensor::from_f32(&[4], &[1.0, 2.0, 3.0, 4.0]).unwrap();

        pair.enqueue(&src.view()).unwrap();
        assert_eq!(pair.full_len(), 1);
        assert_eq!(pair.free_len(), 1);

        let mut out = Tensor::new(&[4]).unwrap();
        pair.dequeue(&mut out.view_mut()).unwrap();
        assert_eq!(out.view().as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pair.full_len(), 0);
        assert_eq!(pair.free_len(), 2);
    }

    #[test]
    fn pair_occupancy_never_exceeds_capacity() {
        let pair = Arc::new(BlockingQueuePair::new("a", "b", &vec![1], 2).unwrap());
        let items = 100usize;

        let producer = {
            let pair = pair.clone();
            thread::spawn(move || {
                for i in 0..items {
                    let t = Tensor::from_f32(&[1], &[i as f32]).unwrap();
                    pair.enqueue(&t.view()).unwrap();
                }
            })
        };

        let consumer = {
            let pair = pair.clone();
            thread::spawn(move || {
                let mut seen = Vec::with_capacity(items);
                let mut out = Tensor::new(&[1]).unwrap();
                for _ in 0..items {
                    assert!(pair.full_len() <= pair.capacity());
                    pair.dequeue(&mut out.view_mut()).unwrap();
                    seen.push(out.view().as_f32().unwrap()[0]);
                }
                seen
            })
        };

        producer.join().unwrap();
        let seen = consumer.join().unwrap();
        let expected: Vec<f32> = (0..items).map(|i| i as f32).collect();
        assert_eq!(seen, expected);
        assert_eq!(pair.full_len() + pair.free_len(), pair.capacity());
    }

    #[test]
    fn enqueue_bad_shape_keeps_pool_balanced() {
        let pair = BlockingQueuePair::new("a", "b", &vec![4], 2).unwrap();
        let bad = Tensor::new(&[2]).unwrap();
        let err = pair.enqueue(&bad.view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(pair.free_len(), 2);
    }

    #[test]
    fn dequeue_bad_view_keeps_item_at_head() {
        let pair = BlockingQueuePair::new("a", "b", &vec![4], 2).unwrap();
        let first = Tensor::from_f32(&[4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let second = Tensor::from_f32(&[4], &[5.0, 6.0, 7.0, 8.0]).unwrap();
        pair.enqueue(&first.view()).unwrap();
        pair.enqueue(&second.view()).unwrap();

        let mut wrong = Tensor::new(&[2]).unwrap();
        let err = pair.dequeue(&mut wrong.view_mut()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(pair.full_len(), 2);

        // The undelivered item is still first in line.
        let mut out = Tensor::new(&[4]).unwrap();
        pair.dequeue(&mut out.view_mut()).unwrap();
        assert_eq!(out.view().as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        pair.dequeue(&mut out.view_mut()).unwrap();
        assert_eq!(out.view().as_f32().unwrap(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(pair.free_len(), 2);
    }
}
