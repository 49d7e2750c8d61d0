//! Bounded FIFO channel shared by many producers and many consumers.

use super::error::QueueError;
use super::types::{Channel, ChannelStatus};

use tokio::sync::{Mutex, mpsc};

/// A multi-producer, multi-consumer bounded FIFO.
///
/// `push` waits while the channel holds `capacity` items; `pop` waits while it is empty.
/// Consumers queue up on the receiver lock, so concurrent `pop`s are served in turn.
pub struct BoundedChannel<T> {
    name: Channel,
    sender: mpsc::Sender<T>,
    receiver: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
}

impl<T> BoundedChannel<T> {
    /// Creates a channel holding at most `capacity` items (at least one).
    pub fn new(name: Channel, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            name,
            sender,
            receiver: Mutex::new(receiver),
            capacity,
        }
    }

    /// Appends an item, waiting for free space.
    pub async fn push(&self, item: T) -> Result<(), QueueError> {
        self.sender
            .send(item)
            .await
            .map_err(|_| QueueError::Closed(self.name))
    }

    /// Removes the oldest item, waiting until one is available.
    ///
    /// Returns `None` once the channel has been closed and drained.
    pub async fn pop(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            len: self.len(),
            capacity: self.capacity,
        }
    }
}
