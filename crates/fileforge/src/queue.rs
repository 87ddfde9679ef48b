//! FIFO job-id handoff between the submission side and the worker loop.
//!
//! The trait is the seam: the in-process implementation below is backed by a
//! crossbeam channel, whose `try_recv` is the atomic pop that guarantees
//! at-most-one delivery per enqueued id across competing consumers. A
//! Redis-style backend would implement the same two operations.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::error::QueueError;

pub trait JobQueue: Send + Sync {
    /// Pushes a job id onto the back of the queue.
    fn enqueue(&self, job_id: &str) -> Result<(), QueueError>;

    /// Pops the oldest job id, or `None` when the queue is empty. A returned
    /// id is considered consumed immediately; there is no acknowledgment.
    fn dequeue(&self) -> Result<Option<String>, QueueError>;
}

/// In-process FIFO queue. Cloning yields another handle onto the same queue;
/// all clones compete for the same ids.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl ChannelQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for ChannelQueue {
    fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        self.sender
            .send(job_id.to_string())
            .map_err(|_| QueueError::Closed)
    }

    fn dequeue(&self) -> Result<Option<String>, QueueError> {
        match self.receiver.try_recv() {
            Ok(id) => Ok(Some(id)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }
}
