//! In-memory message bus for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::address::Address;
use crate::bus::{MessageBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Send failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Queue<M> {
    consumers: Vec<mpsc::Sender<M>>,
    next: usize,
    backlog: VecDeque<M>,
}

impl<M> Default for Queue<M> {
    fn default() -> Self {
        Self {
            consumers: Vec::new(),
            next: 0,
            backlog: VecDeque::new(),
        }
    }
}

impl<M> Queue<M> {
    /// Hand the message to one live consumer (round-robin), or keep it in the backlog.
    fn deliver(&mut self, mut message: M) {
        while !self.consumers.is_empty() {
            let idx = self.next % self.consumers.len();
            match self.consumers[idx].send(message) {
                Ok(()) => {
                    self.next = idx + 1;
                    return;
                }
                Err(mpsc::SendError(returned)) => {
                    // Consumer dropped its subscription.
                    self.consumers.remove(idx);
                    message = returned;
                }
            }
        }
        self.backlog.push_back(message);
    }
}

/// In-memory point-to-point bus.
///
/// - No IO / no async
/// - Competing consumers on one queue are served round-robin
/// - Messages sent to a queue without consumers wait in a backlog
#[derive(Debug)]
pub struct InMemoryMessageBus<M> {
    queues: Mutex<HashMap<Address, Queue<M>>>,
}

impl<M> InMemoryMessageBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting for a consumer on `queue`.
    pub fn backlog_len(&self, queue: &Address) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(queue).map_or(0, |q| q.backlog.len()))
            .unwrap_or(0)
    }
}

impl<M> Default for InMemoryMessageBus<M> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<M> MessageBus<M> for InMemoryMessageBus<M>
where
    M: Send + 'static,
{
    type Error = InMemoryBusError;

    fn send(&self, destination: &Address, message: M) -> Result<(), Self::Error> {
        let mut queues = self.queues.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        queues.entry(destination.clone()).or_default().deliver(message);
        Ok(())
    }

    fn subscribe(&self, queue: &Address) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut queues) = self.queues.lock() {
            let q = queues.entry(queue.clone()).or_default();
            while let Some(pending) = q.backlog.pop_front() {
                // The receiver is alive in this scope, so this cannot fail.
                let _ = tx.send(pending);
            }
            q.consumers.push(tx);
        }

        Subscription::new(rx)
    }
}
