//! Message transport abstraction (mechanics only).
//!
//! The bus moves messages between the controller and agents. It is a
//! **point-to-point** transport with named queues:
//!
//! - `send` delivers a message to exactly one consumer of the destination queue
//! - delivery is **at-least-once**: consumers must tolerate redelivery
//! - no ordering across queues; sends to one queue from one producer stay in order
//! - messages sent before anyone subscribes are kept until a consumer appears
//!
//! The bus is passed explicitly to dispatchers and the saga engine, so tests
//! can substitute the in-memory implementation.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::address::Address;

/// A consumer's handle on a queue.
///
/// Designed for single-threaded consumption; hand messages to other threads
/// yourself if needed.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        std::iter::from_fn(|| self.receiver.try_recv().ok()).collect()
    }
}

/// Transport-agnostic message bus.
///
/// `send` can fail (broker unavailable, lock poisoned). Callers that already
/// committed state surface the error; the saga engine keeps unsent actions in
/// the saga record and sends them again later.
pub trait MessageBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn send(&self, destination: &Address, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self, queue: &Address) -> Subscription<M>;
}

impl<M, B> MessageBus<M> for Arc<B>
where
    B: MessageBus<M> + ?Sized,
{
    type Error = B::Error;

    fn send(&self, destination: &Address, message: M) -> Result<(), Self::Error> {
        (**self).send(destination, message)
    }

    fn subscribe(&self, queue: &Address) -> Subscription<M> {
        (**self).subscribe(queue)
    }
}
