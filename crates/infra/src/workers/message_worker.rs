use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use vmflow_messages::{Address, MessageBus, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Queue consumer loop.
///
/// - Subscribes to one queue of the bus
/// - Runs the handler for each message (handlers must tolerate redelivery)
/// - Handler errors are logged, never fatal
/// - Supports graceful shutdown
#[derive(Debug)]
pub struct MessageWorker;

impl MessageWorker {
    /// Spawn a worker thread consuming `queue`.
    ///
    /// The subscription is taken before the thread starts, so messages sent
    /// right after `spawn` returns are not missed.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        queue: &Address,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: MessageBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe(queue);
        let queue = queue.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(worker = name, %queue, "worker started");
                worker_loop(name, sub, shutdown_rx, &mut handler);
                debug!(worker = name, %queue, "worker stopped");
            })?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(50);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "message handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
