use crate::error::PoolError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of work accepted by the pool.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

struct Inner {
    state: PoolState,
    sender: Option<mpsc::Sender<TaskFuture>>,
    receiver: Option<mpsc::Receiver<TaskFuture>>,
}

/// Fixed number of workers draining a bounded FIFO queue.
///
/// `submit` never blocks: a full queue is reported as [`PoolError::QueueFull`].
/// Each task runs in its own supervised tokio task, so a panic or error is logged
/// and never takes down the worker that picked it up.
pub struct TaskPool {
    worker_count: usize,
    queue_capacity: usize,
    inner: Mutex<Inner>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Self {
            worker_count,
            queue_capacity,
            inner: Mutex::new(Inner {
                state: PoolState::Created,
                sender: Some(sender),
                receiver: Some(receiver),
            }),
            workers: AsyncMutex::new(Vec::new()),
        }
    }

    /// Creates the pool and spawns its workers. Must be called within a tokio runtime.
    pub fn start_new(worker_count: usize, queue_capacity: usize) -> Self {
        let pool = Self::new(worker_count, queue_capacity);
        // A freshly created pool is always startable.
        let _ = pool.start();
        pool
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn state(&self) -> PoolState {
        self.lock_inner().state
    }

    pub fn start(&self) -> Result<(), PoolError> {
        let mut inner = self.lock_inner();
        match inner.state {
            PoolState::Created => {}
            PoolState::Running => return Ok(()),
            PoolState::ShuttingDown | PoolState::Stopped => return Err(PoolError::Closed),
        }

        let receiver = inner.receiver.take().ok_or(PoolError::Closed)?;
        let mut workers = self.workers.try_lock().map_err(|_| PoolError::Closed)?;

        let queue = Arc::new(AsyncMutex::new(receiver));
        for worker_id in 0..self.worker_count {
            let queue = Arc::clone(&queue);
            workers.push(tokio::spawn(worker_loop(worker_id, queue)));
        }
        inner.state = PoolState::Running;

        info!(
            worker_count = self.worker_count,
            queue_capacity = self.queue_capacity,
            "Task pool started"
        );
        Ok(())
    }

    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let inner = self.lock_inner();
        match inner.state {
            PoolState::Running => {}
            PoolState::Created => return Err(PoolError::NotRunning),
            PoolState::ShuttingDown | PoolState::Stopped => return Err(PoolError::Closed),
        }

        let sender = inner.sender.as_ref().ok_or(PoolError::Closed)?;
        sender.try_send(Box::pin(task)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })
    }

    /// Stops accepting work, then waits until every queued and in-flight task has run.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.lock_inner();
            if inner.state == PoolState::Running || inner.state == PoolState::Created {
                inner.state = PoolState::ShuttingDown;
            }
            // Workers exit once the queue is drained and the last sender is gone.
            inner.sender = None;
            inner.receiver = None;
        }

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker terminated abnormally");
            }
        }

        let mut inner = self.lock_inner();
        if inner.state != PoolState::Stopped {
            inner.state = PoolState::Stopped;
            info!("Task pool shutdown completed");
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<AsyncMutex<mpsc::Receiver<TaskFuture>>>) {
    debug!(worker_id, "Worker started");
    loop {
        let task = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };
        match task {
            Some(task) => execute_task(worker_id, task).await,
            None => break,
        }
    }
    debug!(worker_id, "Worker exited");
}

async fn execute_task(worker_id: usize, task: TaskFuture) {
    let started = Instant::now();
    match tokio::spawn(task).await {
        Ok(Ok(())) => {
            debug!(
                worker_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Worker task execution succeeded"
            );
        }
        Ok(Err(err)) => {
            warn!(
                worker_id,
                error = %err,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Worker task execution failed"
            );
        }
        Err(err) if err.is_panic() => {
            error!(
                worker_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Worker task panicked"
            );
        }
        Err(err) => {
            warn!(worker_id, error = %err, "Worker task was cancelled");
        }
    }
}
