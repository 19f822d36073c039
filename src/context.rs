//! Sequential execution context backed by one dedicated worker thread.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use std::time::Duration;

use fsm_runtime_core::{ExecutionError, ShutdownMode, panic_message};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Set of worker threads belonging to one factory.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<Mutex<HashSet<ThreadId>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the calling thread is a live worker of this registry.
    pub fn contains_current(&self) -> bool {
        self.workers.lock().contains(&thread::current().id())
    }

    /// Number of workers that have not terminated yet.
    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    fn insert(&self, worker: ThreadId) {
        self.workers.lock().insert(worker);
    }

    fn remove(&self, worker: ThreadId) {
        self.workers.lock().remove(&worker);
    }
}

/// State shared between the context handles and the worker thread.
struct Shared {
    name: String,
    pending: watch::Sender<usize>,
    terminated: watch::Sender<bool>,
    discard: AtomicBool,
    faults: AtomicUsize,
}

impl Shared {
    fn report_panic(&self, payload: &(dyn std::any::Any + Send)) {
        self.faults.fetch_add(1, Ordering::SeqCst);
        tracing::error!(
            context = %self.name,
            error = %panic_message(payload),
            "unit of work panicked"
        );
    }

    async fn drain(&self, mut queue: mpsc::UnboundedReceiver<QueuedWork>) {
        while let Some(work) = queue.recv().await {
            if self.discard.load(Ordering::SeqCst) {
                drop(work);
                continue;
            }
            work.run();
        }
    }
}

/// One queued unit of work. Dropping it, whether run or discarded, removes it
/// from the pending count.
struct QueuedWork {
    work: Option<Work>,
    shared: Arc<Shared>,
}

impl QueuedWork {
    fn new(work: Work, shared: Arc<Shared>) -> Self {
        shared.pending.send_modify(|pending| *pending += 1);
        Self {
            work: Some(work),
            shared,
        }
    }

    fn run(mut self) {
        if let Some(work) = self.work.take()
            && let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work))
        {
            self.shared.report_panic(payload.as_ref());
        }
    }
}

impl Drop for QueuedWork {
    fn drop(&mut self) {
        self.shared
            .pending
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

struct Inner {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedWork>>>,
    runtime: tokio::runtime::Handle,
    worker: ThreadId,
}

/// Single-worker sequential execution context for one state machine instance.
///
/// Units of work run one at a time, in submission order, on a dedicated named
/// thread. Handles are cheap to clone; the worker stops once the context is
/// released (or every handle is dropped) and the queue has drained.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl ExecutionContext {
    /// Spawns a new worker thread called `thread_name` and registers it with
    /// `registry` for as long as it runs.
    pub fn spawn(
        thread_name: impl Into<String>,
        registry: &WorkerRegistry,
    ) -> Result<Self, ExecutionError> {
        let name = thread_name.into();
        let spawn_error = |err: std::io::Error| ExecutionError::Spawn {
            context: name.clone(),
            reason: err.to_string(),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(spawn_error)?;
        let handle = runtime.handle().clone();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.clone(),
            pending: watch::Sender::new(0),
            terminated: watch::Sender::new(false),
            discard: AtomicBool::new(false),
            faults: AtomicUsize::new(0),
        });

        let worker_shared = shared.clone();
        let worker_registry = registry.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(worker_shared.drain(queue_rx));
                drop(runtime);
                worker_registry.remove(thread::current().id());
                worker_shared.terminated.send_replace(true);
                tracing::debug!(context = %worker_shared.name, "execution context terminated");
            })
            .map_err(spawn_error)?;

        let worker_id = worker.thread().id();
        registry.insert(worker_id);
        tracing::debug!(context = %name, "execution context started");

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                queue: Mutex::new(Some(queue_tx)),
                runtime: handle,
                worker: worker_id,
            }),
        })
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Returns `true` when called from this context's worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.worker
    }

    /// Returns `true` once the context stopped accepting work.
    pub fn is_released(&self) -> bool {
        self.inner.queue.lock().is_none()
    }

    /// Returns `true` once the worker thread has finished.
    pub fn is_terminated(&self) -> bool {
        *self.inner.shared.terminated.borrow()
    }

    /// Units of work queued or running.
    pub fn pending(&self) -> usize {
        *self.inner.shared.pending.borrow()
    }

    /// Number of units of work (including timeout actions) that panicked.
    pub fn fault_count(&self) -> usize {
        self.inner.shared.faults.load(Ordering::SeqCst)
    }

    /// Queues `work` without waiting for it.
    ///
    /// Submitting to a released context is a usage error and fails with
    /// [`ExecutionError::Released`].
    pub fn execute<F>(&self, work: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.inner.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(self.released());
        };
        sender
            .send(QueuedWork::new(Box::new(work), self.inner.shared.clone()))
            .map_err(|_| self.released())
    }

    /// Queues `work` and returns a [`Completion`] resolving to its result.
    pub fn submit<F, T>(&self, work: F) -> Result<Completion<T>, ExecutionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let shared = self.inner.shared.clone();
        self.execute(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
                shared.report_panic(payload.as_ref());
                ExecutionError::Panicked {
                    context: shared.name.clone(),
                    message: panic_message(payload.as_ref()),
                }
            });
            let _ = result_tx.send(outcome);
        })?;

        Ok(Completion {
            context: self.name().to_string(),
            worker: self.inner.worker,
            receiver: result_rx,
        })
    }

    /// Runs `work` as a unit of work on this context once `delay` has elapsed.
    ///
    /// A zero delay queues the work on the next turn of the worker.
    pub fn schedule<F>(&self, delay: Duration, work: F) -> Result<ScheduledWork, ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_released() {
            return Err(self.released());
        }

        let context = Arc::downgrade(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire_scheduled(context, work);
        });

        Ok(ScheduledWork {
            task: task.abort_handle(),
        })
    }

    /// Waits until everything submitted before this call has run.
    pub async fn wait_for_queued(&self) -> Result<(), ExecutionError> {
        self.submit(|| ())?.await
    }

    /// Waits until nothing is queued or running, including work queued by
    /// work that ran in the meantime.
    pub async fn wait_until_idle(&self) -> Result<(), ExecutionError> {
        if self.is_current() {
            return Err(ExecutionError::SelfWait {
                context: self.name().to_string(),
            });
        }
        let mut pending = self.inner.shared.pending.subscribe();
        pending
            .wait_for(|pending| *pending == 0)
            .await
            .map(|_| ())
            .map_err(|_| self.interrupted())
    }

    /// Stops accepting work. Returns `false` if the context was already
    /// released.
    pub fn shutdown(&self, mode: ShutdownMode) -> bool {
        let mut queue = self.inner.queue.lock();
        if queue.is_none() {
            return false;
        }
        if mode == ShutdownMode::Immediate {
            self.inner.shared.discard.store(true, Ordering::SeqCst);
        }
        queue.take();
        tracing::debug!(context = %self.name(), ?mode, "execution context released");
        true
    }

    /// Waits for the worker thread to finish.
    pub async fn terminated(&self) {
        let mut terminated = self.inner.shared.terminated.subscribe();
        let _ = terminated.wait_for(|terminated| *terminated).await;
    }

    fn released(&self) -> ExecutionError {
        ExecutionError::Released {
            context: self.name().to_string(),
        }
    }

    fn interrupted(&self) -> ExecutionError {
        ExecutionError::Interrupted {
            context: self.name().to_string(),
        }
    }

    pub(crate) fn fault_reporter(&self) -> FaultReporter {
        FaultReporter {
            shared: self.inner.shared.clone(),
        }
    }
}

/// Counts faults caught outside the worker loop against a context without
/// keeping the context open.
pub(crate) struct FaultReporter {
    shared: Arc<Shared>,
}

impl FaultReporter {
    pub(crate) fn record(&self) {
        self.shared.faults.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn context(&self) -> &str {
        &self.shared.name
    }
}

fn fire_scheduled<F>(context: Weak<Inner>, work: F)
where
    F: FnOnce() + Send + 'static,
{
    let Some(inner) = context.upgrade() else {
        return;
    };
    let context = ExecutionContext { inner };
    if let Err(err) = context.execute(work) {
        tracing::warn!(context = %context.name(), error = %err, "dropping scheduled work");
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name())
            .field("released", &self.is_released())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Handle on work scheduled with [`ExecutionContext::schedule`].
#[derive(Debug)]
pub struct ScheduledWork {
    task: AbortHandle,
}

impl ScheduledWork {
    /// Cancels the timer if it has not fired yet. Work already queued on the
    /// context is not affected.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns `true` once the timer fired or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Result of a unit of work queued with [`ExecutionContext::submit`].
///
/// Await it from async code or call [`Completion::blocking_wait`] from a
/// plain thread.
#[derive(Debug)]
pub struct Completion<T> {
    context: String,
    worker: ThreadId,
    receiver: oneshot::Receiver<Result<T, ExecutionError>>,
}

impl<T> Completion<T> {
    /// Blocks the calling thread until the work has run.
    ///
    /// Must not be called from within an async runtime. Calling it from the
    /// context's own worker fails with [`ExecutionError::SelfWait`].
    pub fn blocking_wait(self) -> Result<T, ExecutionError> {
        if thread::current().id() == self.worker {
            return Err(ExecutionError::SelfWait {
                context: self.context,
            });
        }
        let context = self.context;
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(ExecutionError::Interrupted { context }))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, ExecutionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ExecutionError::Interrupted {
                context: this.context.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
