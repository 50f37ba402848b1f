//! Processor gateway backed by a dedicated worker thread.
//!
//! The worker owns its own single-threaded tokio runtime so that
//! CPU/GPU-bound inference never blocks the scheduler's runtime. Jobs cross
//! a `crossbeam-channel`; results land in a shared slot map that `poll` reads
//! without blocking.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::{InferenceExecutor, PollStatus, ProcessorGateway, SchedulerError, TaskHandle};

struct Job {
    handle: TaskHandle,
    prompt: String,
}

enum Slot {
    Running,
    Done(Result<String, String>),
}

type Slots = Arc<Mutex<HashMap<TaskHandle, Slot>>>;

const SHUT_DOWN: &str = "worker gateway shut down";

/// Gateway running an [`InferenceExecutor`] on a dedicated OS thread.
pub struct WorkerGateway<E: InferenceExecutor> {
    job_tx: Mutex<Option<Sender<Job>>>,
    slots: Slots,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_handle: AtomicU64,
    _executor: PhantomData<E>,
}

impl<E: InferenceExecutor> WorkerGateway<E> {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Backend` if the thread cannot be spawned.
    pub fn new(executor: E) -> Result<Self, SchedulerError> {
        let (job_tx, job_rx) = bounded::<Job>(1);
        let slots: Slots = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = spawn_worker(job_rx, Arc::clone(&slots), Arc::clone(&shutdown), executor)?;
        info!("worker gateway started");

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            slots,
            shutdown,
            worker: Mutex::new(Some(worker)),
            next_handle: AtomicU64::new(1),
            _executor: PhantomData,
        })
    }

    /// Stop accepting work and join the worker thread.
    ///
    /// A task already running is allowed to finish first.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.job_tx.lock() = None;
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("worker gateway thread panicked");
            }
        }
        info!("worker gateway shut down");
    }
}

impl<E: InferenceExecutor> Drop for WorkerGateway<E> {
    fn drop(&mut self) {
        // Detach rather than join: a running inference may take minutes.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.job_tx.lock() = None;
        }
    }
}

#[async_trait]
impl<E: InferenceExecutor> ProcessorGateway for WorkerGateway<E> {
    async fn submit(&self, prompt: &str) -> Result<TaskHandle, SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Backend(SHUT_DOWN.into()));
        }
        let mut slots = self.slots.lock();
        if !slots.is_empty() {
            return Err(SchedulerError::GatewayBusy);
        }

        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let job = Job {
            handle,
            prompt: prompt.to_string(),
        };
        let job_tx = self.job_tx.lock();
        let Some(job_tx) = job_tx.as_ref() else {
            return Err(SchedulerError::Backend(SHUT_DOWN.into()));
        };
        match job_tx.try_send(job) {
            Ok(()) => {
                slots.insert(handle, Slot::Running);
                debug!(%handle, "job handed to worker");
                Ok(handle)
            }
            Err(TrySendError::Full(_)) => Err(SchedulerError::GatewayBusy),
            Err(TrySendError::Disconnected(_)) => {
                Err(SchedulerError::Backend("worker thread exited".into()))
            }
        }
    }

    async fn poll(&self, handle: TaskHandle) -> Result<PollStatus, SchedulerError> {
        let mut slots = self.slots.lock();
        match slots.get(&handle) {
            None => return Err(SchedulerError::UnknownHandle(handle.0)),
            Some(Slot::Running) => return Ok(PollStatus::Pending),
            Some(Slot::Done(_)) => {}
        }
        Ok(match slots.remove(&handle) {
            Some(Slot::Done(Err(message))) => PollStatus::Failed(message),
            Some(Slot::Done(Ok(output))) => PollStatus::Ready(output),
            _ => PollStatus::Pending,
        })
    }

    fn kind(&self) -> &'static str {
        "worker"
    }
}

fn spawn_worker<E: InferenceExecutor>(
    job_rx: Receiver<Job>,
    slots: Slots,
    shutdown: Arc<AtomicBool>,
    executor: E,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name("inference-worker".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to create worker runtime");
                    return;
                }
            };

            run_jobs(&rt, &job_rx, &slots, &shutdown, &executor);
            debug!("worker thread exiting");
        })
        .map_err(|e| SchedulerError::Backend(format!("failed to spawn worker thread: {e}")))
}

/// Execute jobs until the channel closes. Jobs received after shutdown are
/// failed rather than run, so their handles still resolve.
fn run_jobs<E: InferenceExecutor>(
    rt: &tokio::runtime::Runtime,
    job_rx: &Receiver<Job>,
    slots: &Slots,
    shutdown: &AtomicBool,
    executor: &E,
) {
    // recv() fails once the sender is dropped on shutdown.
    while let Ok(job) = job_rx.recv() {
        if shutdown.load(Ordering::Acquire) {
            warn!(handle = %job.handle, "job arrived after shutdown");
            finish(slots, job.handle, Err(SHUT_DOWN.into()));
            continue;
        }
        debug!(handle = %job.handle, "worker executing job");
        let exec = executor.clone();
        let prompt = job.prompt;
        // Spawned so that a panicking executor surfaces as a JoinError.
        let outcome = rt.block_on(async move {
            tokio::spawn(async move { exec.execute(prompt).await }).await
        });
        let outcome = outcome.unwrap_or_else(|e| Err(format!("executor panicked: {e}")));
        finish(slots, job.handle, outcome);
    }
}

fn finish(slots: &Slots, handle: TaskHandle, outcome: Result<String, String>) {
    if let Some(slot) = slots.lock().get_mut(&handle) {
        *slot = Slot::Done(outcome);
    }
}
