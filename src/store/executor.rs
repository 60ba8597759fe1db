//! Single-worker background executor.
//!
//! Exactly one worker thread services both flush and compaction tasks,
//! serializing them by construction. Tasks are submitted over a channel
//! together with a [`TaskHandle`]; the handle is how the coordinator
//! awaits completion and observes a task's failure.
//!
//! Shutdown drops the sender side: the worker drains the jobs already
//! queued (a pending flush still runs) and exits when the channel
//! disconnects.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

use super::StoreError;

/// A unit of background work plus its completion handle.
pub(crate) struct Job {
    pub(crate) name: &'static str,
    pub(crate) run: Box<dyn FnOnce() -> Result<(), StoreError> + Send>,
    pub(crate) handle: Arc<TaskHandle>,
}

enum TaskState {
    Running,
    /// The task finished; a failure is stored until someone awaits it.
    Finished(Option<StoreError>),
}

/// Completion future for one background task.
pub(crate) struct TaskHandle {
    state: Mutex<TaskState>,
    done: Condvar,
}

impl TaskHandle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskState::Running),
            done: Condvar::new(),
        })
    }

    fn finish(&self, result: Result<(), StoreError>) {
        if let Ok(mut state) = self.state.lock() {
            *state = TaskState::Finished(result.err());
            self.done.notify_all();
        }
    }

    /// Blocks until the task completes, taking its error if it failed.
    pub(crate) fn wait(&self) -> Result<(), StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Internal("task state lock poisoned".into()))?;
        loop {
            match &mut *state {
                TaskState::Finished(failure) => {
                    return match failure.take() {
                        Some(e) => Err(e),
                        None => Ok(()),
                    };
                }
                TaskState::Running => {
                    state = self
                        .done
                        .wait(state)
                        .map_err(|_| StoreError::Internal("task state lock poisoned".into()))?;
                }
            }
        }
    }
}

/// Owns the worker thread and the submission side of the job channel.
pub(crate) struct Executor {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub(crate) fn start() -> Result<Self, StoreError> {
        let (sender, receiver) = unbounded::<Job>();
        let worker = thread::Builder::new()
            .name("stratadb-bg".into())
            .spawn(move || worker_loop(receiver))
            .map_err(|e| StoreError::Internal(format!("failed to spawn background worker: {e}")))?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub(crate) fn submit(&self, job: Job) -> Result<(), StoreError> {
        let guard = self
            .sender
            .lock()
            .map_err(|_| StoreError::Internal("executor lock poisoned".into()))?;
        match guard.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| StoreError::Closed),
            None => Err(StoreError::Closed),
        }
    }

    /// Stops accepting jobs, lets queued jobs drain, and joins the
    /// worker thread.
    pub(crate) fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);
        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = worker {
            if handle.join().is_err() {
                error!("background worker panicked");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    debug!("background worker started");
    while let Ok(job) = receiver.recv() {
        debug!(task = job.name, "background task started");
        let result = (job.run)();
        match &result {
            Ok(()) => debug!(task = job.name, "background task finished"),
            Err(e) => error!(task = job.name, error = %e, "background task failed"),
        }
        job.handle.finish(result);
    }
    debug!("background worker stopped");
}
