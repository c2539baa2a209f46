// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory print spooler: prioritized queue, single dispatch worker, retry
// with delay, cancellation, and lifecycle events.
//
// All shared state lives behind one mutex that is never held across an
// await.  The dispatch loop pops the highest-priority job, materializes its
// PDF, hands the file to the executor, and settles the outcome — at most one
// job is in flight at any instant.  Producers (the local HTTP API and the
// remote poller) only ever call the thread-safe methods below.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cleverprint_core::config::{keys, ConfigStore};
use cleverprint_core::error::{AgentError, Result};
use cleverprint_core::types::{
    JobEvent, JobId, JobSnapshot, JobStatus, PrintJob, PrintOptions, PrintPayload, Priority,
};

use crate::executor::PrintExecutor;
use crate::materialize::{cleanup_temp, PdfMaterializer};

/// Capacity of the lifecycle event channel. Slow subscribers lag, they do
/// not block the dispatch loop.
const EVENT_CAPACITY: usize = 256;

/// How long `shutdown` waits for the in-flight job before force-cancelling.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Read-only view of the spooler for the status endpoints.
#[derive(Debug, Clone)]
pub struct SpoolerStatus {
    pub is_processing: bool,
    pub queue_length: usize,
    pub max_queue_size: usize,
    pub current_job: Option<JobSnapshot>,
    pub default_printer: Option<String>,
}

/// Shared mutable state — one critical section per operation.
struct State {
    active: VecDeque<PrintJob>,
    current: Option<PrintJob>,
    history: Vec<PrintJob>,
    server_ids_in_flight: HashSet<String>,
    /// Advisory cancel flag for the in-flight job; the OS command is not
    /// interrupted, its result is discarded.
    cancel_current: bool,
}

impl State {
    fn release_server_id(&mut self, job: &PrintJob) {
        if let Some(sid) = &job.server_job_id {
            self.server_ids_in_flight.remove(sid);
        }
    }
}

/// The job spooler. Construct with [`Spooler::new`], then call
/// [`Spooler::start`] once to launch the dispatch loop.
pub struct Spooler {
    state: Mutex<State>,
    events: broadcast::Sender<JobEvent>,
    /// Wakes the dispatch loop when work arrives.
    wake: Notify,
    /// Interrupts the retry-delay sleep on shutdown.
    shutdown_wake: Notify,
    shutting_down: AtomicBool,
    config: Arc<ConfigStore>,
    executor: Arc<dyn PrintExecutor>,
    materializer: PdfMaterializer,
}

impl Spooler {
    pub fn new(config: Arc<ConfigStore>, executor: Arc<dyn PrintExecutor>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(State {
                active: VecDeque::new(),
                current: None,
                history: Vec::new(),
                server_ids_in_flight: HashSet::new(),
                cancel_current: false,
            }),
            events,
            wake: Notify::new(),
            shutdown_wake: Notify::new(),
            shutting_down: AtomicBool::new(false),
            config,
            executor,
            materializer: PdfMaterializer::new(),
        })
    }

    /// Launch the dispatch loop. Call exactly once.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let spooler = Arc::clone(self);
        tokio::spawn(async move { spooler.run_loop().await })
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    // -- Producer operations --------------------------------------------------

    /// Validate, normalize, and queue a new job.
    pub fn enqueue(
        &self,
        payload: PrintPayload,
        options: PrintOptions,
        priority: Priority,
        server_job_id: Option<String>,
    ) -> Result<JobSnapshot> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShuttingDown);
        }
        if payload.is_empty() {
            return Err(AgentError::InvalidPayload(format!(
                "{} payload is empty",
                payload.kind()
            )));
        }
        let mut options = options;
        if options.copies == 0 {
            options.copies = 1;
        }

        let snapshot = {
            let mut state = self.state.lock().expect("spooler lock poisoned");
            let max = self.config.max_queue_size();
            if state.active.len() >= max {
                return Err(AgentError::QueueFull(max));
            }
            if let Some(sid) = &server_job_id {
                if state.server_ids_in_flight.contains(sid) {
                    return Err(AgentError::DuplicateServerJob(sid.clone()));
                }
                state.server_ids_in_flight.insert(sid.clone());
            }
            let job = PrintJob::new(payload, options, priority, server_job_id);
            let snapshot = job.snapshot();
            state.active.push_back(job);
            // Emitted under the lock so Added is ordered before any Updated
            // the dispatch loop produces for the same job.
            self.emit(JobEvent::Added(snapshot.clone()));
            snapshot
        };

        debug!(job_id = %snapshot.id, priority = ?snapshot.priority, "job queued");
        self.wake.notify_one();
        Ok(snapshot)
    }

    /// Cancel a job. Queued jobs leave the queue immediately; the in-flight
    /// job is flagged and settles as cancelled when its print attempt ends.
    /// Returns `false` when the job is unknown or already terminal.
    pub fn cancel(&self, id: JobId) -> bool {
        let event = {
            let mut state = self.state.lock().expect("spooler lock poisoned");

            if state.current.as_ref().is_some_and(|cur| cur.id == id) {
                if state.cancel_current {
                    return false;
                }
                state.cancel_current = true;
                info!(job_id = %id, "in-flight job flagged for cancellation");
                return true;
            }

            let Some(pos) = state.active.iter().position(|j| j.id == id) else {
                return false;
            };
            let mut job = state.active.remove(pos).expect("position just found");
            job.status = JobStatus::Cancelled;
            if let Some(tmp) = job.temp_path.take() {
                cleanup_temp(&tmp);
            }
            state.release_server_id(&job);
            let snapshot = job.snapshot();
            state.history.push(job);
            snapshot
        };

        info!(job_id = %id, "queued job cancelled");
        self.emit(JobEvent::Updated(event));
        true
    }

    /// Re-queue a failed job from history with a fresh retry budget.
    /// No-op (`false`) for anything that is not a failed history entry.
    pub fn retry(&self, id: JobId) -> bool {
        {
            let mut state = self.state.lock().expect("spooler lock poisoned");
            let Some(pos) = state
                .history
                .iter()
                .position(|j| j.id == id && j.status == JobStatus::Failed)
            else {
                return false;
            };
            if state.active.len() >= self.config.max_queue_size() {
                warn!(job_id = %id, "retry rejected — queue is full");
                return false;
            }
            if let Some(sid) = &state.history[pos].server_job_id {
                if state.server_ids_in_flight.contains(sid) {
                    warn!(job_id = %id, server_job_id = %sid, "retry rejected — server job already in flight");
                    return false;
                }
            }
            let mut job = state.history.remove(pos);
            job.status = JobStatus::Queued;
            job.retry_count = 0;
            job.last_error = None;
            if let Some(sid) = &job.server_job_id {
                state.server_ids_in_flight.insert(sid.clone());
            }
            let snapshot = job.snapshot();
            state.active.push_back(job);
            // Under the lock for the same per-job ordering reason as enqueue.
            self.emit(JobEvent::Updated(snapshot));
        }

        info!(job_id = %id, "failed job re-queued");
        self.wake.notify_one();
        true
    }

    /// Drop completed entries from history; failed and cancelled are kept.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.state.lock().expect("spooler lock poisoned");
        let before = state.history.len();
        state.history.retain(|j| j.status != JobStatus::Completed);
        before - state.history.len()
    }

    /// Whether a server job id currently occupies the queue or the worker.
    pub fn has_server_job(&self, server_job_id: &str) -> bool {
        self.state
            .lock()
            .expect("spooler lock poisoned")
            .server_ids_in_flight
            .contains(server_job_id)
    }

    // -- Read-only views -------------------------------------------------------

    /// In-flight job (if any) followed by the queue in arrival order.
    pub fn list_active(&self) -> Vec<JobSnapshot> {
        let state = self.state.lock().expect("spooler lock poisoned");
        state
            .current
            .iter()
            .chain(state.active.iter())
            .map(PrintJob::snapshot)
            .collect()
    }

    /// Active plus history, newest first.
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        let state = self.state.lock().expect("spooler lock poisoned");
        let mut seen = HashSet::new();
        let mut jobs: Vec<JobSnapshot> = state
            .current
            .iter()
            .chain(state.active.iter())
            .chain(state.history.iter())
            .filter(|j| seen.insert(j.id))
            .map(PrintJob::snapshot)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Find one job anywhere in the spooler.
    pub fn find(&self, id: JobId) -> Option<JobSnapshot> {
        let state = self.state.lock().expect("spooler lock poisoned");
        state
            .current
            .iter()
            .chain(state.active.iter())
            .chain(state.history.iter())
            .find(|j| j.id == id)
            .map(PrintJob::snapshot)
    }

    pub fn status(&self) -> SpoolerStatus {
        let state = self.state.lock().expect("spooler lock poisoned");
        SpoolerStatus {
            is_processing: state.current.is_some(),
            queue_length: state.active.len(),
            max_queue_size: self.config.max_queue_size(),
            current_job: state.current.as_ref().map(PrintJob::snapshot),
            default_printer: self.config.default_printer(),
        }
    }

    /// Write the default printer through to the config store.
    pub fn set_default_printer(&self, name: &str) -> bool {
        self.config.set(keys::DEFAULT_PRINTER, name)
    }

    // -- Shutdown ---------------------------------------------------------------

    /// Stop intake, then wait up to five seconds for the in-flight job. A job
    /// still running after the grace period is force-cancelled.
    pub async fn shutdown(&self) {
        info!("spooler shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        self.shutdown_wake.notify_one();

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        loop {
            let busy = {
                let state = self.state.lock().expect("spooler lock poisoned");
                state.current.is_some()
            };
            if !busy {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                self.force_cancel_current();
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("spooler stopped");
    }

    fn force_cancel_current(&self) {
        let snapshot = {
            let mut state = self.state.lock().expect("spooler lock poisoned");
            let Some(mut job) = state.current.take() else {
                return;
            };
            warn!(job_id = %job.id, "forced shutdown — abandoning in-flight job");
            job.status = JobStatus::Cancelled;
            if let Some(tmp) = job.temp_path.take() {
                cleanup_temp(&tmp);
            }
            state.release_server_id(&job);
            state.cancel_current = false;
            let snapshot = job.snapshot();
            state.history.push(job);
            snapshot
        };
        self.emit(JobEvent::Updated(snapshot));
    }

    // -- Dispatch loop -----------------------------------------------------------

    async fn run_loop(self: Arc<Self>) {
        info!("spooler dispatch loop started");
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match self.pop_next() {
                Some(snapshot) => {
                    self.emit(JobEvent::Updated(snapshot.clone()));
                    if let Some(delay) = self.process_current(snapshot.id).await {
                        // Back off before the next attempt, but let shutdown
                        // cut the sleep short.
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.shutdown_wake.notified() => {}
                        }
                    }
                }
                None => self.wake.notified().await,
            }
        }
        info!("spooler dispatch loop stopped");
    }

    /// Pop the best queued job into the `current` slot.
    ///
    /// Selection is highest priority first, FIFO within a priority, decided
    /// fresh on every call so late high-priority arrivals overtake.
    fn pop_next(&self) -> Option<JobSnapshot> {
        let mut state = self.state.lock().expect("spooler lock poisoned");
        let best = state
            .active
            .iter()
            .enumerate()
            .min_by_key(|(idx, job)| (job.priority.rank(), *idx))
            .map(|(idx, _)| idx)?;
        let mut job = state.active.remove(best).expect("index just found");
        job.status = JobStatus::Processing;
        let snapshot = job.snapshot();
        state.current = Some(job);
        state.cancel_current = false;
        Some(snapshot)
    }

    /// Run one print attempt for the job in the `current` slot.
    ///
    /// Returns the retry delay when the job was re-queued after a failure.
    async fn process_current(&self, id: JobId) -> Option<Duration> {
        let (payload, options) = {
            let state = self.state.lock().expect("spooler lock poisoned");
            let job = state.current.as_ref()?;
            let mut options = job.options.clone();
            if options.printer_name.is_none() {
                options.printer_name = self.config.default_printer();
            }
            (job.payload.clone(), options)
        };

        debug!(job_id = %id, payload = payload.kind(), "materializing");
        let materialized = match self.materializer.materialize(&payload).await {
            Ok(m) => m,
            Err(e) => return self.settle_attempt(Err(e)),
        };

        // Record the temp path on the job so cancellation and shutdown can
        // clean it up, then move to the printing state.
        let snapshot = {
            let mut state = self.state.lock().expect("spooler lock poisoned");
            match state.current.as_mut() {
                Some(job) => {
                    if materialized.owned {
                        job.temp_path = Some(materialized.path.clone());
                    }
                    job.status = JobStatus::Printing;
                    job.snapshot()
                }
                None => {
                    // Forced shutdown took the job mid-materialize; the temp
                    // file is ours to reap since it was never recorded.
                    drop(state);
                    if materialized.owned {
                        cleanup_temp(&materialized.path);
                    }
                    return None;
                }
            }
        };
        self.emit(JobEvent::Updated(snapshot));

        let result = self.executor.print(&materialized.path, &options).await;
        self.settle_attempt(result)
    }

    /// Settle the outcome of one attempt: completed, re-queued for retry,
    /// failed terminally, or cancelled (result discarded).
    ///
    /// Returns the retry delay iff the job went back to the queue.
    fn settle_attempt(&self, result: Result<()>) -> Option<Duration> {
        enum Settled {
            Completed(JobSnapshot),
            Requeued(JobSnapshot, Duration),
            Failed(JobSnapshot, String),
            Cancelled(JobSnapshot),
        }

        let settled = {
            let mut state = self.state.lock().expect("spooler lock poisoned");
            // Forced shutdown may have already taken the job; the late
            // result is simply dropped.
            let mut job = state.current.take()?;
            if let Some(tmp) = job.temp_path.take() {
                cleanup_temp(&tmp);
            }

            if state.cancel_current {
                state.cancel_current = false;
                job.status = JobStatus::Cancelled;
                state.release_server_id(&job);
                let snapshot = job.snapshot();
                state.history.push(job);
                Settled::Cancelled(snapshot)
            } else {
                match result {
                    Ok(()) => {
                        job.status = JobStatus::Completed;
                        state.release_server_id(&job);
                        let snapshot = job.snapshot();
                        state.history.push(job);
                        Settled::Completed(snapshot)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        job.retry_count += 1;
                        job.last_error = Some(message.clone());
                        if job.retry_count < self.config.max_retries() {
                            job.status = JobStatus::Queued;
                            let snapshot = job.snapshot();
                            // Head of the queue: the retried job goes out
                            // before anything else of its priority.
                            state.active.push_front(job);
                            Settled::Requeued(snapshot, self.config.retry_delay())
                        } else {
                            job.status = JobStatus::Failed;
                            state.release_server_id(&job);
                            let snapshot = job.snapshot();
                            state.history.push(job);
                            Settled::Failed(snapshot, message)
                        }
                    }
                }
            }
        };

        match settled {
            Settled::Completed(snapshot) => {
                info!(job_id = %snapshot.id, "job completed");
                self.emit(JobEvent::Completed(snapshot));
                None
            }
            Settled::Requeued(snapshot, delay) => {
                warn!(
                    job_id = %snapshot.id,
                    retry = snapshot.retry_count,
                    delay_ms = delay.as_millis(),
                    "print attempt failed — re-queued"
                );
                self.emit(JobEvent::Updated(snapshot));
                Some(delay)
            }
            Settled::Failed(snapshot, error) => {
                warn!(job_id = %snapshot.id, error = %error, "job failed — retries exhausted");
                self.emit(JobEvent::Failed {
                    job: snapshot,
                    error,
                });
                None
            }
            Settled::Cancelled(snapshot) => {
                info!(job_id = %snapshot.id, "job cancelled — print result discarded");
                self.emit(JobEvent::Updated(snapshot));
                None
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine — the agent may run without the remote client.
        let _ = self.events.send(event);
    }
}
