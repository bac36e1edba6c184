//! Persistent job scheduling over the document store.
//!
//! Jobs live in the `agenda` collection, so schedules survive restarts and
//! can be inspected like any other entity. The dispatcher polls for due
//! jobs, locks each one while a handler runs it, and either deletes it
//! (one-shot) or advances it to its next occurrence (recurring).
//!
//! Delivery is at-least-once: a crash between handler completion and the
//! unlock leaves the job locked until `lock_lifetime` expires, after which
//! it is dispatched again.

pub mod cron;

pub use cron::CronExpr;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ema_core::{
    now_ms, DocumentStore, EverySpec, Interval, Job, JobSpec, SchedulerError, SortSpec,
    JOB_COLLECTION,
};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes jobs dispatched under its registered name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), SchedulerError>;
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Poll period for due jobs
    pub process_every: Duration,
    /// Concurrent executions allowed per job name
    pub default_concurrency: usize,
    /// Concurrent executions allowed across all jobs
    pub max_concurrency: usize,
    /// How long a dispatch lock shields a job from re-dispatch
    pub lock_lifetime: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            process_every: Duration::from_secs(5),
            default_concurrency: 5,
            max_concurrency: 20,
            lock_lifetime: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopping,
}

/// The persistent job scheduler.
pub struct Scheduler {
    store: Arc<dyn DocumentStore>,
    config: SchedulerConfig,
    state: Mutex<State>,
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
    running: Arc<Mutex<HashSet<String>>>,
    running_by_name: Arc<Mutex<HashMap<String, usize>>>,
    cancel: Mutex<Option<CancellationToken>>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    unique_guard: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DocumentStore>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            state: Mutex::new(State::Idle),
            handlers: Mutex::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
            running_by_name: Arc::new(Mutex::new(HashMap::new())),
            cancel: Mutex::new(None),
            loop_handle: tokio::sync::Mutex::new(None),
            unique_guard: tokio::sync::Mutex::new(()),
        })
    }

    /// Register handlers and begin dispatching due jobs.
    ///
    /// Idempotent while running. Any failure before the dispatch loop
    /// spawns leaves the scheduler idle with nothing changed.
    pub async fn start(
        self: &Arc<Self>,
        handlers: HashMap<String, Arc<dyn JobHandler>>,
    ) -> Result<(), SchedulerError> {
        match *self.state.lock().unwrap() {
            State::Running => return Ok(()),
            State::Stopping => {
                return Err(SchedulerError::HandlerFailed {
                    name: "start".into(),
                    reason: "scheduler is stopping".into(),
                })
            }
            State::Idle => {}
        }

        self.store
            .create_index(JOB_COLLECTION, &json!({"runAt": 1}))
            .await?;

        *self.handlers.lock().unwrap() = handlers;

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());
        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.dispatch_loop(cancel).await });
        *self.loop_handle.lock().await = Some(handle);
        *self.state.lock().unwrap() = State::Running;

        info!("Scheduler started");
        Ok(())
    }

    /// Stop dispatching and wait for in-flight handlers to finish.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Running {
                return;
            }
            *state = State::Stopping;
        }
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        *self.state.lock().unwrap() = State::Idle;
        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == State::Running
    }

    /// Persist a one-shot job. May be called before `start`.
    pub async fn schedule(&self, spec: JobSpec) -> Result<String, SchedulerError> {
        let doc = job_document(&spec.name, spec.run_at, &spec.data, None, None);
        let stored = self.store.upsert_entity(JOB_COLLECTION, doc).await?;
        let id = stored_id(&stored)?;
        debug!(job = %spec.name, id = %id, run_at = spec.run_at, "Scheduled one-shot job");
        Ok(id)
    }

    /// Persist a recurring job. The first firing is never immediate: a
    /// `run_at` in the past is advanced to the next occurrence. Two calls
    /// with the same `unique` value collapse to one persisted record.
    pub async fn schedule_every(&self, spec: EverySpec) -> Result<String, SchedulerError> {
        // Validate the interval up front so a bad cron never persists
        let now = now_ms();
        let fallback = next_fire(&spec.interval, now)?;
        let run_at = if spec.run_at > now { spec.run_at } else { fallback };

        let _guard = self.unique_guard.lock().await;
        if let Some(unique) = &spec.unique {
            let existing = self
                .store
                .list_collection(JOB_COLLECTION, &json!({"unique": unique}), Some(1), None)
                .await?;
            if let Some(doc) = existing.first() {
                return stored_id(doc);
            }
        }

        let doc = job_document(
            &spec.name,
            run_at,
            &spec.data,
            Some(&spec.interval),
            spec.unique.as_ref(),
        );
        let stored = self.store.upsert_entity(JOB_COLLECTION, doc).await?;
        let id = stored_id(&stored)?;
        debug!(job = %spec.name, id = %id, "Scheduled recurring job");
        Ok(id)
    }

    /// Overwrite a one-shot job's name, data, and fire time. Returns false
    /// when the job does not exist or is currently running.
    pub async fn reschedule(&self, id: &str, spec: JobSpec) -> Result<bool, SchedulerError> {
        if self.running.lock().unwrap().contains(id) {
            return Ok(false);
        }
        let Some(mut job) = self.get_job(id).await? else {
            return Ok(false);
        };
        job.name = spec.name;
        job.data = spec.data;
        job.run_at = spec.run_at;
        self.persist(&job).await?;
        Ok(true)
    }

    /// As [`Scheduler::reschedule`], but for recurring jobs; also updates
    /// the interval.
    pub async fn reschedule_every(&self, id: &str, spec: EverySpec) -> Result<bool, SchedulerError> {
        next_fire(&spec.interval, now_ms())?;
        if self.running.lock().unwrap().contains(id) {
            return Ok(false);
        }
        let Some(mut job) = self.get_job(id).await? else {
            return Ok(false);
        };
        job.name = spec.name;
        job.data = spec.data;
        job.run_at = spec.run_at;
        job.interval = Some(spec.interval);
        self.persist(&job).await?;
        Ok(true)
    }

    /// Delete a job. Returns false when it does not exist or is currently
    /// running.
    pub async fn cancel(&self, id: &str) -> Result<bool, SchedulerError> {
        if self.running.lock().unwrap().contains(id) {
            return Ok(false);
        }
        Ok(self
            .store
            .delete_entity(JOB_COLLECTION, &Value::String(id.to_string()))
            .await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, SchedulerError> {
        let docs = self
            .store
            .list_collection(JOB_COLLECTION, &json!({"id": id}), Some(1), None)
            .await?;
        Ok(docs.first().and_then(|d| parse_job(d)))
    }

    /// List jobs, optionally restricted to one handler name.
    pub async fn list_jobs(&self, name: Option<&str>) -> Result<Vec<Job>, SchedulerError> {
        let filter = match name {
            Some(name) => json!({"name": name}),
            None => Value::Null,
        };
        let docs = self
            .store
            .list_collection(JOB_COLLECTION, &filter, None, Some(SortSpec::asc("runAt")))
            .await?;
        Ok(docs.iter().filter_map(parse_job).collect())
    }

    async fn persist(&self, job: &Job) -> Result<(), SchedulerError> {
        let doc = serde_json::to_value(job)
            .map_err(|e| SchedulerError::Store(ema_core::StoreError::Serialization(e.to_string())))?;
        self.store.upsert_entity(JOB_COLLECTION, doc).await?;
        Ok(())
    }

    async fn dispatch_loop(self: Arc<Self>, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut joins: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.process_every) => {}
            }
            while joins.try_join_next().is_some() {}
            if let Err(e) = self.dispatch_due(&semaphore, &mut joins).await {
                warn!(error = %e, "Dispatch pass failed");
            }
        }

        // Drain in-flight work before reporting stopped
        while joins.join_next().await.is_some() {}
    }

    async fn dispatch_due(
        self: &Arc<Self>,
        semaphore: &Arc<Semaphore>,
        joins: &mut JoinSet<()>,
    ) -> Result<(), SchedulerError> {
        let now = now_ms();
        let docs = self
            .store
            .list_collection(
                JOB_COLLECTION,
                &Value::Null,
                None,
                Some(SortSpec::asc("runAt")),
            )
            .await?;

        for doc in docs {
            let Some(mut job) = parse_job(&doc) else {
                warn!("Skipping malformed agenda document");
                continue;
            };
            if job.run_at > now {
                break; // sorted by runAt
            }
            if job.failed_at.is_some() && job.interval.is_none() {
                continue; // failed one-shots are kept for inspection only
            }
            if let Some(locked_at) = job.locked_at {
                if now - locked_at < self.config.lock_lifetime.as_millis() as i64 {
                    continue;
                }
            }
            if self.running.lock().unwrap().contains(&job.id) {
                continue;
            }
            let handler = {
                let handlers = self.handlers.lock().unwrap();
                match handlers.get(&job.name) {
                    Some(h) => h.clone(),
                    None => continue, // stays queued until a handler appears
                }
            };
            {
                let by_name = self.running_by_name.lock().unwrap();
                if by_name.get(&job.name).copied().unwrap_or(0) >= self.config.default_concurrency {
                    continue;
                }
            }
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break; // global concurrency ceiling reached
            };

            // Lock before running so another pass cannot pick it up
            job.locked_at = Some(now);
            self.persist(&job).await?;
            self.running.lock().unwrap().insert(job.id.clone());
            *self
                .running_by_name
                .lock()
                .unwrap()
                .entry(job.name.clone())
                .or_insert(0) += 1;

            let scheduler = self.clone();
            joins.spawn(async move {
                scheduler.run_job(handler, job).await;
                drop(permit);
            });
        }
        Ok(())
    }

    async fn run_job(self: Arc<Self>, handler: Arc<dyn JobHandler>, mut job: Job) {
        debug!(job = %job.name, id = %job.id, "Running job");
        let result = handler.run(&job).await;
        let now = now_ms();

        let outcome: Result<(), SchedulerError> = async {
            match (&result, &job.interval) {
                // Recurring jobs always advance, recording the last failure
                (_, Some(interval)) => {
                    job.run_at = next_fire(interval, now)?;
                    job.locked_at = None;
                    job.last_run_at = Some(now);
                    job.fail_reason = result.as_ref().err().map(|e| e.to_string());
                    self.persist(&job).await
                }
                (Ok(()), None) => {
                    self.store
                        .delete_entity(JOB_COLLECTION, &Value::String(job.id.clone()))
                        .await?;
                    Ok(())
                }
                (Err(e), None) => {
                    job.locked_at = None;
                    job.failed_at = Some(now);
                    job.fail_reason = Some(e.to_string());
                    self.persist(&job).await
                }
            }
        }
        .await;

        if let Err(e) = &result {
            warn!(job = %job.name, id = %job.id, error = %e, "Job handler failed");
        }
        if let Err(e) = outcome {
            warn!(job = %job.name, id = %job.id, error = %e, "Failed to settle job state");
        }

        self.running.lock().unwrap().remove(&job.id);
        let mut by_name = self.running_by_name.lock().unwrap();
        if let Some(count) = by_name.get_mut(&job.name) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Build a fresh job document, leaving id assignment to the store.
fn job_document(
    name: &str,
    run_at: i64,
    data: &Value,
    interval: Option<&Interval>,
    unique: Option<&Value>,
) -> Value {
    let mut doc = json!({
        "name": name,
        "runAt": run_at,
        "data": data,
    });
    if let Some(interval) = interval {
        doc["interval"] = serde_json::to_value(interval).expect("interval serializes");
    }
    if let Some(unique) = unique {
        doc["unique"] = unique.clone();
    }
    doc
}

fn parse_job(doc: &Value) -> Option<Job> {
    serde_json::from_value(doc.clone()).ok()
}

fn stored_id(doc: &Value) -> Result<String, SchedulerError> {
    doc.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            SchedulerError::Store(ema_core::StoreError::Storage(
                "stored job has no string id".into(),
            ))
        })
}

/// The next fire time strictly after `now` for the given interval.
fn next_fire(interval: &Interval, now: i64) -> Result<i64, SchedulerError> {
    match interval {
        Interval::Millis(ms) => {
            if *ms <= 0 {
                return Err(SchedulerError::InvalidInterval(format!(
                    "interval must be positive, got {ms}"
                )));
            }
            Ok(now + ms)
        }
        Interval::Cron(expr) => {
            let cron = CronExpr::parse(expr)?;
            let after = chrono::DateTime::from_timestamp_millis(now)
                .unwrap_or_else(chrono::Utc::now);
            cron.next_after(after)
                .map(|t| t.timestamp_millis())
                .ok_or_else(|| {
                    SchedulerError::InvalidInterval(format!("cron '{expr}' never fires"))
                })
        }
    }
}
