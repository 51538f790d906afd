//! Named periodic background loops.
//!
//! Every task runs as one tokio task driven by an interval. Body errors and
//! panics are recorded in the task's status and the loop carries on; only
//! cancellation ends it. Cancellation is observed between ticks, so a body
//! that has started always runs to completion.
//!
//! Start, stop and restart are serialised by one lifecycle lock, which makes
//! it impossible for two instances of the same task to be alive at once.

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::utils::time::now_ts;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub mod tasks;

pub use self::tasks::{TaskDefinition, BUILTIN_TASKS, VIOLATION_POLLING};

/// One tick of a task body
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct TaskSpec {
    pub name: String,
    pub interval: Duration,
    pub body: TaskFn,
}

impl TaskSpec {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            body: Arc::new(move || body().boxed()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Cancelling,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub interval_secs: f64,
    pub ticks: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<f64>,
}

impl TaskStatus {
    fn new(interval: Duration) -> Self {
        Self {
            state: TaskState::Stopped,
            interval_secs: interval.as_secs_f64(),
            ticks: 0,
            failures: 0,
            last_error: None,
            last_success: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }
}

type SharedStatus = Arc<Mutex<TaskStatus>>;

struct TaskSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskSupervisor {
    specs: BTreeMap<String, TaskSpec>,
    statuses: BTreeMap<String, SharedStatus>,
    lifecycle: tokio::sync::Mutex<HashMap<String, TaskSlot>>,
}

impl TaskSupervisor {
    pub fn new(specs: Vec<TaskSpec>) -> Self {
        let statuses = specs
            .iter()
            .map(|spec| (spec.name.clone(), Arc::new(Mutex::new(TaskStatus::new(spec.interval)))))
            .collect();
        let specs = specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect();

        Self {
            specs,
            statuses,
            lifecycle: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Supervisor over the built-in task table
    pub fn from_context(ctx: &Arc<AppContext>) -> Self {
        Self::new(tasks::builtin_specs(ctx))
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Start every registered task that is not already running
    pub async fn start(&self) {
        let mut running = self.lifecycle.lock().await;
        for name in self.specs.keys() {
            self.spawn_locked(&mut running, name);
        }
        info!("Started {} background tasks", running.len());
    }

    /// Start `name` if it is idle. Returns true if it had to be started.
    pub async fn ensure_running(&self, name: &str) -> Result<bool> {
        self.spec(name)?;
        let mut running = self.lifecycle.lock().await;
        Ok(self.spawn_locked(&mut running, name))
    }

    /// Cancel `name` and wait for its current tick to finish
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.spec(name)?;
        let mut running = self.lifecycle.lock().await;
        self.stop_locked(&mut running, name).await;
        Ok(())
    }

    /// Stop then start under the same lock, so the old and new instance never
    /// overlap.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.spec(name)?;
        let mut running = self.lifecycle.lock().await;
        self.stop_locked(&mut running, name).await;
        self.spawn_locked(&mut running, name);
        info!("Restarted background task {}", name);
        Ok(())
    }

    /// Cancel every task, then wait for each to finish its current tick
    pub async fn stop_all(&self) {
        let mut running = self.lifecycle.lock().await;
        let slots: Vec<(String, TaskSlot)> = running.drain().collect();

        for (name, slot) in &slots {
            self.set_state(name, TaskState::Cancelling);
            slot.cancel.cancel();
        }
        for (name, slot) in slots {
            if let Err(e) = slot.handle.await {
                error!("Background task {} ended abnormally: {}", name, e);
            }
            self.set_state(&name, TaskState::Stopped);
        }
        info!("All background tasks stopped");
    }

    /// Snapshot of every task's status; never waits on lifecycle changes
    pub fn get_status(&self) -> BTreeMap<String, TaskStatus> {
        self.statuses
            .iter()
            .map(|(name, status)| {
                let status = status.lock().unwrap_or_else(|e| e.into_inner()).clone();
                (name.clone(), status)
            })
            .collect()
    }

    fn spec(&self, name: &str) -> Result<&TaskSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("background task {}", name)))
    }

    fn set_state(&self, name: &str, state: TaskState) {
        if let Some(status) = self.statuses.get(name) {
            status.lock().unwrap_or_else(|e| e.into_inner()).state = state;
        }
    }

    fn spawn_locked(&self, running: &mut HashMap<String, TaskSlot>, name: &str) -> bool {
        if running.get(name).map_or(false, |slot| !slot.handle.is_finished()) {
            return false;
        }
        let (Some(spec), Some(status)) = (self.specs.get(name), self.statuses.get(name)) else {
            return false;
        };

        let cancel = CancellationToken::new();
        status.lock().unwrap_or_else(|e| e.into_inner()).state = TaskState::Running;
        let handle = tokio::spawn(run_loop(
            spec.name.clone(),
            spec.interval,
            Arc::clone(&spec.body),
            Arc::clone(status),
            cancel.clone(),
        ));
        debug!("Spawned background task {} every {:?}", name, spec.interval);

        running.insert(name.to_string(), TaskSlot { cancel, handle });
        true
    }

    async fn stop_locked(&self, running: &mut HashMap<String, TaskSlot>, name: &str) {
        let Some(slot) = running.remove(name) else {
            return;
        };
        self.set_state(name, TaskState::Cancelling);
        slot.cancel.cancel();
        if let Err(e) = slot.handle.await {
            error!("Background task {} ended abnormally: {}", name, e);
        }
        self.set_state(name, TaskState::Stopped);
        info!("Stopped background task {}", name);
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    body: TaskFn,
    status: SharedStatus,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = match AssertUnwindSafe(body()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(Error::TaskBody {
                task: name.clone(),
                message: "tick panicked".to_string(),
            }),
        };

        let mut status = status.lock().unwrap_or_else(|e| e.into_inner());
        status.ticks += 1;
        match outcome {
            Ok(()) => {
                status.last_success = Some(now_ts());
                debug!("Background task {} tick {} ok", name, status.ticks);
            }
            Err(e) => {
                status.failures += 1;
                status.last_error = Some(e.to_string());
                error!("Error in background task {}: {}", name, e);
            }
        }
    }

    debug!("Background task {} exited", name);
}

#[cfg(test)]
mod tests;
