//! Generic task supervision, ported from the teacher's subsystem runtime.
//! Renamed `Component` -> [`Task`] here since this crate's `Component`
//! (`component.rs`) already names the HIL domain tree node.
//!
//! A [`Task`] is any independently-runnable unit the supervisor owns: the
//! cycle engine, the command-socket listener, the telemetry HTTP listener.
//! [`spawn_tasks`] runs them all concurrently under one shared
//! `CancellationToken`; any task's error cancels that token so its siblings
//! shut down cooperatively instead of leaking.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit owned by the supervisor.
/// Implementors capture all shared state at construction time; `run` is
/// called once by [`spawn_tasks`] and should run until `shutdown` is
/// cancelled or the task's own work is done.
pub trait Task: Send + 'static {
    fn id(&self) -> &str;

    fn run(self: Box<Self>, shutdown: CancellationToken) -> TaskFuture;
}

/// An opaque handle to a running task set, resolving when every task has
/// exited (cleanly or otherwise).
pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Task(format!("task panicked: {e}"))),
        }
    }
}

/// Spawn each [`Task`] as an independent Tokio task. If any task returns
/// `Err` (or panics), `shutdown` is cancelled so the rest stop cooperatively,
/// and the first error encountered is returned once everything has exited.
pub fn spawn_tasks(tasks: Vec<Box<dyn Task>>, shutdown: CancellationToken) -> RuntimeHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for task in tasks {
            let id = task.id().to_string();
            let shutdown = shutdown.clone();
            debug!(task = %id, "spawning task");
            set.spawn(task.run(shutdown));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("task panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Task(format!("task panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("task error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    RuntimeHandle { inner: handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTask {
        id: String,
        counter: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Task for CountingTask {
        fn id(&self) -> &str {
            &self.id
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> TaskFuture {
            Box::pin(async move {
                self.counter.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(AppError::Task(format!("{} failed on purpose", self.id)));
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn all_tasks_run_to_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(CountingTask { id: "a".into(), counter: counter.clone(), fail: false }),
            Box::new(CountingTask { id: "b".into(), counter: counter.clone(), fail: false }),
        ];
        let handle = spawn_tasks(tasks, shutdown);
        handle.join().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_cancels_shutdown_and_surfaces_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let tasks: Vec<Box<dyn Task>> = vec![Box::new(CountingTask { id: "failing".into(), counter, fail: true })];
        let handle = spawn_tasks(tasks, shutdown_clone);
        let result = handle.join().await;
        assert!(result.is_err());
        assert!(shutdown.is_cancelled());
    }
}
