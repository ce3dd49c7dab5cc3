use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry for fire-and-forget jobs (remediation sweeps, probe fans). Spawned
/// tasks are tracked so shutdown can abort and drain them instead of leaving
/// them dangling past the server.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named detached task. Completion is logged; panics surface as a
    /// warning instead of being silently dropped.
    pub fn spawn<F>(&self, name: &str, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            fut.await;
            debug!(task = %task_name, "background task finished");
        });

        let mut tasks = self.inner.lock().expect("background registry poisoned");
        tasks.retain(|(_, handle)| !handle.is_finished());
        tasks.push((name.to_string(), handle));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("background registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every tracked task and wait for each to wind down.
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut guard = self.inner.lock().expect("background registry poisoned");
            guard.drain(..).collect()
        };

        if tasks.is_empty() {
            return;
        }
        info!(count = tasks.len(), "draining background tasks");
        for (name, handle) in tasks {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(task = %name, "background task panicked: {e}"),
            }
        }
    }
}
