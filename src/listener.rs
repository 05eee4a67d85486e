use std::future::Future;

use tokio::task::JoinHandle;

/// ListenerHandle
///
/// Owns a long-lived background task (auth events, category changes, token refresh,
/// database notifications). Dropping the handle aborts the task, so a listener can never
/// outlive the component that started it.
#[derive(Debug)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Spawns `future` on the current Tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(future)),
        }
    }

    /// True once the task has returned or been aborted.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Aborts the task now.
    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
