use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// At most one scheduled proactive refresh per app key.
#[derive(Debug, Default)]
pub struct PendingTimers {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PendingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, cancelling any timer already set for
    /// `app_key`. Cancel and replace happen under one lock.
    pub fn schedule<F>(&self, app_key: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let mut handles = self.lock();
        if let Some(previous) = handles.insert(app_key.to_owned(), handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self, app_key: &str) -> bool {
        match self.lock().remove(app_key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, app_key: &str) -> bool {
        self.lock()
            .get(app_key)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PendingTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
