//! Background task lifecycle

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};

/// Long-running tasks sharing one stop signal
pub struct BackgroundTasks {
    stop: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            handles: Vec::new(),
        }
    }

    /// Receiver to hand to a task; it flips to `true` on shutdown
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal stop and wait for every task, sharing one deadline.
    /// Tasks still running at the deadline are aborted. Returns how many
    /// stopped cleanly.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.stop.send_replace(true);
        let deadline = Instant::now() + timeout;
        let mut stopped = 0;

        for (name, mut handle) in self.handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    stopped += 1;
                }
                Ok(Err(e)) => {
                    error!("Background task {} ended abnormally: {}", name, e);
                }
                Err(_) => {
                    warn!("Background task {} did not stop within {:?}, aborting", name, timeout);
                    handle.abort();
                }
            }
        }

        info!("Background tasks shut down");
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_stops_cooperative_tasks() {
        let mut tasks = BackgroundTasks::new();
        for name in ["first", "second"] {
            let mut stop = tasks.stop_signal();
            tasks.push(
                name,
                tokio::spawn(async move {
                    while !*stop.borrow() {
                        if stop.changed().await.is_err() {
                            break;
                        }
                    }
                }),
            );
        }

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks.shutdown(Duration::from_secs(1)).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_stuck_task() {
        let mut tasks = BackgroundTasks::new();
        tasks.push("stuck", tokio::spawn(std::future::pending::<()>()));

        assert_eq!(tasks.shutdown(Duration::from_secs(5)).await, 0);
    }
}
