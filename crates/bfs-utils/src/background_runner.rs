use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns background tokio tasks that stop on a shared shutdown signal.
pub struct BackgroundRunner {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundRunner {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(f(rx)));
    }

    /// Run `f` every `interval` until shutdown. A tick that is still running
    /// when the next one is due delays it rather than overlapping it.
    pub fn spawn_periodic<F, Fut>(&mut self, interval: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.shutdown_tx.subscribe();
        self.handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => { f().await; }
                    _ = rx.changed() => { break; }
                }
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for BackgroundRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_runs_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut runner = BackgroundRunner::new();
        let c = counter.clone();
        runner.spawn_periodic(Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(runner.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        runner.shutdown().await;
        let after_shutdown = counter.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_spawn_observes_signal() {
        let mut runner = BackgroundRunner::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        runner.spawn(move |mut rx| async move {
            let _ = rx.changed().await;
            let _ = done_tx.send(*rx.borrow());
        });
        runner.shutdown().await;
        assert!(done_rx.await.unwrap());
    }
}
