//! Background pull timer.

use std::future::Future;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Something the poller can drive once per tick.
pub trait PollTarget: Send + Sync + 'static {
    fn poll_once(&self) -> impl Future<Output = ()> + Send;
}

/// Owner side of a running poll task.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal shutdown. A tick already running is allowed to finish; the
    /// loop exits before starting another.
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task calling `target.poll_once()` every `interval`.
///
/// The task holds only a weak reference; it exits on its own once the
/// target is dropped.
pub fn spawn_poller<T: PollTarget>(target: Weak<T>, interval: Duration) -> PollerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Sync poller shutting down");
                    return;
                }
                _ = timer.tick() => {
                    let Some(target) = target.upgrade() else {
                        debug!("Poll target dropped, poller exiting");
                        return;
                    };
                    target.poll_once().await;
                }
            }
        }
    });
    PollerHandle { shutdown, task }
}
