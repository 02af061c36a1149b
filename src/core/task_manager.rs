use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Spawn a task on the runtime
pub fn spawn_task<F>(future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::task::spawn(future)
}

/// Spawn a blocking task on the runtime's blocking pool
pub fn spawn_blocking_task<F, R>(func: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(func)
}

/// What a periodic tick wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    Stop,
}

/// A fixed-period task that can be stopped deterministically.
///
/// The first tick fires one period after spawning. Ticks never overlap: a slow
/// tick delays the next one instead of queueing a burst. [`PeriodicTask::stop`]
/// lets a tick that is already running finish and returns once the task has
/// exited, so nothing the task does can happen after it returns. Dropping the
/// handle without calling `stop` also ends the task at its next wake-up.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stop_tx: flume::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickFlow> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);

        let task_name = name.clone();
        let handle = spawn_task(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::debug!("Periodic task '{task_name}' started ({} ms)", period.as_millis());

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv_async() => break,
                    _ = interval.tick() => {
                        if tick().await == TickFlow::Stop {
                            log::debug!("Periodic task '{task_name}' ended itself");
                            break;
                        }
                    }
                }
            }
            log::debug!("Periodic task '{task_name}' exited");
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        // A task that ended itself has already dropped its receiver
        let _ = self.stop_tx.try_send(());
        if let Err(err) = self.handle.await {
            log::warn!("Periodic task '{}' did not exit cleanly: {err}", self.name);
        }
    }
}
