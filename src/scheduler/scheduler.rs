use crate::scheduler::Clock;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// A periodic maintenance job.
#[async_trait::async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self);
}

/// Decides whether scheduled tasks run on this member at all. Only one member of the group
/// should run them at a time.
pub trait SchedulerGate: Send + Sync {
    fn is_scheduler_enabled(&self) -> bool;
}

/// Scheduler runs each task on its own tokio task, `interval` after the previous run finished.
/// A run never overlaps the next one.
pub struct Scheduler {
    logger: slog::Logger,
    gate: Arc<dyn SchedulerGate>,
    running: Mutex<Vec<RunningTask>>,
}

struct RunningTask {
    // Dropping it stops the task once its current run is over.
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(logger: slog::Logger, gate: Arc<dyn SchedulerGate>) -> Self {
        Scheduler {
            logger,
            gate,
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn schedule<C: Clock>(&self, task: Arc<dyn ScheduledTask>, interval: Duration, clock: C) {
        let (stop, stopped) = oneshot::channel();
        let logger = self.logger.new(slog::o!("Task" => task.name()));
        let join = tokio::spawn(run_periodically(
            logger,
            task,
            interval,
            self.gate.clone(),
            clock,
            stopped,
        ));
        self.running
            .lock()
            .expect("Scheduler mutex guard poison")
            .push(RunningTask { stop, join });
    }

    /// Stops every task, waiting for runs in progress to finish.
    pub async fn stop(&self) {
        let running = std::mem::take(&mut *self.running.lock().expect("Scheduler mutex guard poison"));
        for RunningTask { stop, join } in running {
            drop(stop);
            if let Err(e) = join.await {
                slog::error!(self.logger, "Scheduled task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_periodically<C: Clock>(
    logger: slog::Logger,
    task: Arc<dyn ScheduledTask>,
    interval: Duration,
    gate: Arc<dyn SchedulerGate>,
    mut clock: C,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        let next_run = clock.now() + interval;
        tokio::select! {
            // Closed or not, either way the scheduler is done with us.
            _ = &mut stopped => return,
            _ = clock.sleep_until(next_run) => {}
        }

        if gate.is_scheduler_enabled() {
            slog::debug!(logger, "Running");
            task.run().await;
        }
    }
}
