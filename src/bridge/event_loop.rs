//! Single-threaded event loop on a dedicated, named thread.
//!
//! Used twice: the host settles completed calls on one, and the script runtime
//! runs all of its work on another, the way a script engine would. Each loop
//! is a current-thread Tokio runtime, so it can also drive timers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::error::BridgeError;

type Job = Box<dyn FnOnce() + Send>;

type InitSignalChannel = (
    std_mpsc::Sender<Result<(), String>>,
    std_mpsc::Receiver<Result<(), String>>,
);

enum LoopCommand {
    Run(Job),
    After(Duration, Job),
}

/// Handle to a loop thread. Dropping the last handle stops the thread once
/// queued work has run.
pub struct EventLoop {
    name: String,
    tx: mpsc::UnboundedSender<LoopCommand>,
}

impl EventLoop {
    pub fn spawn(name: &str) -> Result<Self, BridgeError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<LoopCommand>();
        let (init_tx, init_rx): InitSignalChannel = std_mpsc::channel();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let tokio_rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => {
                        let _ = init_tx.send(Ok(()));
                        rt
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err.to_string()));
                        return;
                    }
                };

                tokio_rt.block_on(async move {
                    while let Some(command) = rx.recv().await {
                        match command {
                            LoopCommand::Run(job) => run_job(job),
                            LoopCommand::After(delay, job) => {
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    run_job(job);
                                });
                            }
                        }
                    }
                });
            })
            .map_err(|e| BridgeError::Runtime(format!("Failed to spawn {}: {}", name, e)))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name: name.to_string(),
                tx,
            }),
            Ok(Err(err)) => Err(BridgeError::Runtime(err)),
            Err(_) => Err(BridgeError::Runtime(format!(
                "{} exited during startup",
                name
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `job` on the loop thread.
    ///
    /// If the thread is gone the job runs inline so no promise is left hanging.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(mpsc::error::SendError(command)) = self.tx.send(LoopCommand::Run(Box::new(job)))
        {
            tracing::warn!(
                target: "jsbridge::event_loop",
                thread = %self.name,
                "Loop thread is gone, running job inline"
            );
            if let LoopCommand::Run(job) = command {
                run_job(job);
            }
        }
    }

    /// Run `job` on the loop thread after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self
            .tx
            .send(LoopCommand::After(delay, Box::new(job)))
            .is_err()
        {
            tracing::warn!(
                target: "jsbridge::event_loop",
                thread = %self.name,
                "Loop thread is gone, dropping scheduled job"
            );
        }
    }
}

fn run_job(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(
            target: "jsbridge::event_loop",
            "Job panicked: {}",
            BridgeError::from_panic(payload)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_jobs_run_on_named_thread() {
        let event_loop = EventLoop::spawn("jsbridge-test-loop").unwrap();
        assert_eq!(event_loop.name(), "jsbridge-test-loop");
        let (tx, rx) = channel();
        event_loop.execute(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("jsbridge-test-loop"));
    }

    #[test]
    fn test_jobs_run_in_order() {
        let event_loop = EventLoop::spawn("jsbridge-test-loop").unwrap();
        let (tx, rx) = channel();
        for i in 0..5 {
            let tx = tx.clone();
            event_loop.execute(move || tx.send(i).unwrap());
        }
        let seen: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_panicking_job_does_not_stop_thread() {
        let event_loop = EventLoop::spawn("jsbridge-test-loop").unwrap();
        event_loop.execute(|| panic!("bad job"));
        let (tx, rx) = channel();
        event_loop.execute(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_scheduled_job() {
        let event_loop = EventLoop::spawn("jsbridge-test-loop").unwrap();
        let (tx, rx) = channel();
        event_loop.schedule(Duration::from_millis(20), move || tx.send("late").unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("late"));
    }
}
