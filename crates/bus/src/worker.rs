//! Worker lifecycle: the outer restart loop and signal handling.
//!
//! Every pipeline worker is an OS process with the same outer shape:
//! connect to the broker, run the main loop, and on any fault disconnect,
//! log, sleep [`RESTART_PERIOD`] and start over. SIGTERM/SIGINT/SIGHUP end
//! the process after a clean teardown. Nothing above this loop catches;
//! if the process dies, its manager restarts it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::BusError;

/// Sleep between restarts of a faulted worker.
pub const RESTART_PERIOD: Duration = Duration::from_secs(10);

/// A long-running pipeline worker.
#[async_trait]
pub trait BusWorker: Send {
    /// Human-readable name, used in logs and heartbeats.
    fn name(&self) -> &str;

    /// One full lifetime: set up adapters, run the consume/monitor loop.
    /// Returning `Err` means the connection (or something equally fatal)
    /// broke and the worker should be restarted after a pause; `Ok` is a
    /// deliberate clean exit.
    async fn run(&mut self) -> Result<(), BusError>;
}

/// Drive a worker forever, restarting on faults, until a termination
/// signal arrives.
pub async fn run_with_restarts<W: BusWorker>(worker: &mut W) {
    info!(worker = %worker.name(), "starting");
    loop {
        tokio::select! {
            result = worker.run() => match result {
                Ok(()) => {
                    info!(worker = %worker.name(), "exited cleanly");
                    break;
                }
                Err(e) => {
                    error!(
                        worker = %worker.name(),
                        error = %e,
                        restart_in = ?RESTART_PERIOD,
                        "worker faulted"
                    );
                    tokio::time::sleep(RESTART_PERIOD).await;
                }
            },
            _ = shutdown_signal() => {
                info!(worker = %worker.name(), "termination signal received, shutting down");
                break;
            }
        }
    }
}

/// Wait for SIGTERM, SIGINT or SIGHUP (Ctrl+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Worker that fails `failures` times and then exits cleanly.
    struct FlakyWorker {
        failures: u32,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BusWorker for FlakyWorker {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&mut self) -> Result<(), BusError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                Err(BusError::Transport("synthetic fault".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_until_clean_exit() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut worker = FlakyWorker {
            failures: 2,
            runs: runs.clone(),
        };
        // Paused time makes the RESTART_PERIOD sleeps instantaneous.
        run_with_restarts(&mut worker).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
