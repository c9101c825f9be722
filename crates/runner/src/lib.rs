//! Process runner for canopy binaries.
//!
//! Named processes run concurrently until one of them fails, a shutdown
//! signal (SIGINT/SIGTERM) arrives, or the shared cancellation token is
//! cancelled. Closers then run one at a time in registration order, so a
//! resource registered early (the routing fabric connection) is still
//! available while later-registered work winds down. The whole closer phase
//! is bounded by a timeout.
//!
//! ```no_run
//! use canopy_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("heartbeat", |token| async move {
//!             while !token.is_cancelled() {
//!                 tokio::time::sleep(Duration::from_secs(1)).await;
//!             }
//!             Ok(())
//!         })
//!         .with_closer("flush", || async { Ok(()) })
//!         .run_until_exit()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxedTask = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Long-running work; must return once its token is cancelled
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedTask + Send>;

/// Cleanup step run after every process has stopped
pub type Closer = Box<dyn FnOnce() -> BoxedTask + Send>;

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled by signal or token, or every process finished cleanly
    Stopped,
    /// A process failed or panicked; carries its name
    Failed(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Stopped => 0,
            RunOutcome::Failed(_) => 1,
        }
    }
}

pub struct Runner {
    processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    /// Upper bound for the whole closer phase (default 10s)
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share a token so callers can stop the runner or derive child tokens
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Skip installing SIGINT/SIGTERM handlers
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run to completion and exit the process with the outcome's code
    pub async fn run_until_exit(self) {
        let outcome = self.run().await;
        match &outcome {
            RunOutcome::Stopped => info!("application exiting normally"),
            RunOutcome::Failed(name) => error!(process = %name, "application exiting after process failure"),
        }
        std::process::exit(outcome.exit_code())
    }

    pub async fn run(self) -> RunOutcome {
        let token = self.cancellation_token;
        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut join_set = JoinSet::new();
        for (name, process) in self.processes {
            let process_token = token.clone();
            info!(process = %name, "starting process");
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        let mut outcome = RunOutcome::Stopped;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "process finished"),
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, error = %format!("{:#}", err), "process failed");
                        outcome = RunOutcome::Failed(name);
                    } else {
                        warn!(process = %name, error = %format!("{:#}", err), "process failed during shutdown");
                    }
                }
                Err(err) => {
                    error!(error = %err, "process panicked");
                    if !token.is_cancelled() {
                        outcome = RunOutcome::Failed("<panicked>".to_string());
                    }
                }
            }

            if outcome != RunOutcome::Stopped || token.is_cancelled() {
                break;
            }
        }

        token.cancel();
        // remaining processes observe the token and return on their own
        while let Some(joined) = join_set.join_next().await {
            if let Ok((name, result)) = joined {
                debug!(process = %name, ok = result.is_ok(), "process stopped");
            }
        }

        run_closers(self.closers, self.closer_timeout).await;
        outcome
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received SIGINT");
                ctrl_c_token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
                token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for SIGTERM"),
        }
    });
}

/// Run closers in order; one failing does not stop the rest
async fn run_closers(closers: Vec<(String, Closer)>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }
    info!(count = closers.len(), timeout_ms = timeout.as_millis(), "running closers");

    let all = async {
        for (name, closer) in closers {
            match closer().await {
                Ok(()) => debug!(closer = %name, "closer completed"),
                Err(err) => error!(closer = %name, error = %format!("{:#}", err), "closer failed"),
            }
        }
    };

    if tokio::time::timeout(timeout, all).await.is_err() {
        error!(timeout_ms = timeout.as_millis(), "closers timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn runner() -> Runner {
        Runner::new()
            .without_signal_handlers()
            .with_closer_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_cancellation_stops_processes_then_runs_closers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let run = runner()
            .with_cancellation_token(token.clone())
            .with_named_process("worker", move |token| async move {
                token.cancelled().await;
                a.lock().unwrap().push("worker stopped");
                Ok(())
            })
            .with_closer("first", move || async move {
                b.lock().unwrap().push("first");
                Ok(())
            })
            .with_closer("second", move || async move {
                c.lock().unwrap().push("second");
                Ok(())
            })
            .run();

        token.cancel();
        assert_eq!(run.await, RunOutcome::Stopped);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["worker stopped", "first", "second"]
        );
    }

    #[tokio::test]
    async fn test_failing_process_cancels_siblings() {
        let stopped = Arc::new(Mutex::new(false));
        let flag = stopped.clone();

        let outcome = runner()
            .with_named_process("sibling", move |token| async move {
                token.cancelled().await;
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .with_named_process("broken", |_| async { Err(anyhow::anyhow!("boom")) })
            .run()
            .await;

        assert_eq!(outcome, RunOutcome::Failed("broken".to_string()));
        assert_eq!(outcome.exit_code(), 1);
        assert!(*stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn test_failing_closer_does_not_skip_later_closers() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();

        let outcome = runner()
            .with_named_process("noop", |_| async { Ok(()) })
            .with_closer("bad", || async { Err(anyhow::anyhow!("nope")) })
            .with_closer("good", move || async move {
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .run()
            .await;

        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(*ran.lock().unwrap());
    }
}
