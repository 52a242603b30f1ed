//! Cancellation & error bus.
//!
//! A single [`StopSignal`] and a single [`ErrorSink`] are shared by every
//! long-lived worker in the daemon. A fault in any worker sets the stop
//! signal and publishes to the sink; every other worker observes the stop
//! signal on its next wait or loop iteration and shuts down.
//!
//! Merges two previously separate concerns into one primitive: a task
//! supervisor that joins worker handles and maps their errors, and a
//! cooperative `stop` event paired with an error queue that every worker
//! polls.

use std::{fmt, future::Future, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors internal to the bus itself. Distinct from the errors *carried by*
/// the bus, which are plain [`ErrorReport`]s.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("error sink is closed")]
    SinkClosed,
}

/// A latch: initially clear, once set remains set forever.
///
/// Thin wrapper around [`CancellationToken`] so the rest of the crate talks
/// in terms of "stop" rather than tokio's more general cancellation
/// vocabulary.
#[derive(Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Sets the signal. Idempotent.
    pub fn set(&self) {
        self.token.cancel();
    }

    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks (asynchronously) until the signal is set.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Blocks until the signal is set or `timeout` elapses, whichever comes
    /// first. Returns `true` if the signal was observed set.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Severity/category of an error published to the [`ErrorSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Authentication,
    Network,
    MediaPlayer,
    KaraFolder,
    Protocol,
    Internal,
}

/// A single report published to the [`ErrorSink`].
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub backtrace: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: None,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

/// Bounded multi-producer / single-consumer channel of [`ErrorReport`]s.
///
/// `publish` never blocks: if the channel is full (meaning an error is
/// already queued and awaiting triage), later errors are dropped, matching
/// "first error wins".
#[derive(Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<ErrorReport>,
}

pub struct ErrorDrain {
    rx: mpsc::Receiver<ErrorReport>,
}

impl ErrorSink {
    fn channel() -> (Self, ErrorDrain) {
        let (tx, rx) = mpsc::channel(8);
        (Self { tx }, ErrorDrain { rx })
    }

    pub fn publish(&self, report: ErrorReport) {
        // Non-blocking by construction: a full or closed channel just drops
        // the report, which is fine since the first error already won.
        let _ = self.tx.try_send(report);
    }
}

impl ErrorDrain {
    /// Blocking drain: waits for the first published error, if any.
    pub async fn drain(&mut self) -> Option<ErrorReport> {
        self.rx.recv().await
    }
}

/// Shared handle to the cancellation & error bus, cloned into every worker.
#[derive(Clone)]
pub struct Bus {
    pub stop: StopSignal,
    pub errors: ErrorSink,
}

impl Bus {
    /// Creates a new bus along with the drain end, which the supervisor
    /// keeps to re-raise the first fatal error after teardown.
    pub fn new() -> (Self, ErrorDrain) {
        let stop = StopSignal::new();
        let (errors, drain) = ErrorSink::channel();
        (Self { stop, errors }, drain)
    }

    /// Spawns `fut` as a supervised task: on `Err`, publishes `kind` +
    /// the error's `Display` to the sink and sets the stop signal before the
    /// task returns. Ordering guarantee: by the time this function's caller
    /// observes the stop signal set (via `wait`), the error is already
    /// queryable from the drain.
    pub fn spawn_supervised<F, E>(
        &self,
        kind: ErrorKind,
        fut: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            if let Err(error) = fut.await {
                bus.errors
                    .publish(ErrorReport::new(kind, error.to_string()));
                bus.stop.set();
            }
        })
    }

    /// Runs `task` every `interval` until the stop signal is set.
    /// Cancellation is prompt: no new instance of `task` starts once the
    /// stop signal has been observed, and an in-flight instance is awaited
    /// before this function returns.
    pub fn spawn_periodic<F, Fut, E>(
        &self,
        kind: ErrorKind,
        interval: Duration,
        mut task: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send,
        E: fmt::Display + Send + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = bus.stop.wait() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                if bus.stop.is_set() {
                    break;
                }

                if let Err(error) = task().await {
                    bus.errors
                        .publish(ErrorReport::new(kind, error.to_string()));
                    bus.stop.set();
                    break;
                }
            }
        })
    }

    /// Runs `task` once after `delay`, unless the stop signal is set first.
    /// Used for the WebSocket reconnection backoff.
    pub fn schedule_once<F, Fut, E>(
        &self,
        kind: ErrorKind,
        delay: Duration,
        task: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send,
        E: fmt::Display + Send + 'static,
    {
        let bus = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = bus.stop.wait() => {}
                () = tokio::time::sleep(delay) => {
                    if !bus.stop.is_set() {
                        if let Err(error) = task().await {
                            bus.errors
                                .publish(ErrorReport::new(kind, error.to_string()));
                            bus.stop.set();
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_signal_is_idempotent_and_observable() {
        let signal = StopSignal::new();
        assert!(!signal.is_set());
        signal.set();
        signal.set();
        assert!(signal.is_set());
        signal.wait().await;
    }

    #[tokio::test]
    async fn wait_with_timeout_returns_false_when_not_set() {
        let signal = StopSignal::new();
        let observed = signal.wait_with_timeout(Duration::from_millis(10)).await;
        assert!(!observed);
    }

    #[tokio::test]
    async fn supervised_failure_sets_stop_and_publishes_error() {
        let (bus, mut drain) = Bus::new();

        bus.spawn_supervised(ErrorKind::Internal, async move {
            Err::<(), _>("boom")
        });

        bus.stop.wait().await;
        let report = drain.drain().await.expect("an error should be published");
        assert_eq!(report.kind, ErrorKind::Internal);
        assert_eq!(report.message, "boom");
    }

    #[tokio::test]
    async fn first_error_wins_when_sink_is_full() {
        let (bus, mut drain) = Bus::new();

        for i in 0..16 {
            bus.errors
                .publish(ErrorReport::new(ErrorKind::Internal, format!("{i}")));
        }

        let first = drain.drain().await.unwrap();
        assert_eq!(first.message, "0");
    }
}
