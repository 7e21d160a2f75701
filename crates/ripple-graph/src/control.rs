//! Cancellation and timeout control for impact queries.
//!
//! A [`QueryControl`] is passed to every analyzer operation. The timeout
//! covers the whole operation, across all of its store round-trips; a
//! cancelled or expired operation returns an error and no partial result.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{GraphError, GraphResult};

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Triggers cancellation of every operation holding the paired signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Optional timeout and cancellation signal for one analyzer operation.
#[derive(Debug, Clone, Default)]
pub struct QueryControl {
    timeout: Option<Duration>,
    cancel: Option<CancelSignal>,
}

impl QueryControl {
    /// No timeout, not cancellable.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Start the clock for one operation.
    pub(crate) fn start(&self) -> OperationScope<'_> {
        OperationScope {
            control: self,
            deadline: self.timeout.map(|t| Instant::now() + t),
        }
    }
}

/// A running operation: every store call goes through [`OperationScope::run`].
pub(crate) struct OperationScope<'a> {
    control: &'a QueryControl,
    deadline: Option<Instant>,
}

impl OperationScope<'_> {
    /// Run one store call under the operation's deadline and cancel signal.
    ///
    /// The store future is dropped on timeout or cancellation, which aborts
    /// the underlying query.
    pub(crate) async fn run<T, F>(&self, fut: F) -> GraphResult<T>
    where
        F: Future<Output = GraphResult<T>>,
    {
        self.check()?;
        let timed = async {
            match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(self.timeout_error()),
                },
                None => fut.await,
            }
        };
        match &self.control.cancel {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => Err(GraphError::QueryCancelled),
                result = timed => result,
            },
            None => timed.await,
        }
    }

    /// Fail fast between round-trips.
    pub(crate) fn check(&self) -> GraphResult<()> {
        if self.control.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(GraphError::QueryCancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.timeout_error());
            }
        }
        Ok(())
    }

    fn timeout_error(&self) -> GraphError {
        GraphError::QueryTimeout(self.control.timeout.unwrap_or_default())
    }
}
