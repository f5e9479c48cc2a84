//! Task-DAG executor.
//!
//! Tasks are connected by bounded `tokio::sync::mpsc` channels and
//! cooperate through a shared [`CancellationToken`]: closing a task's
//! output channel is the canonical downstream termination signal, and
//! cancelling the token is the canonical cross-task abort signal. A task
//! that fails writes to a first-write-wins [`ErrorSlot`] before cancelling.

pub mod groupby;
pub mod having;
pub mod join;
pub mod limit;
pub mod mutation;
pub mod orderby;
pub mod projection;
pub mod sink;
pub mod source;
pub mod where_task;

use crate::datasource::Message;
use crate::error::{EngineError, ExecError};
use async_trait::async_trait;
use std::sync::OnceLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default bounded channel depth between adjacent tasks.
pub const CHANNEL_CAPACITY: usize = 100;

pub type MsgSender = mpsc::Sender<Message>;
pub type MsgReceiver = mpsc::Receiver<Message>;

pub fn channel() -> (MsgSender, MsgReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// First-write-wins shared error cell. Modeled on a
/// `OnceLock`, whose `set` already rejects all writes after the first.
#[derive(Clone, Default)]
pub struct ErrorSlot(Arc<OnceLock<EngineError>>);

impl ErrorSlot {
    pub fn new() -> Self {
        ErrorSlot(Arc::new(OnceLock::new()))
    }

    /// Records `err` if no error has been recorded yet; later calls are
    /// silently dropped (first-write-wins).
    pub fn record(&self, err: EngineError) {
        let _ = self.0.set(err);
    }

    pub fn take(&self) -> Option<&EngineError> {
        self.0.get()
    }
}

/// A unit of execution in the DAG. `run` drives the task
/// to completion or cancellation and is the sole panic boundary: callers
/// drive it via [`spawn_task`] and observe panics through the returned
/// `JoinHandle`, the same async-task idiom `client_connection.rs` uses
/// rather than a manual `catch_unwind`.
#[async_trait]
pub trait Task: Send {
    async fn run(&mut self) -> Result<(), EngineError>;
}

/// Spawns `task`, recording any `Err` it returns into `errors` and
/// cancelling `cancel` so siblings observe the failure at their next
/// suspension point.
pub fn spawn_task<T>(mut task: T, cancel: CancellationToken, errors: ErrorSlot) -> JoinHandle<()>
where
    T: Task + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.run().await {
            errors.record(e);
            cancel.cancel();
        }
    })
}

/// Awaits every task handle, converting a panic observed through any one of
/// them into `ExecError::Internal`.
pub async fn join_all(handles: Vec<JoinHandle<()>>) -> Result<(), EngineError> {
    for handle in handles {
        if let Err(join_err) = handle.await {
            if join_err.is_panic() {
                return Err(ExecError::Internal(format!("task panicked: {join_err}")).into());
            }
        }
    }
    Ok(())
}

/// Sends `msg` on `out`, returning `false` if the channel is closed or the
/// cancellation token fires first — the two conditions every task treats as
/// "stop producing output".
pub async fn send_or_cancel(out: &MsgSender, msg: Message, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = out.send(msg) => res.is_ok(),
    }
}

/// Receives the next message, returning `None` on either channel close or
/// cancellation.
pub async fn recv_or_cancel(input: &mut MsgReceiver, cancel: &CancellationToken) -> Option<Message> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        msg = input.recv() => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl Task for Failing {
        async fn run(&mut self) -> Result<(), EngineError> {
            Err(ExecError::Internal("boom".into()).into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Task for Panicking {
        async fn run(&mut self) -> Result<(), EngineError> {
            panic!("kaboom")
        }
    }

    #[tokio::test]
    async fn failing_task_records_error_and_cancels() {
        let cancel = CancellationToken::new();
        let errors = ErrorSlot::new();
        let handle = spawn_task(Failing, cancel.clone(), errors.clone());
        handle.await.unwrap();
        assert!(errors.take().is_some());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn panicking_task_surfaces_as_internal_error_from_join_all() {
        let cancel = CancellationToken::new();
        let errors = ErrorSlot::new();
        let handle = tokio::spawn(async move {
            let mut t = Panicking;
            let _ = t.run().await;
        });
        let _ = (cancel, errors);
        let result = join_all(vec![handle]).await;
        assert!(result.is_err());
    }
}
