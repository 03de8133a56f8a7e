//! Ordered hand-off of response payloads from the read loop to the reader.
//!
//! The frame handler appends raw payloads and finally sets a terminal state;
//! the consumer advances through them one at a time. Waiting never consumes
//! a payload, so a cancelled wait loses nothing.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::ClientError;

/// Why [`PayloadQueue::advance_until`] stopped without a payload.
#[derive(Debug)]
pub enum QueueError<C> {
    /// The cancellation future completed first, with this output.
    Cancelled(C),
    /// The queue was terminated with an error.
    Failed(ClientError),
}

#[derive(Debug)]
enum Terminal {
    Completed,
    Failed(ClientError),
}

#[derive(Debug, Default)]
struct State {
    buffers: VecDeque<Bytes>,
    terminal: Option<Terminal>,
    current: Option<Bytes>,
}

/// Unbounded FIFO of payload buffers with a terminal marker.
///
/// Safe for one producer and one logical consumer running concurrently.
#[derive(Debug, Default)]
pub struct PayloadQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl PayloadQueue {
    /// Create an empty, non-terminal queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload at the tail.
    ///
    /// Payloads appended after the terminal state are dropped.
    pub fn append(&self, payload: Bytes) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                #[cfg(feature = "tracing")]
                tracing::warn!(len = payload.len(), "payload appended after completion dropped");
                return;
            }
            state.buffers.push_back(payload);
        }
        self.notify.notify_one();
    }

    /// Mark the stream as finished successfully. No-op once terminal.
    pub fn set_completed(&self) {
        self.terminate(Terminal::Completed);
    }

    /// Mark the stream as failed. No-op once terminal.
    pub fn set_error(&self, err: ClientError) {
        self.terminate(Terminal::Failed(err));
    }

    /// Whether a terminal state has been set.
    pub fn is_terminal(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// The most recently dequeued payload.
    pub fn current(&self) -> Option<Bytes> {
        self.lock().current.clone()
    }

    /// Advance to the next payload, waiting if necessary.
    ///
    /// Returns `Ok(true)` with the payload available through
    /// [`current`](Self::current), `Ok(false)` once the queue completed and is
    /// drained, or the terminal error. If `token` fires first the wait ends
    /// with [`QueueError::Cancelled`] and nothing is consumed.
    pub async fn advance(&self, token: &CancellationToken) -> Result<bool, QueueError<()>> {
        self.advance_until(token.cancelled()).await
    }

    /// Like [`advance`](Self::advance), but aborts when `cancel` completes.
    ///
    /// Queued payloads and the terminal state always take precedence over a
    /// cancellation that is already complete.
    pub async fn advance_until<F>(&self, cancel: F) -> Result<bool, QueueError<F::Output>>
    where
        F: Future,
    {
        tokio::pin!(cancel);
        loop {
            if let Some(outcome) = self.try_advance() {
                return outcome.map_err(QueueError::Failed);
            }

            tokio::select! {
                biased;
                _ = self.notify.notified() => {}
                output = &mut cancel => {
                    // A payload may have landed while we were being cancelled.
                    if let Some(outcome) = self.try_advance() {
                        return outcome.map_err(QueueError::Failed);
                    }
                    return Err(QueueError::Cancelled(output));
                }
            }
        }
    }

    fn try_advance(&self) -> Option<Result<bool, ClientError>> {
        let mut state = self.lock();
        if let Some(payload) = state.buffers.pop_front() {
            state.current = Some(payload);
            return Some(Ok(true));
        }
        match &state.terminal {
            Some(Terminal::Completed) => Some(Ok(false)),
            Some(Terminal::Failed(err)) => Some(Err(err.clone())),
            None => None,
        }
    }

    fn terminate(&self, terminal: Terminal) {
        {
            let mut state = self.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal);
        }
        self.notify.notify_one();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_then_completion() {
        let queue = PayloadQueue::new();
        let token = CancellationToken::new();
        queue.append(Bytes::from_static(b"a"));
        queue.append(Bytes::from_static(b"b"));
        queue.set_completed();

        assert!(queue.advance(&token).await.unwrap());
        assert_eq!(queue.current().unwrap(), "a");
        assert!(queue.advance(&token).await.unwrap());
        assert_eq!(queue.current().unwrap(), "b");
        assert!(!queue.advance(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_read_is_idempotent() {
        let queue = PayloadQueue::new();
        let token = CancellationToken::new();
        queue.set_completed();

        for _ in 0..3 {
            assert!(!queue.advance(&token).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_terminal_error_is_repeated() {
        let queue = PayloadQueue::new();
        let token = CancellationToken::new();
        queue.append(Bytes::from_static(b"last"));
        queue.set_error(ClientError::Transport("eof".into()));

        assert!(queue.advance(&token).await.unwrap());
        for _ in 0..2 {
            match queue.advance(&token).await {
                Err(QueueError::Failed(ClientError::Transport(msg))) => assert_eq!(msg, "eof"),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_state_is_set_once() {
        let queue = PayloadQueue::new();
        let token = CancellationToken::new();
        queue.set_completed();
        queue.set_error(ClientError::Cancelled);
        queue.append(Bytes::from_static(b"late"));

        assert!(!queue.advance(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_advance_waits_for_producer() {
        let queue = Arc::new(PayloadQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                let first = queue.advance(&token).await.unwrap();
                (first, queue.current())
            })
        };

        tokio::task::yield_now().await;
        queue.append(Bytes::from_static(b"late"));

        let (advanced, current) = consumer.await.unwrap();
        assert!(advanced);
        assert_eq!(current.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_cancelled_wait_keeps_payload() {
        let queue = Arc::new(PayloadQueue::new());
        let token = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.advance(&token).await })
        };
        tokio::task::yield_now().await;
        token.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(QueueError::Cancelled(()))));

        queue.append(Bytes::from_static(b"kept"));
        let fresh = CancellationToken::new();
        assert!(queue.advance(&fresh).await.unwrap());
        assert_eq!(queue.current().unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_queued_payload_beats_fired_cancellation() {
        let queue = PayloadQueue::new();
        let token = CancellationToken::new();
        token.cancel();
        queue.append(Bytes::from_static(b"ready"));

        assert!(queue.advance(&token).await.unwrap());
        assert!(matches!(queue.advance(&token).await, Err(QueueError::Cancelled(()))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_until_reports_cancel_output() {
        let queue = PayloadQueue::new();
        let result = queue
            .advance_until(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                "timer"
            })
            .await;

        assert!(matches!(result, Err(QueueError::Cancelled("timer"))));
    }
}
