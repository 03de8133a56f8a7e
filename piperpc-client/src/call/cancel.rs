//! Merging the cancellation sources of a read.

use tokio_util::sync::CancellationToken;

use super::deadline::Deadline;
use crate::ClientError;

/// Which of the merged sources ended a wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelSource {
    /// The token passed for one read.
    Read,
    /// The call's own token.
    Call,
    /// The call deadline.
    Deadline,
}

/// Wait for the first of the read token, the call token and the deadline.
///
/// When several have already fired the deadline is reported first, then the
/// call token, so the outcome does not depend on polling order.
pub async fn first_cancelled(
    read: &CancellationToken,
    call: &CancellationToken,
    deadline: &Deadline,
) -> CancelSource {
    tokio::select! {
        biased;
        _ = deadline.cancelled() => CancelSource::Deadline,
        _ = call.cancelled() => CancelSource::Call,
        _ = read.cancelled() => CancelSource::Read,
    }
}

/// Map an aborted wait to the error the caller sees.
///
/// Only "timed out" and "cancelled" are meaningful to a caller: an expired
/// deadline always wins, whichever source actually ended the wait.
pub fn classify(source: CancelSource, deadline: &Deadline) -> ClientError {
    if source == CancelSource::Deadline || deadline.is_expired() {
        ClientError::DeadlineExceeded
    } else {
        ClientError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn expired() -> Deadline {
        Deadline::new(Some(SystemTime::now() - Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_deadline_reported_before_other_sources() {
        let read = CancellationToken::new();
        let call = CancellationToken::new();
        read.cancel();
        call.cancel();

        let deadline = expired();
        let source = first_cancelled(&read, &call, &deadline).await;
        assert_eq!(source, CancelSource::Deadline);
        assert!(classify(source, &deadline).is_deadline_exceeded());
    }

    #[tokio::test]
    async fn test_call_token_reported_before_read_token() {
        let read = CancellationToken::new();
        let call = CancellationToken::new();
        read.cancel();
        call.cancel();

        let deadline = Deadline::unset();
        let source = first_cancelled(&read, &call, &deadline).await;
        assert_eq!(source, CancelSource::Call);
        assert!(classify(source, &deadline).is_cancelled());
    }

    #[tokio::test]
    async fn test_read_token_alone() {
        let read = CancellationToken::new();
        let call = CancellationToken::new();
        read.cancel();

        let deadline = Deadline::unset();
        let source = first_cancelled(&read, &call, &deadline).await;
        assert_eq!(source, CancelSource::Read);
        assert!(classify(source, &deadline).is_cancelled());
    }

    #[test]
    fn test_expired_deadline_overrides_explicit_source() {
        let deadline = expired();
        assert!(classify(CancelSource::Read, &deadline).is_deadline_exceeded());
        assert!(classify(CancelSource::Call, &deadline).is_deadline_exceeded());
    }
}
