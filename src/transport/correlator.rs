//! Completion handles for confirmed requests.
//!
//! The engine keeps the [`Completer`] of every outstanding request; the
//! caller holds the matching [`ServiceFuture`]. The outcome is delivered
//! exactly once, to whichever of `await`, [`ServiceFuture::blocking_get`]
//! or an [`on_complete`](ServiceFuture::on_complete) callback asks for it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::sync::mpsc;

use super::engine::Command;
use crate::service::{AbortReason, ConfirmedServiceAck, ErrorClass, ErrorCode, RejectReason};

/// Outcome of a confirmed request. `Ok(None)` is a SimpleACK.
pub type RequestResult = Result<Option<ConfirmedServiceAck>, RequestError>;

/// Failure outcome of a confirmed request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("error response: class {class}, code {code}")]
    Error { class: ErrorClass, code: ErrorCode },
    #[error("request rejected: {0}")]
    Reject(RejectReason),
    #[error("request aborted: {reason} (from server: {from_server})")]
    Abort {
        reason: AbortReason,
        from_server: bool,
    },
    /// Every retry went unanswered, or a segmented response stalled.
    #[error("no response from peer")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
}

/// A bounded wait ended before the request completed. The request itself
/// is still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait elapsed before the request completed")]
pub struct WaitElapsed;

/// Engine-wide identifier of one confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Callback = Box<dyn FnOnce(RequestResult) + Send>;

#[derive(Default)]
struct Slot {
    done: bool,
    outcome: Option<RequestResult>,
    waker: Option<Waker>,
    callback: Option<Callback>,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome unless one was stored before. Returns whether this
    /// call completed the request.
    fn complete(&self, outcome: RequestResult) -> bool {
        let mut slot = self.lock();
        if slot.done {
            return false;
        }
        slot.done = true;
        if let Some(callback) = slot.callback.take() {
            drop(slot);
            callback(outcome);
            return true;
        }
        slot.outcome = Some(outcome);
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
        self.ready.notify_all();
        true
    }
}

/// Engine side of a [`ServiceFuture`]. Dropping it without completing
/// delivers [`RequestError::Cancelled`].
pub(crate) struct Completer {
    shared: Arc<Shared>,
}

impl Completer {
    pub(crate) fn complete(self, outcome: RequestResult) {
        self.shared.complete(outcome);
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.shared.complete(Err(RequestError::Cancelled));
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

pub(crate) fn channel(
    id: RequestId,
    commands: mpsc::UnboundedSender<Command>,
) -> (Completer, ServiceFuture) {
    let shared = Arc::new(Shared::default());
    let completer = Completer {
        shared: Arc::clone(&shared),
    };
    let future = ServiceFuture {
        id,
        shared,
        commands,
    };
    (completer, future)
}

/// Handle to the outcome of a confirmed request.
///
/// Await it in async code, or use [`blocking_get`](Self::blocking_get) from
/// a thread outside the runtime. Dropping the handle does not cancel the
/// request; use [`cancel`](Self::cancel).
pub struct ServiceFuture {
    id: RequestId,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ServiceFuture {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// True once the outcome is known.
    pub fn is_complete(&self) -> bool {
        self.shared.lock().done
    }

    /// Block the calling thread until the request completes. Must not be
    /// called from inside an async task.
    pub fn blocking_get(self) -> RequestResult {
        let mut slot = self.shared.lock();
        while !slot.done {
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slot.outcome.take().unwrap_or(Err(RequestError::Cancelled))
    }

    /// Like [`blocking_get`](Self::blocking_get) but gives up after
    /// `timeout`. The handle stays usable after [`WaitElapsed`].
    pub fn blocking_get_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<RequestResult, WaitElapsed> {
        let slot = self.shared.lock();
        let (mut slot, result) = self
            .shared
            .ready
            .wait_timeout_while(slot, timeout, |slot| !slot.done)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return Err(WaitElapsed);
        }
        Ok(slot.outcome.take().unwrap_or(Err(RequestError::Cancelled)))
    }

    /// Await the outcome for at most `timeout`. The handle stays usable
    /// after [`WaitElapsed`].
    pub async fn get_timeout(&mut self, timeout: Duration) -> Result<RequestResult, WaitElapsed> {
        tokio::time::timeout(timeout, self).await.map_err(|_| WaitElapsed)
    }

    /// Give up on the request. Has no effect once the outcome is known;
    /// otherwise the outcome becomes [`RequestError::Cancelled`] and the
    /// engine forgets the request.
    pub fn cancel(&self) {
        if self.shared.complete(Err(RequestError::Cancelled)) {
            // the engine may already be gone, the outcome is settled either way
            let _ = self.commands.send(Command::Cancel(self.id));
        }
    }

    /// Run `callback` with the outcome. It runs immediately when the request
    /// already completed, otherwise on the engine task when it does, so it
    /// must not block.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(RequestResult) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.shared.lock();
            if !slot.done {
                slot.callback = Some(Box::new(callback));
                return;
            }
            slot.outcome.take()
        };
        if let Some(outcome) = outcome {
            callback(outcome);
        }
    }
}

impl Future for ServiceFuture {
    type Output = RequestResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.lock();
        if slot.done {
            return Poll::Ready(slot.outcome.take().unwrap_or(Err(RequestError::Cancelled)));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl fmt::Debug for ServiceFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFuture")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ConfirmedServiceChoice;
    use bytes::Bytes;
    use std::sync::mpsc as std_mpsc;

    fn pair() -> (Completer, ServiceFuture, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (completer, future) = channel(RequestId(1), tx);
        (completer, future, rx)
    }

    fn ack() -> RequestResult {
        Ok(Some(ConfirmedServiceAck::Other {
            service_choice: ConfirmedServiceChoice::ReadProperty,
            data: Bytes::from_static(&[0x01]),
        }))
    }

    #[tokio::test]
    async fn test_await_outcome() {
        let (completer, future, _rx) = pair();
        completer.complete(ack());
        assert_eq!(future.await, ack());
    }

    #[test]
    fn test_poll_wakes_on_completion() {
        let (completer, future, _rx) = pair();
        let mut task = tokio_test::task::spawn(future);
        tokio_test::assert_pending!(task.poll());

        completer.complete(Err(RequestError::Timeout));
        assert!(task.is_woken());
        tokio_test::assert_ready_eq!(task.poll(), Err(RequestError::Timeout));
    }

    #[test]
    fn test_blocking_get_from_thread() {
        let (completer, future, _rx) = pair();
        let waiter = std::thread::spawn(move || future.blocking_get());
        std::thread::sleep(Duration::from_millis(10));
        completer.complete(Err(RequestError::Timeout));
        assert_eq!(waiter.join().unwrap(), Err(RequestError::Timeout));
    }

    #[test]
    fn test_blocking_get_timeout_keeps_handle() {
        let (completer, mut future, _rx) = pair();
        assert_eq!(future.blocking_get_timeout(Duration::from_millis(5)), Err(WaitElapsed));
        completer.complete(Ok(None));
        assert_eq!(future.blocking_get_timeout(Duration::from_millis(5)), Ok(Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_timeout_keeps_handle() {
        let (completer, mut future, _rx) = pair();
        assert_eq!(future.get_timeout(Duration::from_secs(1)).await, Err(WaitElapsed));
        assert!(!future.is_complete());
        completer.complete(ack());
        assert_eq!(future.await, ack());
    }

    #[tokio::test]
    async fn test_cancel_pending_request() {
        let (completer, future, mut rx) = pair();
        future.cancel();
        assert!(matches!(rx.try_recv(), Ok(Command::Cancel(RequestId(1)))));

        // a late response no longer changes the outcome
        completer.complete(ack());
        assert_eq!(future.await, Err(RequestError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let (completer, future, mut rx) = pair();
        completer.complete(Ok(None));
        future.cancel();
        assert!(rx.try_recv().is_err());
        assert_eq!(future.await, Ok(None));
    }

    #[test]
    fn test_dropped_completer_cancels() {
        let (completer, future, _rx) = pair();
        drop(completer);
        assert_eq!(future.blocking_get(), Err(RequestError::Cancelled));
    }

    #[test]
    fn test_on_complete_before_and_after() {
        let (tx, rx) = std_mpsc::channel();

        let (completer, future, _commands) = pair();
        let sender = tx.clone();
        future.on_complete(move |outcome| sender.send(outcome).unwrap());
        assert!(rx.try_recv().is_err());
        completer.complete(ack());
        assert_eq!(rx.recv().unwrap(), ack());

        let (completer, future, _commands) = pair();
        completer.complete(Err(RequestError::Reject(RejectReason::InvalidTag)));
        future.on_complete(move |outcome| tx.send(outcome).unwrap());
        assert_eq!(rx.recv().unwrap(), Err(RequestError::Reject(RejectReason::InvalidTag)));
    }
}
