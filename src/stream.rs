//! Stream-mode retries.
//!
//! [`RetryPolicy::apply_policy_stream`] subscribes to a stream produced by a factory and
//! forwards its items. When the stream yields a retryable error and the budget allows another
//! attempt, it resubscribes to a fresh stream after the delay. Attempt counting, delays,
//! dispatch and exhaustion follow the future mode exactly.
//!
//! [`RetryStream`] is a small state machine:
//!
//! ```text
//! Waiting --(factory delivered a stream)--> Streaming
//! Streaming --(item)--> Streaming
//! Streaming --(end of stream)--> Done
//! Streaming --(retryable error)--> Waiting
//! Streaming/Waiting --(terminal cause)--> Done, after yielding the mapped error
//! ```
//!
//! A retry that must stay on a transaction-bound thread blocks the thread polling the stream
//! for the delay. This is the one place a stream poll blocks.

use crate::error::RetryError;
use crate::retry::{AttemptContext, CancelOnDrop, RetryPolicy};
use crate::scheduler::{Scheduler, Task};
use crate::sleeper::Interrupted;
use futures::channel::oneshot;
use futures::Stream;
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::warn;

type Upstream<St> = Arc<dyn Fn() -> St + Send + Sync>;

impl RetryPolicy {
    /// Retry a stream by resubscribing to `upstream()` after each retryable error.
    ///
    /// Items are forwarded as they arrive, including those emitted by subscriptions that later
    /// fail. On a terminal cause the stream yields `Err(map_error(cause))` once, after
    /// `on_exhausted` has seen it, and then ends.
    ///
    /// The first subscription happens before this function returns. Dropping the stream
    /// cancels any pending resubscription.
    pub fn apply_policy_stream<T, E, M, F, St, R, X, ME>(
        &self,
        upstream: F,
        should_retry: R,
        on_exhausted: X,
        map_error: ME,
        scheduler: Arc<dyn Scheduler>,
    ) -> RetryStream<St, E, M>
    where
        F: Fn() -> St + Send + Sync + 'static,
        St: Stream<Item = Result<T, E>> + Send + 'static,
        R: Fn(&E) -> bool + Send + 'static,
        X: FnOnce(&M) + Send + 'static,
        ME: FnOnce(RetryError<E>) -> M + Send + 'static,
    {
        let guard = CancelOnDrop::new();
        let upstream: Upstream<St> = Arc::new(upstream);
        let (first, task) = subscribe_task(&upstream, guard.flag());
        self.dispatcher(&scheduler, true).dispatch(task);

        RetryStream {
            policy: self.clone(),
            scheduler,
            upstream,
            should_retry: Box::new(should_retry),
            terminal: Some(Terminal {
                on_exhausted: Box::new(on_exhausted),
                map_error: Box::new(map_error),
            }),
            context: AttemptContext::new(),
            guard,
            state: State::Waiting(first),
        }
    }
}

struct Terminal<E, M> {
    on_exhausted: Box<dyn FnOnce(&M) + Send>,
    map_error: Box<dyn FnOnce(RetryError<E>) -> M + Send>,
}

#[pin_project(project = StateProj)]
enum State<St> {
    Waiting(oneshot::Receiver<St>),
    Streaming(#[pin] St),
    Done,
}

enum Step<St, E> {
    Subscribe(St),
    Complete,
    Failed(E),
    Terminate(RetryError<E>),
}

/// Stream returned by [`RetryPolicy::apply_policy_stream`].
#[pin_project]
#[must_use = "streams do nothing unless polled"]
pub struct RetryStream<St, E, M> {
    policy: RetryPolicy,
    scheduler: Arc<dyn Scheduler>,
    upstream: Upstream<St>,
    should_retry: Box<dyn Fn(&E) -> bool + Send>,
    terminal: Option<Terminal<E, M>>,
    context: AttemptContext,
    guard: CancelOnDrop,
    #[pin]
    state: State<St>,
}

impl<St, T, E, M> Stream for RetryStream<St, E, M>
where
    St: Stream<Item = Result<T, E>> + Send + 'static,
{
    type Item = Result<T, M>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            let step = match this.state.as_mut().project() {
                StateProj::Waiting(receiver) => match ready!(Pin::new(receiver).poll(cx)) {
                    Ok(stream) => Step::Subscribe(stream),
                    Err(oneshot::Canceled) => Step::Terminate(RetryError::Rejected),
                },
                StateProj::Streaming(stream) => match ready!(stream.poll_next(cx)) {
                    Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
                    Some(Err(failure)) => Step::Failed(failure),
                    None => Step::Complete,
                },
                StateProj::Done => return Poll::Ready(None),
            };

            let cause = match step {
                Step::Subscribe(stream) => {
                    this.state.set(State::Streaming(stream));
                    continue;
                }
                Step::Complete => {
                    this.state.set(State::Done);
                    return Poll::Ready(None);
                }
                Step::Terminate(cause) => cause,
                Step::Failed(failure) => {
                    if !(this.should_retry)(&failure)
                        || !this.policy.max_attempts().permits_retry(this.context.attempts())
                    {
                        RetryError::Failed(failure)
                    } else {
                        this.context.begin_retry();
                        let (next, task) = subscribe_task(this.upstream, this.guard.flag());
                        match this.policy.dispatch_retry(this.scheduler, *this.context, task) {
                            Ok(()) => {
                                this.state.set(State::Waiting(next));
                                continue;
                            }
                            Err(Interrupted) => RetryError::Interrupted,
                        }
                    }
                }
            };

            this.state.set(State::Done);
            let Some(terminal) = this.terminal.take() else {
                return Poll::Ready(None);
            };
            let mapped = (terminal.map_error)(cause);
            warn!(
                target: "reattempt::retry",
                attempts = this.context.attempts(),
                "stream retries exhausted"
            );
            (terminal.on_exhausted)(&mapped);
            return Poll::Ready(Some(Err(mapped)));
        }
    }
}

impl<St, E, M> fmt::Debug for RetryStream<St, E, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryStream")
            .field("policy", &self.policy)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Task that subscribes to a fresh upstream and hands it back.
fn subscribe_task<St>(upstream: &Upstream<St>, cancelled: Arc<AtomicBool>) -> (oneshot::Receiver<St>, Task)
where
    St: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let upstream = upstream.clone();
    let task: Task = Box::new(move || {
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        let _ = tx.send(upstream());
    });
    (rx, task)
}
