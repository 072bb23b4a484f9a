//! Tower-native retry layer.
//!
//! Each call clones the wrapped service and the request, then runs the pair through
//! [`RetryPolicy::apply_policy_async`]. Service errors surface as [`RetryError`].

use crate::error::RetryError;
use crate::retry::{RetryFuture, RetryPolicy};
use crate::scheduler::Scheduler;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Tower-native retry layer.
pub struct RetryLayer<E> {
    policy: RetryPolicy,
    scheduler: Arc<dyn Scheduler>,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> RetryLayer<E> {
    /// Retry every failure.
    pub fn new(policy: RetryPolicy, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { policy, scheduler, should_retry: Arc::new(|_| true) }
    }

    /// Predicate to decide if a service error is retryable.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            scheduler: self.scheduler.clone(),
            should_retry: self.should_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryLayer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLayer")
            .field("policy", &self.policy)
            .field("scheduler", &self.scheduler)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<S, E> Layer<S> for RetryLayer<E> {
    type Service = RetryService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, layer: self.clone() }
    }
}

/// Retry service produced by `RetryLayer`.
#[derive(Debug)]
pub struct RetryService<S, E> {
    inner: S,
    layer: RetryLayer<E>,
}

impl<S: Clone, E> Clone for RetryService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), layer: self.layer.clone() }
    }
}

impl<S, E, Request> Service<Request> for RetryService<S, E>
where
    Request: Clone + Send + Sync + 'static,
    S: Service<Request, Error = E> + Clone + Send + Sync + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = RetryError<E>;
    type Future = RetryFuture<S::Response, RetryError<E>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RetryError::Failed)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let should_retry = self.layer.should_retry.clone();
        self.layer.policy.apply_policy_async(
            move || inner.clone().oneshot(req.clone()),
            move |e: &E| should_retry(e),
            |_| {},
            |_| {},
            |cause| cause,
            self.layer.scheduler.clone(),
        )
    }
}
