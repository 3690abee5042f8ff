//! The pipeline surface handed to callers.

mod builder;
pub(crate) mod connector;

pub use self::builder::PipelineBuilder;

use crate::{
    answer::Answer,
    error::Error,
    queue::{IngressQueue, PushError},
    request::Request,
    worker::{emit, Emission, Job, PipelineState, Responder},
};
use eventide_http_ratelimiting::Ratelimiter;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, oneshot};

/// Closes the ingress when the last producer handle is dropped, letting the
/// dispatch loop wind down.
struct ProducerGuard<T, C> {
    queue: IngressQueue<T, C>,
}

impl<T, C> Drop for ProducerGuard<T, C> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// A ratelimit-aware request pipeline for the Discord REST API.
///
/// A pipeline is generic over the answer data `T` and an opaque caller
/// context `C` returned verbatim with every answer. Requests either get a
/// one-off answer via [`submit`] or flow through the channel pair of
/// [`ingress`] and [`answers`]. Exactly one [`Answer`] is produced per
/// request.
///
/// Cloning is cheap; all clones share the ingress buffer, the ratelimiter
/// and the HTTP transport. The pipeline winds down when the last handle
/// (including [`Ingress`] clones) is dropped.
///
/// # Examples
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use eventide_http::{request::{json_parser, Request}, Pipeline};
/// use eventide_http_ratelimiting::request::Method;
/// use serde_json::Value;
///
/// let pipeline: Pipeline<Value, ()> = Pipeline::new(std::env::var("DISCORD_TOKEN")?);
///
/// let request = Request::new(Method::Get, "channels/100", json_parser(), ());
/// let answer = pipeline.submit(request).await?;
///
/// if let Some(data) = answer.into_data().ok() {
///     println!("channel: {data:?}");
/// }
/// # Ok(()) }
/// ```
///
/// [`answers`]: Self::answers
/// [`ingress`]: Self::ingress
/// [`submit`]: Self::submit
pub struct Pipeline<T, C> {
    answer_tx: mpsc::Sender<Answer<T, C>>,
    answers: Arc<Mutex<Option<mpsc::Receiver<Answer<T, C>>>>>,
    guard: Arc<ProducerGuard<T, C>>,
    queue: IngressQueue<T, C>,
    state: Arc<PipelineState>,
}

impl<T, C> Pipeline<T, C>
where
    T: Send + 'static,
    C: Send + Sync + 'static,
{
    /// Create a pipeline with default configuration and the given token.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(token: impl Into<String>) -> Self {
        PipelineBuilder::new().token(token).build()
    }

    /// Create a builder to configure a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The ratelimiter used by the pipeline.
    #[must_use]
    pub fn ratelimiter(&self) -> &Ratelimiter {
        &self.state.ratelimiter
    }

    /// Submit a request, awaiting its single answer.
    ///
    /// The future is gated by the ingress buffer's overflow policy: under
    /// backpressure it waits for room, under the dropping policies a
    /// rejection surfaces as a [`BufferOverflow`] error answer.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorType::PipelineShutdown`] if the pipeline shut down
    /// before answering.
    ///
    /// [`BufferOverflow`]: crate::error::ErrorType::BufferOverflow
    /// [`ErrorType::PipelineShutdown`]: crate::error::ErrorType::PipelineShutdown
    pub async fn submit(&self, request: Request<T, C>) -> Result<Answer<T, C>, Error> {
        let (tx, rx) = oneshot::channel();

        enqueue(&self.queue, request, Responder::Once(tx)).await;

        rx.await.map_err(|_| Error::pipeline_shutdown())
    }

    /// A cloneable sender feeding the pipeline's answer channel.
    ///
    /// Answers for requests sent through an [`Ingress`] arrive on the
    /// receiver taken from [`answers`], in completion order.
    ///
    /// [`answers`]: Self::answers
    #[must_use]
    pub fn ingress(&self) -> Ingress<T, C> {
        Ingress {
            answer_tx: self.answer_tx.clone(),
            guard: Arc::clone(&self.guard),
            queue: self.queue.clone(),
        }
    }

    /// Take the pipeline's answer receiver.
    ///
    /// Returns `None` after the first call; there is one receiver per
    /// pipeline.
    #[must_use]
    pub fn answers(&self) -> Option<mpsc::Receiver<Answer<T, C>>> {
        self.answers.lock().expect("answer receiver poisoned").take()
    }
}

impl<T, C> Clone for Pipeline<T, C> {
    fn clone(&self) -> Self {
        Self {
            answer_tx: self.answer_tx.clone(),
            answers: Arc::clone(&self.answers),
            guard: Arc::clone(&self.guard),
            queue: self.queue.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, C> Debug for Pipeline<T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Cloneable request sender for the pipeline's streaming mode.
///
/// Every request sent here produces exactly one answer on the pipeline's
/// answer channel, including requests displaced by an overflow policy.
pub struct Ingress<T, C> {
    answer_tx: mpsc::Sender<Answer<T, C>>,
    guard: Arc<ProducerGuard<T, C>>,
    queue: IngressQueue<T, C>,
}

impl<T, C> Ingress<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    /// Send a request into the pipeline.
    ///
    /// Failures, including a closed pipeline or an overflow rejection, are
    /// delivered as error answers on the answer channel.
    pub async fn send(&self, request: Request<T, C>) {
        enqueue(&self.queue, request, Responder::Stream(self.answer_tx.clone())).await;
    }
}

impl<T, C> Clone for Ingress<T, C> {
    fn clone(&self) -> Self {
        Self {
            answer_tx: self.answer_tx.clone(),
            guard: Arc::clone(&self.guard),
            queue: self.queue.clone(),
        }
    }
}

impl<T, C> Debug for Ingress<T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Ingress").finish_non_exhaustive()
    }
}

/// Queue a request, answering displaced or rejected jobs on the spot.
async fn enqueue<T, C>(queue: &IngressQueue<T, C>, request: Request<T, C>, responder: Responder<T, C>) {
    let route = request.route();
    let job = Job {
        attempts: 0,
        request,
        responder,
        route,
    };

    match queue.push(job).await {
        Ok(victims) => {
            for victim in victims {
                emit(victim, Emission::Error(Error::buffer_overflow())).await;
            }
        }
        Err(PushError::Rejected(job)) => {
            emit(job, Emission::Error(Error::buffer_overflow())).await;
        }
        Err(PushError::Closed(job)) => {
            emit(job, Emission::Error(Error::pipeline_shutdown())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Ingress, Pipeline, PipelineBuilder};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Pipeline<(), u64>: Clone, Debug, Send, Sync);
    assert_impl_all!(Ingress<(), u64>: Clone, Debug, Send, Sync);
    assert_impl_all!(PipelineBuilder: Debug, Send, Sync);
}
