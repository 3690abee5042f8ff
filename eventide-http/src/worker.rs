//! The dispatch loop and per-request workers.
//!
//! One loop per pipeline pulls jobs from the ingress buffer and the bounded
//! retry channel, preferring retries, and mails the limiter an admission
//! request for each job in that order. A semaphore gates how many requests
//! may be past the buffer at once; each gated request runs on its own task,
//! so buckets progress independently up to the gate's width while per-bucket
//! ordering is fixed by the limiter's mailbox.

use crate::{
    answer::{Answer, RatelimitInfo},
    config::Config,
    error::Error,
    queue::IngressQueue,
    request::Request,
    response::{classify, Disposition},
    transport::Transport,
    API_VERSION,
};
use eventide_http_ratelimiting::{
    headers::RatelimitHeaders,
    request::{Method, RouteKey},
    Admission, RatelimitPermit, Ratelimiter,
};
use hyper::{
    header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    Body, Request as HyperRequest, StatusCode,
};
use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore},
    time::{sleep, timeout},
};

/// How long the wind-down phase waits for straggling retries before
/// concluding the pipeline is finished.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// State shared by the dispatch loop and every worker.
#[derive(Debug)]
pub(crate) struct PipelineState {
    pub config: Config,
    pub proxy: Option<Box<str>>,
    pub ratelimiter: Ratelimiter,
    pub token: Option<Box<str>>,
    pub token_invalid: AtomicBool,
    pub transport: Arc<dyn Transport>,
    pub use_http: bool,
}

/// Where a job's answer goes.
pub(crate) enum Responder<T, C> {
    /// A `submit` call awaiting its single answer.
    Once(oneshot::Sender<Answer<T, C>>),
    /// The pipeline's shared answer channel.
    Stream(mpsc::Sender<Answer<T, C>>),
}

/// A request travelling through the pipeline, with its retry count and the
/// way back to its caller.
pub(crate) struct Job<T, C> {
    pub attempts: u32,
    pub request: Request<T, C>,
    pub responder: Responder<T, C>,
    pub route: RouteKey,
}

/// Answer material missing only the caller's context.
pub(crate) enum Emission<T> {
    Response {
        data: T,
        ratelimit: Option<RatelimitInfo>,
    },
    Ratelimited {
        global: bool,
        ratelimit: Option<RatelimitInfo>,
    },
    Error(Error),
    Dropped,
}

/// Turn a job into its answer and deliver it.
pub(crate) async fn emit<T, C>(job: Job<T, C>, emission: Emission<T>) {
    let Job {
        request,
        responder,
        route,
        ..
    } = job;
    let identifier = request.identifier;
    let context = request.context;

    let answer = match emission {
        Emission::Response { data, ratelimit } => Answer::Response {
            data,
            ratelimit,
            route,
            identifier,
            context,
        },
        Emission::Ratelimited { global, ratelimit } => Answer::Ratelimited {
            global,
            ratelimit,
            route,
            identifier,
            context,
        },
        Emission::Error(source) => Answer::Error {
            source,
            route,
            identifier,
            context,
        },
        Emission::Dropped => Answer::Dropped {
            route,
            identifier,
            context,
        },
    };

    match responder {
        Responder::Once(tx) => {
            let _ = tx.send(answer);
        }
        Responder::Stream(tx) => {
            let _ = tx.send(answer).await;
        }
    }
}

/// Run the pipeline until the ingress closes and in-flight work settles.
pub(crate) async fn run<T, C>(state: Arc<PipelineState>, queue: IngressQueue<T, C>)
where
    T: Send + 'static,
    C: Send + Sync + 'static,
{
    let parallelism = state.config.parallelism.max(1);
    let gate = Arc::new(Semaphore::new(parallelism));
    let (retry_tx, mut retry_rx) = mpsc::channel(state.config.buffer_size.max(1));
    let mut ingress_open = true;

    loop {
        let job: Job<T, C> = if ingress_open {
            tokio::select! {
                biased;
                Some(job) = retry_rx.recv() => job,
                maybe = queue.pop() => match maybe {
                    Some(job) => job,
                    None => {
                        ingress_open = false;

                        continue;
                    }
                },
            }
        } else {
            // Only retries of requests still in flight can arrive now; poll
            // with a timeout so the loop concludes once the workers quiet
            // down.
            match timeout(SHUTDOWN_POLL, retry_rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    if gate.available_permits() == parallelism {
                        break;
                    }

                    continue;
                }
            }
        };

        // The gate bounds admission waits and HTTP sends together; while
        // every slot is taken the loop stalls here and ingress backpressure
        // takes over.
        let slot = Arc::clone(&gate)
            .acquire_owned()
            .await
            .expect("gate is never closed");

        dispatch(&state, job, slot, &retry_tx);
    }

    tracing::debug!("request pipeline finished");
}

/// Mail the limiter for admission and hand the job to a worker task.
fn dispatch<T, C>(
    state: &Arc<PipelineState>,
    job: Job<T, C>,
    slot: OwnedSemaphorePermit,
    retry_tx: &mpsc::Sender<Job<T, C>>,
) where
    T: Send + 'static,
    C: Send + Sync + 'static,
{
    // The admission request is mailed here, in ingress order; the limiter
    // processes its mailbox sequentially, so per-bucket ordering holds no
    // matter how the worker tasks interleave.
    let admission = state
        .ratelimiter
        .acquire(job.route.clone(), job.request.identifier);

    let state = Arc::clone(state);
    let retry_tx = retry_tx.clone();

    tokio::spawn(async move {
        if state.token_invalid.load(Ordering::Relaxed) && job.request.use_authorization_token {
            emit(job, Emission::Error(Error::unauthorized())).await;

            return;
        }

        let admission = match admission.await {
            Ok(admission) => admission,
            Err(_) => {
                emit(job, Emission::Error(Error::pipeline_shutdown())).await;

                return;
            }
        };

        let permit = match admission {
            Admission::Pass(permit) => permit,
            Admission::Drop => {
                emit(job, Emission::Dropped).await;

                return;
            }
        };

        let disposition = perform(&state, &job.request, permit).await;

        // The slot frees before any backoff sleep so retries of one request
        // can not starve the gate.
        drop(slot);

        match disposition {
            Disposition::Respond { data, info } => {
                emit(
                    job,
                    Emission::Response {
                        data,
                        ratelimit: info,
                    },
                )
                .await;
            }
            Disposition::Ratelimited { global, info } => {
                emit(
                    job,
                    Emission::Ratelimited {
                        global,
                        ratelimit: info,
                    },
                )
                .await;
            }
            Disposition::Fail(error) => {
                if error.retryable() && job.attempts < state.config.max_retries {
                    let delay = backoff(job.attempts);
                    tracing::debug!(
                        attempt = job.attempts,
                        delay_ms = %delay.as_millis(),
                        path = %job.request.path,
                        "retrying failed request",
                    );
                    sleep(delay).await;

                    let mut job = job;
                    job.attempts += 1;

                    if let Err(give_back) = retry_tx.send(job).await {
                        emit(give_back.0, Emission::Error(error)).await;
                    }
                } else {
                    emit(job, Emission::Error(error)).await;
                }
            }
        }
    });
}

/// Send one HTTP request and classify its outcome, feeding ratelimit
/// headers back through the permit.
async fn perform<T, C>(
    state: &PipelineState,
    request: &Request<T, C>,
    permit: RatelimitPermit,
) -> Disposition<T> {
    let http_request = match assemble(state, request) {
        Ok(http_request) => http_request,
        Err(error) => {
            // Nothing was sent; dropping the permit refunds the admission.
            drop(permit);

            return Disposition::Fail(error);
        }
    };

    if state.config.log_sent_rest {
        tracing::debug!(method = %request.method, path = %request.path, "sending request");
    }

    let sent = timeout(state.config.http_timeout, state.transport.send(http_request)).await;

    let response = match sent {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => {
            permit.complete(None);

            return Disposition::Fail(Error::network(source));
        }
        Err(_) => {
            permit.complete(None);

            return Disposition::Fail(Error::timed_out());
        }
    };

    let status = response.status();

    if state.config.log_received_rest {
        tracing::debug!(path = %request.path, %status, "received response");
    }

    let headers = RatelimitHeaders::from_pairs(
        response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes())),
    );

    let headers = match headers {
        Ok(headers) => {
            if matches!(&headers, RatelimitHeaders::Present(present) if present.bucket().is_none())
            {
                // The API documents the bucket header as always present but
                // omits it on some error paths; state still updates, only
                // the route binding is skipped.
                tracing::warn!(path = %request.path, "response is missing the ratelimit bucket header");
            }

            if state.config.log_ratelimit_events && !headers.is_none() {
                tracing::debug!(path = %request.path, ?headers, "observed ratelimit headers");
            }

            permit.complete(Some(headers.clone()));

            Some(headers)
        }
        Err(why) => {
            tracing::warn!(path = %request.path, ?why, "response ratelimit headers invalid");
            permit.complete(None);

            None
        }
    };

    if status == StatusCode::UNAUTHORIZED && request.use_authorization_token {
        // The token is permanently invalid; refuse future requests instead
        // of risking an API ban.
        state.token_invalid.store(true, Ordering::Relaxed);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        // A 429's body is not parsed.
        return classify(status, headers.as_ref(), &[], &request.parser);
    }

    let body = match hyper::body::to_bytes(response.into_body()).await {
        Ok(body) => body,
        Err(source) => return Disposition::Fail(Error::chunking(source)),
    };

    classify(status, headers.as_ref(), &body, &request.parser)
}

/// Build the outgoing HTTP request.
fn assemble<T, C>(
    state: &PipelineState,
    request: &Request<T, C>,
) -> Result<HyperRequest<Body>, Error> {
    let protocol = if state.use_http { "http" } else { "https" };
    let host = state.proxy.as_deref().unwrap_or("discord.com");
    let path = request.path.trim_start_matches('/');
    let url = format!("{protocol}://{host}/api/v{API_VERSION}/{path}");

    let mut builder = hyper::Request::builder()
        .method(request.method.into_http())
        .uri(url.as_str());

    if let Some(headers) = builder.headers_mut() {
        if request.use_authorization_token {
            if let Some(token) = state.token.as_deref() {
                let value = HeaderValue::from_str(token)
                    .map_err(|source| Error::creating_header("authorization", source))?;

                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "DiscordBot (",
                env!("CARGO_PKG_REPOSITORY"),
                ", ",
                env!("CARGO_PKG_VERSION"),
                ") Eventide-rs",
            )),
        );

        if state.config.millisecond_precision {
            headers.insert(
                HeaderName::from_static("x-ratelimit-precision"),
                HeaderValue::from_static("millisecond"),
            );
        }

        if let Some(bytes) = &request.body {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        } else if matches!(request.method, Method::Patch | Method::Post | Method::Put) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(0));
        }

        // Request headers go last so a multipart upload can override the
        // content type.
        if let Some(extra) = &request.headers {
            for (name, value) in extra {
                headers.insert(name, value.clone());
            }
        }
    }

    let body = request
        .body
        .clone()
        .map_or_else(Body::empty, Body::from);

    builder.body(body).map_err(Error::building)
}

/// Exponential backoff with an eighth of jitter either way; the cap bounds
/// the jittered delay, never the other way around.
fn backoff(attempts: u32) -> Duration {
    const BASE_MILLIS: u64 = 250;
    const CAP_MILLIS: u64 = 5_000;

    let millis = BASE_MILLIS
        .saturating_mul(1_u64 << attempts.min(16))
        .min(CAP_MILLIS);
    let spread = (millis / 4).max(1);
    let jittered = millis - millis / 8 + rand::thread_rng().gen_range(0..spread);

    Duration::from_millis(jittered.min(CAP_MILLIS))
}

#[cfg(test)]
mod tests {
    use super::backoff;
    use std::time::Duration;

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..32 {
            let first = backoff(0);
            assert!(first >= Duration::from_millis(218), "{first:?}");
            assert!(first < Duration::from_millis(282), "{first:?}");

            // Jitter never pushes a capped delay past the ceiling.
            let capped = backoff(30);
            assert!(capped >= Duration::from_millis(4_375), "{capped:?}");
            assert!(capped <= Duration::from_millis(5_000), "{capped:?}");
        }
    }

    #[test]
    fn backoff_is_monotone_between_early_attempts() {
        // Jitter is an eighth of the delay, so consecutive attempts can not
        // overlap: 2^n * 1.125 < 2^(n+1) * 0.875.
        for attempt in 0..4 {
            assert!(backoff(attempt) < backoff(attempt + 1));
        }
    }
}
