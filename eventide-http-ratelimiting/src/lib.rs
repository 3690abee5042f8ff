//! Ratelimiter for the Discord REST API.
//!
//! The [`Ratelimiter`] serializes requests against Discord's dynamically
//! discovered per-route buckets and the account-wide global limit. Consumers
//! follow a three-step cycle:
//!
//! 1. Call [`Ratelimiter::acquire`] with the request's [`RouteKey`] and
//!    [`RequestId`] and await the admission.
//! 2. On [`Admission::Pass`], perform the HTTP request while holding the
//!    returned [`RatelimitPermit`]. [`Admission::Drop`] means the request
//!    could not be served within the configured wait and must not be sent.
//! 3. Feed the response's parsed [`RatelimitHeaders`] back via
//!    [`RatelimitPermit::complete`]. Dropping the permit without completing
//!    it refunds the admission, which is what happens when a request is
//!    cancelled mid-flight.
//!
//! All state lives on a single coordinator task; handles are cheap to clone
//! and share. Buckets start unknown and are populated from response headers,
//! so the first request on a route is always admitted optimistically.

#![deny(
    clippy::all,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![allow(clippy::module_name_repetitions, clippy::semicolon_if_nothing_returned)]

pub mod headers;
pub mod request;

mod actor;
mod bucket;

pub use self::{
    headers::RatelimitHeaders,
    request::{Method, RequestId, RouteKey},
};

use self::{
    actor::{Actor, Command},
    bucket::{BucketState, Verdict, UNKNOWN},
};
use futures_util::FutureExt;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};
use tokio::sync::{
    mpsc::{self, UnboundedSender},
    oneshot,
};

/// Configuration of a [`Ratelimiter`].
#[derive(Clone, Debug)]
pub struct RatelimiterConfig {
    /// Longest predicted wait a request may be deferred for before being
    /// dropped instead. The bound is inclusive.
    ///
    /// Defaults to 2 minutes.
    pub max_allowed_wait: Duration,
    /// Upper bound on tracked buckets before idle ones are evicted.
    ///
    /// Defaults to 1,024.
    pub max_buckets: usize,
    /// Prefer the relative reset-after header over the absolute reset
    /// timestamp, which is robust when the local clock skews from the API's.
    ///
    /// Defaults to `true`.
    pub relative_time: bool,
}

impl Default for RatelimiterConfig {
    fn default() -> Self {
        Self {
            max_allowed_wait: Duration::from_secs(120),
            max_buckets: 1024,
            relative_time: true,
        }
    }
}

/// The ratelimiter's coordinator has shut down.
///
/// Happens when every [`Ratelimiter`] handle has been dropped while
/// admissions were still pending.
#[derive(Debug)]
pub struct RatelimiterClosed;

impl Display for RatelimiterClosed {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("the ratelimiter has shut down")
    }
}

impl Error for RatelimiterClosed {}

/// Future returned by [`Ratelimiter::acquire`].
pub type AdmissionFuture =
    Pin<Box<dyn Future<Output = Result<Admission, RatelimiterClosed>> + Send + 'static>>;

/// Future returned by [`Ratelimiter::bucket`].
pub type BucketFuture =
    Pin<Box<dyn Future<Output = Result<Option<BucketInfo>, RatelimiterClosed>> + Send + 'static>>;

/// Future returned by [`Ratelimiter::globally_locked`].
pub type GloballyLockedFuture =
    Pin<Box<dyn Future<Output = Result<bool, RatelimiterClosed>> + Send + 'static>>;

/// Decision of the limiter for a single request.
#[derive(Debug)]
pub enum Admission {
    /// The request may be sent; complete the permit with the response's
    /// headers.
    Pass(RatelimitPermit),
    /// The predicted wait exceeds the allowed wait; the request must not be
    /// sent.
    Drop,
}

/// Proof of admission for one request.
///
/// Consume it with [`complete`] once the response's ratelimit headers (or
/// the lack of a response) are known. A permit dropped without completion
/// refunds the admission, so cancelled requests do not consume a slot.
///
/// [`complete`]: Self::complete
#[derive(Debug)]
pub struct RatelimitPermit {
    route: RouteKey,
    id: RequestId,
    tx: UnboundedSender<Command>,
    completed: bool,
}

impl RatelimitPermit {
    /// Feed the response's ratelimit headers back to the limiter.
    ///
    /// Pass `None` when the request failed without a usable response; the
    /// admission is then considered spent, since the server may well have
    /// counted the request.
    pub fn complete(mut self, headers: Option<RatelimitHeaders>) {
        self.completed = true;

        let _ = self.tx.send(Command::Complete {
            route: self.route.clone(),
            id: self.id,
            headers,
            received_at: Instant::now(),
        });
    }
}

impl Drop for RatelimitPermit {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.tx.send(Command::Release {
                route: self.route.clone(),
                id: self.id,
            });
        }
    }
}

/// Snapshot of a bucket's ratelimit state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BucketInfo {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset_after: Option<Duration>,
}

impl BucketInfo {
    pub(crate) fn of(state: &BucketState, now: Instant) -> Self {
        let known = |value: u64| (value != UNKNOWN).then_some(value);

        Self {
            limit: known(state.limit),
            remaining: known(state.remaining),
            reset_after: state
                .reset_at
                .map(|at| at.saturating_duration_since(now)),
        }
    }

    /// Total requests allotted in the bucket's window, if known.
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Requests remaining in the window, if known.
    #[must_use]
    pub const fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Time until the window refreshes, if known.
    #[must_use]
    pub const fn reset_after(&self) -> Option<Duration> {
        self.reset_after
    }
}

/// Handle to the ratelimit coordinator.
///
/// Cloning is cheap; all clones share one coordinator. The coordinator shuts
/// down when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct Ratelimiter {
    tx: UnboundedSender<Command>,
}

impl Ratelimiter {
    /// Create a ratelimiter with default configuration.
    ///
    /// Must be called within a tokio runtime; the coordinator is spawned
    /// immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RatelimiterConfig::default())
    }

    /// Create a ratelimiter with the provided configuration.
    ///
    /// Must be called within a tokio runtime; the coordinator is spawned
    /// immediately.
    #[must_use]
    pub fn with_config(config: RatelimiterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor::new(rx, tx.downgrade(), config);

        tokio::spawn(actor.run());

        Self { tx }
    }

    /// Ask for admission of a request.
    ///
    /// The future resolves once the limiter has decided, which may be after
    /// a deferred wait for the route's bucket to refresh. Deferred
    /// admissions of one bucket resolve in acquisition order.
    ///
    /// Dropping the future before it resolves cancels the admission.
    ///
    /// # Errors
    ///
    /// Resolves to [`RatelimiterClosed`] if the coordinator shut down before
    /// deciding.
    pub fn acquire(&self, route: RouteKey, id: RequestId) -> AdmissionFuture {
        let (tx, rx) = oneshot::channel();

        let _ = self.tx.send(Command::Acquire {
            route: route.clone(),
            id,
            tx,
        });

        let feedback = self.tx.clone();

        rx.map(move |verdict| match verdict {
            Ok(Verdict::Pass) => Ok(Admission::Pass(RatelimitPermit {
                route,
                id,
                tx: feedback,
                completed: false,
            })),
            Ok(Verdict::Drop) => Ok(Admission::Drop),
            Err(_) => Err(RatelimiterClosed),
        })
        .boxed()
    }

    /// Snapshot the state of the bucket a route currently maps to.
    ///
    /// Returns `None` for routes without any recorded state.
    ///
    /// # Errors
    ///
    /// Resolves to [`RatelimiterClosed`] if the coordinator has shut down.
    pub fn bucket(&self, route: &RouteKey) -> BucketFuture {
        let (tx, rx) = oneshot::channel();

        let _ = self.tx.send(Command::Bucket {
            route: route.clone(),
            tx,
        });

        rx.map(|info| info.map_err(|_| RatelimiterClosed)).boxed()
    }

    /// Whether a global ratelimit is currently in place.
    ///
    /// # Errors
    ///
    /// Resolves to [`RatelimiterClosed`] if the coordinator has shut down.
    pub fn globally_locked(&self) -> GloballyLockedFuture {
        let (tx, rx) = oneshot::channel();

        let _ = self.tx.send(Command::GloballyLocked { tx });

        rx.map(|locked| locked.map_err(|_| RatelimiterClosed)).boxed()
    }
}

impl Default for Ratelimiter {
    fn default() -> Self {
        Self::new()
    }
}
