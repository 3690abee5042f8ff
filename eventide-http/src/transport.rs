//! Seam between the pipeline and the HTTP client performing the sends.
//!
//! The pipeline only ever issues one HTTPS request at a time per transport
//! call; connection pooling, TLS and HTTP versioning are the transport's
//! concern. The default transport is backed by `hyper`; tests substitute a
//! scripted implementation.

use crate::client::connector::{self, Connector};
use hyper::{client::Client as HyperClient, Body, Request as HyperRequest, Response};
use std::{error::Error, fmt::Debug, future::Future, pin::Pin};

/// A generic error type returned by a transport.
pub type GenericError = Box<dyn Error + Send + Sync>;

/// Future returned by [`Transport::send`].
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<Response<Body>, GenericError>> + Send + 'static>>;

/// An HTTP client capable of issuing a single request.
///
/// Implementations must be internally thread-safe; the pipeline shares one
/// transport across all in-flight sends. Timeouts are applied by the
/// pipeline, not the transport.
pub trait Transport: Debug + Send + Sync {
    /// Issue a single HTTP request.
    fn send(&self, request: HyperRequest<Body>) -> TransportFuture;
}

/// Default transport backed by a `hyper` client.
#[derive(Debug)]
pub(crate) struct HyperTransport {
    http: HyperClient<Connector>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            http: hyper::client::Builder::default().build(connector::create()),
        }
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: HyperRequest<Body>) -> TransportFuture {
        let fut = self.http.request(request);

        Box::pin(async move { fut.await.map_err(|source| Box::new(source) as GenericError) })
    }
}
