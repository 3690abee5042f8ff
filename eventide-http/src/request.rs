//! Caller-authored requests and their response parsers.

use crate::error::Error;
use eventide_http_ratelimiting::request::{Method, RequestId, RouteKey};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    error::Error as StdError,
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

/// Failure produced by a [`ResponseParser`].
pub type ParserError = Box<dyn StdError + Send + Sync>;

/// Parser turning a response body into the request's answer data.
///
/// A `204 No Content` response invokes the parser with an empty slice; a
/// parser that rejects the empty input turns such responses into errors.
pub type ResponseParser<T> = Arc<dyn Fn(&[u8]) -> Result<T, ParserError> + Send + Sync>;

/// Parser deserializing the body as JSON.
#[must_use]
pub fn json_parser<T: DeserializeOwned>() -> ResponseParser<T> {
    Arc::new(|body| serde_json::from_slice(body).map_err(Into::into))
}

/// Parser for requests without response data, accepting any body.
#[must_use]
pub fn empty_parser() -> ResponseParser<()> {
    Arc::new(|_| Ok(()))
}

/// A REST request to be submitted to the pipeline.
///
/// The method, path, body and parser come from the caller's request catalog;
/// `context` is an opaque tag the pipeline returns verbatim in the answer.
pub struct Request<T, C> {
    /// The body of the request, if any.
    pub body: Option<Vec<u8>>,
    /// The headers to set in the request, if any.
    pub headers: Option<HeaderMap<HeaderValue>>,
    /// The method of the request.
    pub method: Method,
    /// The URI path of the request, relative to the API root.
    pub path: String,
    /// Identifier of this logical invocation, preserved across retries.
    pub identifier: RequestId,
    /// Parser for the response body.
    pub parser: ResponseParser<T>,
    /// Opaque caller context, returned verbatim in the answer.
    pub context: C,
    /// Whether to use the pipeline's authorization token in the request.
    pub(crate) use_authorization_token: bool,
}

impl<T, C> Request<T, C> {
    /// Create a request with basic information.
    ///
    /// Use [`builder`] to set a body or other configuration.
    ///
    /// [`builder`]: Self::builder
    pub fn new(method: Method, path: impl Into<String>, parser: ResponseParser<T>, context: C) -> Self {
        Self {
            body: None,
            headers: None,
            method,
            path: path.into(),
            identifier: RequestId::unique(),
            parser,
            context,
            use_authorization_token: true,
        }
    }

    /// Create a builder for a customized request.
    pub fn builder(
        method: Method,
        path: impl Into<String>,
        parser: ResponseParser<T>,
        context: C,
    ) -> RequestBuilder<T, C> {
        RequestBuilder(Self::new(method, path, parser, context))
    }

    /// Ratelimit identity of the request.
    #[must_use]
    pub fn route(&self) -> RouteKey {
        RouteKey::new(self.method, &self.path)
    }

    /// Whether the pipeline's authorization token is used in the request.
    #[must_use]
    pub const fn use_authorization_token(&self) -> bool {
        self.use_authorization_token
    }
}

impl<T, C: Debug> Debug for Request<T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Request")
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("identifier", &self.identifier)
            .field("context", &self.context)
            .finish()
    }
}

/// Builder to create a customized [`Request`].
///
/// # Examples
///
/// Create a request to create a message with a content of "test" in a
/// channel with an ID of 1:
///
/// ```
/// use eventide_http::request::{json_parser, Request};
/// use eventide_http_ratelimiting::request::Method;
/// use serde_json::Value;
///
/// let body = br#"{
///     "content": "test"
/// }"#
/// .to_vec();
///
/// let request: Request<Value, ()> =
///     Request::builder(Method::Post, "channels/1/messages", json_parser(), ())
///         .body(body)
///         .build();
/// ```
pub struct RequestBuilder<T, C>(Request<T, C>);

impl<T, C> RequestBuilder<T, C> {
    /// Consume the builder, returning the built request.
    #[allow(clippy::missing_const_for_fn)]
    #[must_use = "request information is not useful on its own and must be acted on"]
    pub fn build(self) -> Request<T, C> {
        self.0
    }

    /// Set the contents of the body.
    #[must_use = "request has not been fully built"]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.0.body.replace(body);

        self
    }

    /// Set the headers to add.
    #[must_use = "request has not been fully built"]
    pub fn headers(mut self, iter: impl Iterator<Item = (HeaderName, HeaderValue)>) -> Self {
        self.0.headers.replace(iter.collect());

        self
    }

    /// Override the auto-assigned request identifier.
    #[must_use = "request has not been fully built"]
    pub fn identifier(mut self, identifier: RequestId) -> Self {
        self.0.identifier = identifier;

        self
    }

    /// Set the body, to be serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::Json`] error type if the value could not be
    /// serialized as JSON.
    ///
    /// [`ErrorType::Json`]: crate::error::ErrorType::Json
    pub fn json(self, to: &impl Serialize) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(to).map_err(Error::json)?;

        Ok(self.body(bytes))
    }

    /// Whether to use the pipeline's authorization token in the request, if
    /// one is set.
    ///
    /// This is primarily useful for executing webhooks.
    #[must_use = "request has not been fully built"]
    pub const fn use_authorization_token(mut self, use_authorization_token: bool) -> Self {
        self.0.use_authorization_token = use_authorization_token;

        self
    }
}

impl<T, C: Debug> Debug for RequestBuilder<T, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("RequestBuilder").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{empty_parser, json_parser, Request, RequestBuilder};
    use eventide_http_ratelimiting::request::{Method, RequestId};
    use serde::{Deserialize, Serialize};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Request<(), u64>: Debug, Send, Sync);
    assert_impl_all!(RequestBuilder<(), u64>: Debug, Send, Sync);

    #[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
    struct CreateMessageFields {
        content: String,
    }

    #[test]
    fn json_body_round_trips() {
        let fields = CreateMessageFields {
            content: "test".to_owned(),
        };

        let request: Request<(), ()> =
            Request::builder(Method::Post, "channels/1/messages", empty_parser(), ())
                .json(&fields)
                .unwrap()
                .build();

        let body = request.body.as_deref().unwrap();
        assert_eq!(serde_json::to_vec(&fields).unwrap(), body);
        assert_eq!(
            fields,
            serde_json::from_slice::<CreateMessageFields>(body).unwrap(),
        );
    }

    #[test]
    fn route_collapses_trailing_ids() {
        let request: Request<(), ()> =
            Request::new(Method::Get, "channels/100/messages/200", empty_parser(), ());

        assert_eq!("channels/100/messages/{id}", request.route().path());
    }

    #[test]
    fn identifier_can_be_pinned() {
        let request: Request<(), ()> =
            Request::builder(Method::Get, "gateway", empty_parser(), ())
                .identifier(RequestId::new(42))
                .build();

        assert_eq!(RequestId::new(42), request.identifier);
    }

    #[test]
    fn fresh_requests_get_distinct_identifiers() {
        let first: Request<(), ()> = Request::new(Method::Get, "gateway", empty_parser(), ());
        let second: Request<(), ()> = Request::new(Method::Get, "gateway", empty_parser(), ());

        assert_ne!(first.identifier, second.identifier);
    }

    #[test]
    fn json_parser_deserializes() {
        let parser = json_parser::<CreateMessageFields>();

        let parsed = parser(br#"{"content":"c"}"#).unwrap();
        assert_eq!("c", parsed.content);

        assert!(parser(b"").is_err());
    }

    #[test]
    fn empty_parser_accepts_anything() {
        let parser = empty_parser();

        parser(b"").unwrap();
        parser(b"ignored").unwrap();
    }
}
