//! Answers emitted by the pipeline, one per submitted request.

use crate::error::Error;
use eventide_http_ratelimiting::{
    headers::RatelimitHeaders,
    request::{RequestId, RouteKey},
};
use std::time::Duration;

/// Ratelimit information attached to an answer, as reported by the response's
/// headers.
#[derive(Clone, Debug)]
pub struct RatelimitInfo {
    bucket: Option<String>,
    limit: Option<u64>,
    remaining: Option<u64>,
    reset_after: Option<Duration>,
}

impl RatelimitInfo {
    pub(crate) fn from_headers(headers: &RatelimitHeaders) -> Option<Self> {
        match headers {
            RatelimitHeaders::None => None,
            RatelimitHeaders::GlobalLimited(global) => Some(Self {
                bucket: None,
                limit: None,
                remaining: None,
                reset_after: Some(Duration::from_millis(global.reset_after())),
            }),
            RatelimitHeaders::Present(present) => Some(Self {
                bucket: present.bucket().map(ToOwned::to_owned),
                limit: Some(present.limit()),
                remaining: Some(present.remaining()),
                reset_after: present.reset_after().map(Duration::from_millis),
            }),
            _ => None,
        }
    }

    /// Bucket the response was counted against, if the API named one.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Total requests allotted in the bucket's window.
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Requests remaining in the window.
    #[must_use]
    pub const fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Time until the window resets.
    #[must_use]
    pub const fn reset_after(&self) -> Option<Duration> {
        self.reset_after
    }
}

/// Outcome of one submitted request.
///
/// Exactly one answer is produced per request; the request's `context` and
/// `identifier` are returned verbatim in every variant.
#[derive(Debug)]
#[non_exhaustive]
pub enum Answer<T, C> {
    /// The request succeeded and its body was parsed.
    Response {
        /// Parsed response data.
        data: T,
        /// Ratelimit information of the response, if any.
        ratelimit: Option<RatelimitInfo>,
        /// Route of the request.
        route: RouteKey,
        /// Identifier of the request.
        identifier: RequestId,
        /// Caller context of the request.
        context: C,
    },
    /// The API answered 429 despite local admission, due to clock drift or
    /// the credentials being shared with another client.
    Ratelimited {
        /// Whether the ratelimit applies to all requests for the credentials.
        global: bool,
        /// Ratelimit information of the response, if any.
        ratelimit: Option<RatelimitInfo>,
        /// Route of the request.
        route: RouteKey,
        /// Identifier of the request.
        identifier: RequestId,
        /// Caller context of the request.
        context: C,
    },
    /// The request failed.
    Error {
        /// What went wrong.
        source: Error,
        /// Route of the request.
        route: RouteKey,
        /// Identifier of the request.
        identifier: RequestId,
        /// Caller context of the request.
        context: C,
    },
    /// The limiter refused admission because the predicted wait exceeded the
    /// allowed wait; the request was never sent.
    Dropped {
        /// Route of the request.
        route: RouteKey,
        /// Identifier of the request.
        identifier: RequestId,
        /// Caller context of the request.
        context: C,
    },
}

impl<T, C> Answer<T, C> {
    /// Identifier of the request that produced this answer.
    #[must_use]
    pub const fn identifier(&self) -> RequestId {
        match self {
            Self::Response { identifier, .. }
            | Self::Ratelimited { identifier, .. }
            | Self::Error { identifier, .. }
            | Self::Dropped { identifier, .. } => *identifier,
        }
    }

    /// Route of the request that produced this answer.
    #[must_use]
    pub const fn route(&self) -> &RouteKey {
        match self {
            Self::Response { route, .. }
            | Self::Ratelimited { route, .. }
            | Self::Error { route, .. }
            | Self::Dropped { route, .. } => route,
        }
    }

    /// Caller context of the request that produced this answer.
    #[must_use]
    pub const fn context(&self) -> &C {
        match self {
            Self::Response { context, .. }
            | Self::Ratelimited { context, .. }
            | Self::Error { context, .. }
            | Self::Dropped { context, .. } => context,
        }
    }

    /// Consume the answer, returning the caller context.
    #[must_use]
    pub fn into_context(self) -> C {
        match self {
            Self::Response { context, .. }
            | Self::Ratelimited { context, .. }
            | Self::Error { context, .. }
            | Self::Dropped { context, .. } => context,
        }
    }

    /// Whether the request succeeded.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response { .. })
    }

    /// Consume the answer, returning the parsed data of a success.
    ///
    /// # Errors
    ///
    /// Returns the answer unchanged when it is not [`Answer::Response`].
    pub fn into_data(self) -> Result<T, Self> {
        match self {
            Self::Response { data, .. } => Ok(data),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Answer, RatelimitInfo};
    use eventide_http_ratelimiting::{
        headers::RatelimitHeaders,
        request::{Method, RequestId, RouteKey},
    };
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(RatelimitInfo: Clone, Debug, Send, Sync);
    assert_impl_all!(Answer<(), u64>: Debug, Send, Sync);

    fn headers(pairs: &[(&str, &str)]) -> RatelimitHeaders {
        RatelimitHeaders::from_pairs(pairs.iter().map(|(name, value)| (*name, value.as_bytes())))
            .unwrap()
    }

    #[test]
    fn info_from_present_headers() {
        let info = RatelimitInfo::from_headers(&headers(&[
            ("x-ratelimit-bucket", "b1"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-reset-after", "1.000"),
        ]))
        .unwrap();

        assert_eq!(Some("b1"), info.bucket());
        assert_eq!(Some(5), info.limit());
        assert_eq!(Some(4), info.remaining());
        assert_eq!(Some(Duration::from_secs(1)), info.reset_after());
    }

    #[test]
    fn info_from_global_headers() {
        let info = RatelimitInfo::from_headers(&headers(&[
            ("x-ratelimit-global", "true"),
            ("retry-after", "2"),
        ]))
        .unwrap();

        assert!(info.bucket().is_none());
        assert!(info.limit().is_none());
        assert_eq!(Some(Duration::from_secs(2)), info.reset_after());
    }

    #[test]
    fn info_absent_without_headers() {
        assert!(RatelimitInfo::from_headers(&RatelimitHeaders::None).is_none());
    }

    #[test]
    fn accessors_reach_every_variant() {
        let route = RouteKey::new(Method::Get, "channels/1");
        let answer: Answer<(), &str> = Answer::Dropped {
            route: route.clone(),
            identifier: RequestId::new(7),
            context: "ctx",
        };

        assert_eq!(RequestId::new(7), answer.identifier());
        assert_eq!(&route, answer.route());
        assert_eq!(&"ctx", answer.context());
        assert!(!answer.is_response());
        assert_eq!("ctx", answer.into_context());
    }
}
