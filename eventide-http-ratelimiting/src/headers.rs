//! Parse typed ratelimit headers from a response.
//!
//! Header values are matched case-insensitively and numeric values accept
//! both integer and decimal forms; `x-ratelimit-reset` may be a fractional
//! epoch-seconds value. Durations are normalized to milliseconds.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::{self, FromStr, Utf8Error},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Failure to parse one of the ratelimit headers of a response.
#[derive(Debug)]
pub struct HeaderParsingError {
    /// Detailed reason why the headers failed to be parsed.
    pub(super) kind: HeaderParsingErrorType,
    /// Original error leading up to this one.
    pub(super) source: Option<Box<dyn Error + Send + Sync>>,
}

impl HeaderParsingError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &HeaderParsingErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (HeaderParsingErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Create a new error because a header is missing in the response.
    pub(super) fn missing(name: HeaderName) -> Self {
        Self {
            kind: HeaderParsingErrorType::Missing { name },
            source: None,
        }
    }

    /// Create a new error because a header is not valid UTF-8.
    pub(super) fn not_utf8(name: HeaderName, value: Vec<u8>, source: Utf8Error) -> Self {
        Self {
            kind: HeaderParsingErrorType::NotUtf8 { name, value },
            source: Some(Box::new(source)),
        }
    }
}

impl Display for HeaderParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            HeaderParsingErrorType::Missing { name } => {
                f.write_str("at least one header, '")?;
                f.write_str(name.name())?;

                f.write_str("', is missing")
            }
            HeaderParsingErrorType::NotUtf8 { name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' is not valid utf-8: ")?;

                Debug::fmt(value, f)
            }
            HeaderParsingErrorType::Parsing { kind, name, value } => {
                f.write_str("header '")?;
                f.write_str(name.name())?;
                f.write_str("' can not be parsed as a ")?;
                f.write_str(kind.name())?;
                f.write_str(": '")?;
                f.write_str(value)?;

                f.write_str("'")
            }
        }
    }
}

impl Error for HeaderParsingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`HeaderParsingError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum HeaderParsingErrorType {
    /// Expected header is missing.
    Missing {
        /// Name of the header that should be present in the list.
        name: HeaderName,
    },
    /// Header value is not UTF-8 valid.
    NotUtf8 {
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: Vec<u8>,
    },
    /// Header value is not of the expected type.
    Parsing {
        /// Type of header value expected.
        kind: HeaderType,
        /// Name of the header.
        name: HeaderName,
        /// Value of the header.
        value: String,
    },
}

/// Typed name of a ratelimit header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderName {
    /// Opaque identity of the ratelimit bucket.
    Bucket,
    /// Whether a 429 applies to all requests for the credentials.
    Global,
    /// Maximum requests allotted in the bucket's window.
    Limit,
    /// Requests remaining in the window.
    Remaining,
    /// Seconds until the bucket resets.
    ResetAfter,
    /// Epoch seconds at which the bucket resets.
    Reset,
    /// Seconds until a globally limited request may be retried.
    RetryAfter,
}

impl HeaderName {
    /// Lowercased name for the bucket header.
    pub const BUCKET: &'static str = "x-ratelimit-bucket";

    /// Lowercased name for the global header.
    pub const GLOBAL: &'static str = "x-ratelimit-global";

    /// Lowercased name for the limit header.
    pub const LIMIT: &'static str = "x-ratelimit-limit";

    /// Lowercased name for the remaining header.
    pub const REMAINING: &'static str = "x-ratelimit-remaining";

    /// Lowercased name for the reset-after header.
    pub const RESET_AFTER: &'static str = "x-ratelimit-reset-after";

    /// Lowercased name for the reset header.
    pub const RESET: &'static str = "x-ratelimit-reset";

    /// Lowercased name for the retry-after header.
    // It's correct for this to not have the `x-ratelimit-` prefix.
    pub const RETRY_AFTER: &'static str = "retry-after";

    /// Lowercased name of the header.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucket => Self::BUCKET,
            Self::Global => Self::GLOBAL,
            Self::Limit => Self::LIMIT,
            Self::Remaining => Self::REMAINING,
            Self::ResetAfter => Self::RESET_AFTER,
            Self::Reset => Self::RESET,
            Self::RetryAfter => Self::RETRY_AFTER,
        }
    }
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Expected type of a header value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderType {
    /// Type of header value is a bool.
    Bool,
    /// Type of header value is a float.
    Float,
    /// Type of header value is an integer.
    Integer,
}

impl HeaderType {
    /// Name of the type of header.
    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Integer => "integer",
        }
    }
}

impl Display for HeaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Ratelimit applying to all requests for the credentials.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GlobalLimited {
    /// Milliseconds until requests may be sent again.
    reset_after: u64,
}

impl GlobalLimited {
    /// Milliseconds until requests may be sent again.
    #[must_use]
    pub const fn reset_after(&self) -> u64 {
        self.reset_after
    }
}

/// Bucketed ratelimit information of a response.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Present {
    /// Opaque bucket identity, if the API provided one.
    bucket: Option<String>,
    /// Total number of requests allotted in a window.
    limit: u64,
    /// Number of requests remaining in the window.
    remaining: u64,
    /// When the window resets as a Unix timestamp in milliseconds.
    reset: Option<u64>,
    /// Milliseconds until the window resets.
    reset_after: Option<u64>,
}

impl Present {
    /// Immutable reference to the bucket identity.
    ///
    /// The API documents the bucket header as always present, but omits it on
    /// some error paths; callers must treat its absence as an anomaly rather
    /// than a failure.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Consume the headers, returning the owned bucket identity if available.
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn into_bucket(self) -> Option<String> {
        self.bucket
    }

    /// Total number of requests allotted in a window.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Number of requests remaining in the window.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// When the window resets as a Unix timestamp in milliseconds, if sent.
    #[must_use]
    pub const fn reset(&self) -> Option<u64> {
        self.reset
    }

    /// Milliseconds until the window resets, if sent.
    #[must_use]
    pub const fn reset_after(&self) -> Option<u64> {
        self.reset_after
    }

    /// Instant at which the window resets.
    ///
    /// With `prefer_relative` the reset-after duration is anchored to
    /// `received_at`, which is robust against local clock skew; otherwise the
    /// absolute reset timestamp is converted via the system clock. Whichever
    /// form is preferred, the other is the fallback.
    #[must_use]
    pub fn reset_instant(&self, prefer_relative: bool, received_at: Instant) -> Option<Instant> {
        let relative = self
            .reset_after
            .map(|after| received_at + Duration::from_millis(after));
        let absolute = self.reset.and_then(|reset| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;

            #[allow(clippy::cast_possible_truncation)]
            let millis = reset.saturating_sub(now.as_millis() as u64);

            Some(Instant::now() + Duration::from_millis(millis))
        });

        if prefer_relative {
            relative.or(absolute)
        } else {
            absolute.or(relative)
        }
    }
}

/// Parsed ratelimit headers.
///
/// The headers of a response may either indicate a global ratelimit, a
/// bucketed ratelimit, or no ratelimit at all.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RatelimitHeaders {
    /// Ratelimit applying to all requests for the credentials.
    GlobalLimited(GlobalLimited),
    /// No ratelimit headers present.
    None,
    /// Bucketed ratelimit information is available.
    Present(Present),
}

impl RatelimitHeaders {
    /// Whether the ratelimit headers are a global ratelimit.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::GlobalLimited(_))
    }

    /// Whether there are no ratelimit headers.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether the ratelimit headers are present and not a global ratelimit.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Parse headers from an iterator of name-value pairs.
    ///
    /// Names are matched case-insensitively; values *may* be UTF-8 valid and
    /// are checked prior to parsing.
    ///
    /// # Errors
    ///
    /// Returns an error when a required header is missing or a header value
    /// is of an invalid type. A missing bucket header is not an error; it is
    /// surfaced as [`Present::bucket`] being `None`.
    pub fn from_pairs<'a>(
        headers: impl Iterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<Self, HeaderParsingError> {
        let mut bucket = None;
        let mut global = false;
        let mut limit = None;
        let mut remaining = None;
        let mut reset = None;
        let mut reset_after = None;
        let mut retry_after = None;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case(HeaderName::BUCKET) {
                bucket.replace(text(HeaderName::Bucket, value)?.to_owned());
            } else if name.eq_ignore_ascii_case(HeaderName::GLOBAL) {
                global = parse(HeaderType::Bool, HeaderName::Global, value)?;
            } else if name.eq_ignore_ascii_case(HeaderName::LIMIT) {
                limit.replace(parse(HeaderType::Integer, HeaderName::Limit, value)?);
            } else if name.eq_ignore_ascii_case(HeaderName::RESET) {
                reset.replace(millis(HeaderName::Reset, value)?);
            } else if name.eq_ignore_ascii_case(HeaderName::REMAINING) {
                remaining.replace(parse(HeaderType::Integer, HeaderName::Remaining, value)?);
            } else if name.eq_ignore_ascii_case(HeaderName::RESET_AFTER) {
                reset_after.replace(millis(HeaderName::ResetAfter, value)?);
            } else if name.eq_ignore_ascii_case(HeaderName::RETRY_AFTER) {
                retry_after.replace(parse::<u64>(HeaderType::Integer, HeaderName::RetryAfter, value)?);
            }
        }

        if global {
            let reset_after = retry_after
                .map(|seconds| seconds * 1000)
                .or(reset_after)
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::RetryAfter))?;

            return Ok(RatelimitHeaders::GlobalLimited(GlobalLimited {
                reset_after,
            }));
        }

        // If none of the values have been set then there are no ratelimit
        // headers, meaning the route is not ratelimited.
        if bucket.is_none()
            && limit.is_none()
            && remaining.is_none()
            && reset.is_none()
            && reset_after.is_none()
        {
            return Ok(RatelimitHeaders::None);
        }

        if reset.is_none() && reset_after.is_none() {
            return Err(HeaderParsingError::missing(HeaderName::ResetAfter));
        }

        Ok(RatelimitHeaders::Present(Present {
            bucket,
            limit: limit.ok_or_else(|| HeaderParsingError::missing(HeaderName::Limit))?,
            remaining: remaining
                .ok_or_else(|| HeaderParsingError::missing(HeaderName::Remaining))?,
            reset,
            reset_after,
        }))
    }
}

/// Parse a header value into its expected type.
fn parse<T>(kind: HeaderType, name: HeaderName, value: &[u8]) -> Result<T, HeaderParsingError>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    let text = text(name, value)?;

    text.parse().map_err(|source| HeaderParsingError {
        kind: HeaderParsingErrorType::Parsing {
            kind,
            name,
            value: text.to_owned(),
        },
        source: Some(Box::new(source)),
    })
}

/// Parse a duration header given in seconds, normalizing to milliseconds.
///
/// Values may be integers or decimals; fractions round up so a window is
/// never considered over early.
fn millis(name: HeaderName, value: &[u8]) -> Result<u64, HeaderParsingError> {
    let seconds: f64 = parse(HeaderType::Float, name, value)?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (seconds * 1000.).ceil() as u64;

    Ok(millis)
}

/// Decode a header value expected to be UTF-8 valid.
fn text(name: HeaderName, value: &[u8]) -> Result<&str, HeaderParsingError> {
    match str::from_utf8(value) {
        Ok(text) => Ok(text),
        Err(source) => Err(HeaderParsingError::not_utf8(name, value.to_owned(), source)),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        GlobalLimited, HeaderName, HeaderParsingError, HeaderParsingErrorType, HeaderType, Present,
        RatelimitHeaders,
    };
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{
        error::Error,
        fmt::{Debug, Display},
        time::{Duration, Instant},
    };

    assert_fields!(HeaderParsingErrorType::Missing: name);
    assert_fields!(HeaderParsingErrorType::NotUtf8: name, value);
    assert_fields!(HeaderParsingErrorType::Parsing: kind, name, value);
    assert_impl_all!(
        HeaderName: Clone,
        Copy,
        Debug,
        Display,
        Eq,
        PartialEq,
        Send,
        Sync
    );
    assert_impl_all!(HeaderParsingErrorType: Debug, Send, Sync);
    assert_impl_all!(HeaderParsingError: Error, Send, Sync);
    assert_impl_all!(HeaderType: Clone, Copy, Debug, Display, Eq, PartialEq, Send, Sync);
    assert_impl_all!(GlobalLimited: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Present: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(RatelimitHeaders: Clone, Debug, Send, Sync);

    fn parse(pairs: &[(&str, &str)]) -> Result<RatelimitHeaders, HeaderParsingError> {
        RatelimitHeaders::from_pairs(
            pairs
                .iter()
                .map(|(name, value)| (*name, value.as_bytes())),
        )
    }

    #[test]
    fn global() {
        let headers = parse(&[("x-ratelimit-global", "true"), ("retry-after", "65")]).unwrap();

        assert!(matches!(
            headers,
            RatelimitHeaders::GlobalLimited(g) if g.reset_after() == 65_000
        ));
    }

    #[test]
    fn global_reset_after_fallback() {
        let headers = parse(&[
            ("x-ratelimit-global", "true"),
            ("x-ratelimit-reset-after", "2.0"),
        ])
        .unwrap();

        assert!(matches!(
            headers,
            RatelimitHeaders::GlobalLimited(g) if g.reset_after() == 2000
        ));
    }

    #[test]
    fn global_without_wait_errors() {
        let err = parse(&[("x-ratelimit-global", "true")]).unwrap_err();

        assert!(matches!(
            err.kind(),
            HeaderParsingErrorType::Missing {
                name: HeaderName::RetryAfter
            }
        ));
    }

    #[test]
    fn present() {
        let headers = parse(&[
            ("x-ratelimit-limit", "10"),
            ("x-ratelimit-remaining", "9"),
            ("x-ratelimit-reset", "1470173023.123"),
            ("x-ratelimit-reset-after", "64.57"),
            ("x-ratelimit-bucket", "abcd1234"),
        ])
        .unwrap();

        let present = match headers {
            RatelimitHeaders::Present(present) => present,
            other => panic!("expected present headers: {other:?}"),
        };

        assert_eq!(Some("abcd1234"), present.bucket());
        assert_eq!(10, present.limit());
        assert_eq!(9, present.remaining());
        assert_eq!(Some(64_570), present.reset_after());
        assert_eq!(Some(1_470_173_023_123), present.reset());
    }

    #[test]
    fn present_without_bucket_tolerated() {
        let headers = parse(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-reset-after", "1.000"),
        ])
        .unwrap();

        assert!(matches!(
            headers,
            RatelimitHeaders::Present(p) if p.bucket().is_none() && p.remaining() == 4
        ));
    }

    #[test]
    fn present_without_any_reset_errors() {
        let err = parse(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
        ])
        .unwrap_err();

        assert!(matches!(
            err.kind(),
            HeaderParsingErrorType::Missing {
                name: HeaderName::ResetAfter
            }
        ));
    }

    #[test]
    fn names_matched_case_insensitively() {
        let headers = parse(&[
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset-After", "1.5"),
            ("X-RateLimit-Bucket", "B1"),
        ])
        .unwrap();

        assert!(matches!(
            headers,
            RatelimitHeaders::Present(p) if p.bucket() == Some("B1") && p.reset_after() == Some(1500)
        ));
    }

    #[test]
    fn no_headers_is_none() {
        let headers = parse(&[("content-type", "application/json")]).unwrap();

        assert!(headers.is_none());
    }

    #[test]
    fn reset_instant_prefers_configured_form() {
        let received_at = Instant::now();
        let present = match parse(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "10.0"),
        ])
        .unwrap()
        {
            RatelimitHeaders::Present(present) => present,
            other => panic!("expected present headers: {other:?}"),
        };

        let relative = present.reset_instant(true, received_at).unwrap();
        assert_eq!(Duration::from_secs(10), relative - received_at);

        // No absolute reset was sent, so the relative form is the fallback.
        let fallback = present.reset_instant(false, received_at).unwrap();
        assert_eq!(relative, fallback);
    }
}
