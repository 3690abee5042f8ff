//! Classification of HTTP responses into answer material.

use crate::{answer::RatelimitInfo, error::Error, request::ResponseParser};
use eventide_http_ratelimiting::headers::RatelimitHeaders;
use hyper::StatusCode;

/// What a completed HTTP exchange amounts to, before the caller's context is
/// attached.
pub(crate) enum Disposition<T> {
    /// Success; the body parsed.
    Respond {
        data: T,
        info: Option<RatelimitInfo>,
    },
    /// The API rejected the request with a 429.
    Ratelimited {
        global: bool,
        info: Option<RatelimitInfo>,
    },
    /// The exchange failed; the error may be retryable.
    Fail(Error),
}

/// Classify a response by status code.
///
/// A 429's body is not parsed; callers pass an empty body for it. A 204
/// reaches the parser as the empty slice, and a parser rejecting that empty
/// input makes the response an [`UnexpectedEmpty`] error.
///
/// [`UnexpectedEmpty`]: crate::error::ErrorType::UnexpectedEmpty
pub(crate) fn classify<T>(
    status: StatusCode,
    headers: Option<&RatelimitHeaders>,
    body: &[u8],
    parser: &ResponseParser<T>,
) -> Disposition<T> {
    let info = headers.and_then(RatelimitInfo::from_headers);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let global = headers.map_or(false, RatelimitHeaders::is_global);

        return Disposition::Ratelimited { global, info };
    }

    if status.is_success() {
        return match (parser)(body) {
            Ok(data) => Disposition::Respond { data, info },
            Err(source) => Disposition::Fail(if status == StatusCode::NO_CONTENT {
                Error::unexpected_empty(source)
            } else {
                Error::parsing(body.to_vec(), source)
            }),
        };
    }

    Disposition::Fail(Error::response(status, body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::{classify, Disposition};
    use crate::{
        error::ErrorType,
        request::{json_parser, ResponseParser},
    };
    use eventide_http_ratelimiting::headers::RatelimitHeaders;
    use hyper::StatusCode;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Channel {
        id: String,
        name: String,
    }

    fn headers(pairs: &[(&str, &str)]) -> RatelimitHeaders {
        RatelimitHeaders::from_pairs(pairs.iter().map(|(name, value)| (*name, value.as_bytes())))
            .unwrap()
    }

    fn channel_parser() -> ResponseParser<Channel> {
        json_parser()
    }

    #[test]
    fn success_parses_the_body() {
        let parsed = classify(
            StatusCode::OK,
            None,
            br#"{"id":"100","name":"c"}"#,
            &channel_parser(),
        );

        match parsed {
            Disposition::Respond { data, .. } => {
                assert_eq!("100", data.id);
                assert_eq!("c", data.name);
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn success_with_unparsable_body_fails_deterministically() {
        let parsed = classify(StatusCode::OK, None, b"not json", &channel_parser());

        match parsed {
            Disposition::Fail(error) => {
                assert!(matches!(error.kind(), ErrorType::Parsing { .. }));
                assert!(!error.retryable());
            }
            _ => panic!("expected a parse failure"),
        }
    }

    #[test]
    fn no_content_with_rejecting_parser_is_unexpected_empty() {
        let parsed = classify(StatusCode::NO_CONTENT, None, b"", &channel_parser());

        match parsed {
            Disposition::Fail(error) => {
                assert!(matches!(error.kind(), ErrorType::UnexpectedEmpty));
            }
            _ => panic!("expected an unexpected-empty failure"),
        }
    }

    #[test]
    fn too_many_requests_is_ratelimited() {
        let headers = headers(&[("x-ratelimit-global", "true"), ("retry-after", "2")]);
        let parsed = classify(
            StatusCode::TOO_MANY_REQUESTS,
            Some(&headers),
            b"",
            &channel_parser(),
        );

        match parsed {
            Disposition::Ratelimited { global, info } => {
                assert!(global);
                assert!(info.is_some());
            }
            _ => panic!("expected a ratelimited disposition"),
        }
    }

    #[test]
    fn route_local_429_is_not_global() {
        let headers = headers(&[
            ("x-ratelimit-bucket", "b1"),
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "1.0"),
        ]);
        let parsed = classify(
            StatusCode::TOO_MANY_REQUESTS,
            Some(&headers),
            b"",
            &channel_parser(),
        );

        assert!(matches!(
            parsed,
            Disposition::Ratelimited { global: false, .. },
        ));
    }

    #[test]
    fn other_statuses_carry_the_body() {
        let parsed = classify(StatusCode::NOT_FOUND, None, b"unknown channel", &channel_parser());

        match parsed {
            Disposition::Fail(error) => match error.kind() {
                ErrorType::Response { body, status } => {
                    assert_eq!(StatusCode::NOT_FOUND, *status);
                    assert_eq!(b"unknown channel".as_slice(), body.as_slice());
                }
                other => panic!("expected a response error: {other:?}"),
            },
            _ => panic!("expected a failure"),
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        let parsed = classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            b"",
            &channel_parser(),
        );

        match parsed {
            Disposition::Fail(error) => assert!(error.retryable()),
            _ => panic!("expected a failure"),
        }
    }
}
