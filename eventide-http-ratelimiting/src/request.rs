//! Identities for requests as the ratelimiter sees them.
//!
//! A [`RouteKey`] is the client-side identity of a request before the
//! server-side bucket is known: the HTTP method plus the request path with
//! every non-major snowflake collapsed to a placeholder. Two requests to the
//! same channel but different messages share a key; two requests to different
//! channels do not.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::atomic::{AtomicU64, Ordering},
};

/// Path roots whose immediately following ID scopes a ratelimit bucket.
///
/// Discord documents exactly these: `guild_id`, `channel_id` and
/// `webhook_id` (combined with the webhook token, which is a non-snowflake
/// segment and therefore kept verbatim).
const MAJOR_PARAMETERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Placeholder substituted for non-major snowflakes in a path.
const ID_PLACEHOLDER: &str = "{id}";

/// HTTP method of a request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Method {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl Method {
    /// Name of the method, such as `GET`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }

    /// Convert the method into the `http` crate's equivalent.
    #[must_use]
    pub fn into_http(self) -> http::Method {
        match self {
            Self::Delete => http::Method::DELETE,
            Self::Get => http::Method::GET,
            Self::Patch => http::Method::PATCH,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Opaque identifier of a logical request invocation.
///
/// Identifiers are preserved across retries of the same logical call, which
/// is how the ratelimiter tells a retry apart from a new invocation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(u64);

impl RequestId {
    /// Create an identifier from a caller-provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate a process-wide unique identifier.
    #[must_use]
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Inner value of the identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

/// Provisional ratelimit identity of a request.
///
/// Keys with equal methods and equal bucket paths are ratelimited together
/// until a response binds them to a server-side bucket.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RouteKey {
    method: Method,
    bucket: Box<str>,
}

impl RouteKey {
    /// Derive the key for a request.
    ///
    /// The path must be relative to the API root, without a leading slash.
    /// Query strings are ignored. Snowflake segments that do not directly
    /// follow a major parameter root are replaced with `{id}`:
    ///
    /// ```
    /// use eventide_http_ratelimiting::request::{Method, RouteKey};
    ///
    /// let key = RouteKey::new(Method::Delete, "channels/100/messages/200");
    ///
    /// assert_eq!("channels/100/messages/{id}", key.path());
    /// ```
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let path = path.split('?').next().unwrap_or("");
        let mut bucket = String::with_capacity(path.len());
        let mut previous: Option<&str> = None;

        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if previous.is_some() {
                bucket.push('/');
            }

            let major = matches!(previous, Some(root) if MAJOR_PARAMETERS.contains(&root));

            if is_snowflake(segment) && !major {
                bucket.push_str(ID_PLACEHOLDER);
            } else {
                bucket.push_str(segment);
            }

            previous = Some(segment);
        }

        Self {
            method,
            bucket: bucket.into(),
        }
    }

    /// Method of the route.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Bucket path of the route, with placeholders substituted.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.bucket
    }
}

impl Display for RouteKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.method.name())?;
        f.write_str(" ")?;

        f.write_str(&self.bucket)
    }
}

/// Whether a path segment is a snowflake ID.
fn is_snowflake(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::{Method, RequestId, RouteKey};
    use static_assertions::assert_impl_all;
    use std::{
        fmt::{Debug, Display},
        hash::Hash,
    };

    assert_impl_all!(Method: Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Send, Sync);
    assert_impl_all!(RequestId: Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Send, Sync);
    assert_impl_all!(RouteKey: Clone, Debug, Display, Eq, Hash, PartialEq, Send, Sync);

    #[test]
    fn method_name() {
        assert_eq!("DELETE", Method::Delete.name());
        assert_eq!("GET", Method::Get.name());
        assert_eq!("PATCH", Method::Patch.name());
        assert_eq!("POST", Method::Post.name());
        assert_eq!("PUT", Method::Put.name());
    }

    #[test]
    fn method_into_http() {
        assert_eq!(http::Method::GET, Method::Get.into_http());
        assert_eq!(http::Method::DELETE, Method::Delete.into_http());
    }

    #[test]
    fn unique_identifiers_differ() {
        assert_ne!(RequestId::unique(), RequestId::unique());
    }

    #[test]
    fn major_parameters_stay_concrete() {
        let key = RouteKey::new(Method::Get, "channels/100/messages/200");
        assert_eq!("channels/100/messages/{id}", key.path());

        let key = RouteKey::new(Method::Get, "guilds/1/members/2");
        assert_eq!("guilds/1/members/{id}", key.path());

        let key = RouteKey::new(Method::Get, "guilds/1/roles");
        assert_eq!("guilds/1/roles", key.path());
    }

    #[test]
    fn webhook_token_stays_concrete() {
        let key = RouteKey::new(Method::Post, "webhooks/5/aW52YWxpZA/messages/77");

        assert_eq!("webhooks/5/aW52YWxpZA/messages/{id}", key.path());
    }

    #[test]
    fn non_major_ids_collapse() {
        let key = RouteKey::new(Method::Get, "users/123456789");

        assert_eq!("users/{id}", key.path());
    }

    #[test]
    fn non_snowflake_segments_kept() {
        let key = RouteKey::new(Method::Get, "invites/abc123");

        assert_eq!("invites/abc123", key.path());
    }

    #[test]
    fn query_string_ignored() {
        let a = RouteKey::new(Method::Get, "guilds/1/members?limit=100");
        let b = RouteKey::new(Method::Get, "guilds/1/members");

        assert_eq!(a, b);
    }

    #[test]
    fn messages_with_same_channel_share_a_key() {
        let a = RouteKey::new(Method::Get, "channels/100/messages/1");
        let b = RouteKey::new(Method::Get, "channels/100/messages/2");
        let c = RouteKey::new(Method::Get, "channels/101/messages/1");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn methods_distinguish_keys() {
        let get = RouteKey::new(Method::Get, "channels/100/messages/1");
        let delete = RouteKey::new(Method::Delete, "channels/100/messages/1");

        assert_ne!(get, delete);
    }
}
