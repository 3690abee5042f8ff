use super::{Pipeline, ProducerGuard};
use crate::{
    config::Config,
    queue::IngressQueue,
    transport::{HyperTransport, Transport},
    worker::{self, PipelineState},
};
use eventide_http_ratelimiting::{Ratelimiter, RatelimiterConfig};
use std::sync::{atomic::AtomicBool, Arc, Mutex};
use tokio::sync::mpsc;

/// A builder for [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    config: Config,
    proxy: Option<Box<str>>,
    ratelimiter: Option<Ratelimiter>,
    token: Option<Box<str>>,
    transport: Option<Arc<dyn Transport>>,
    use_http: bool,
}

impl PipelineBuilder {
    /// Create a new builder to create a [`Pipeline`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the [`Pipeline`].
    ///
    /// Spawns the dispatch loop, and the ratelimiter's coordinator unless
    /// one was provided; must be called within a tokio runtime.
    pub fn build<T, C>(self) -> Pipeline<T, C>
    where
        T: Send + 'static,
        C: Send + Sync + 'static,
    {
        let config = self.config;

        let ratelimiter = self.ratelimiter.unwrap_or_else(|| {
            Ratelimiter::with_config(RatelimiterConfig {
                max_allowed_wait: config.max_allowed_wait,
                relative_time: config.relative_time,
                ..RatelimiterConfig::default()
            })
        });

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::new()));

        let state = Arc::new(PipelineState {
            config: config.clone(),
            proxy: self.proxy,
            ratelimiter,
            token: self.token,
            token_invalid: AtomicBool::new(false),
            transport,
            use_http: self.use_http,
        });

        let queue = IngressQueue::new(config.buffer_size.max(1), config.overflow);
        let (answer_tx, answer_rx) = mpsc::channel(config.buffer_size.max(1));

        tokio::spawn(worker::run(Arc::clone(&state), queue.clone()));

        Pipeline {
            answer_tx,
            answers: Arc::new(Mutex::new(Some(answer_rx))),
            guard: Arc::new(ProducerGuard {
                queue: queue.clone(),
            }),
            queue,
            state,
        }
    }

    /// Set the configuration to use.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;

        self
    }

    /// Set the proxy to use for all HTTP(S) requests.
    ///
    /// `use_http` selects plain HTTP towards the proxy, for proxies that
    /// terminate TLS themselves.
    #[must_use]
    pub fn proxy(mut self, proxy_url: String, use_http: bool) -> Self {
        self.proxy.replace(proxy_url.into_boxed_str());
        self.use_http = use_http;

        self
    }

    /// Set a ratelimiter to use, replacing the one the builder would create.
    ///
    /// Useful for sharing one ratelimiter between pipelines that use the
    /// same credentials.
    #[must_use]
    pub fn ratelimiter(mut self, ratelimiter: Ratelimiter) -> Self {
        self.ratelimiter.replace(ratelimiter);

        self
    }

    /// Set the token to use for HTTP requests.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        let mut token = token.into();

        let is_bot = token.starts_with("Bot ");
        let is_bearer = token.starts_with("Bearer ");

        // Make sure it is either a bot or bearer token, and assume it's a
        // bot token if no prefix is given.
        if !is_bot && !is_bearer {
            token.insert_str(0, "Bot ");
        }

        self.token.replace(token.into_boxed_str());

        self
    }

    /// Set the HTTP transport performing the sends.
    ///
    /// The default is a `hyper` client; tests substitute scripted
    /// transports.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport.replace(transport);

        self
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            proxy: None,
            ratelimiter: None,
            token: None,
            transport: None,
            use_http: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineBuilder;

    #[test]
    fn token_is_prefixed() {
        let builder = PipelineBuilder::new().token("abc123");
        assert_eq!(Some("Bot abc123"), builder.token.as_deref());

        let builder = PipelineBuilder::new().token("Bot abc123");
        assert_eq!(Some("Bot abc123"), builder.token.as_deref());

        let builder = PipelineBuilder::new().token("Bearer abc123");
        assert_eq!(Some("Bearer abc123"), builder.token.as_deref());
    }
}
