//! Ratelimit-aware REST request pipeline for the Discord API.
//!
//! The pipeline accepts caller-authored [`Request`]s, serializes them
//! against Discord's per-route and global ratelimits, dispatches them over
//! HTTPS with bounded concurrency, retries transient failures with jittered
//! backoff, and emits exactly one typed [`Answer`] per request.
//!
//! Resource models, the gateway and command handling are out of scope;
//! callers bring their own request catalog in the form of a method, a path,
//! an optional body and a response parser per request.
//!
//! # Examples
//!
//! Submit a request and await its answer:
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use eventide_http::{request::{json_parser, Request}, Pipeline};
//! use eventide_http_ratelimiting::request::Method;
//! use serde_json::Value;
//!
//! let pipeline: Pipeline<Value, ()> = Pipeline::new(std::env::var("DISCORD_TOKEN")?);
//!
//! let request = Request::new(Method::Get, "users/@me", json_parser(), ());
//! let answer = pipeline.submit(request).await?;
//! # let _ = answer; Ok(()) }
//! ```
//!
//! Or run in streaming mode, where answers arrive on a channel in completion
//! order with each request's context attached:
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use eventide_http::{request::{json_parser, Request}, Pipeline};
//! use eventide_http_ratelimiting::request::Method;
//! use serde_json::Value;
//!
//! let pipeline: Pipeline<Value, &str> = Pipeline::new("token");
//! let ingress = pipeline.ingress();
//! let mut answers = pipeline.answers().expect("first take");
//!
//! ingress
//!     .send(Request::new(Method::Get, "gateway/bot", json_parser(), "gateway"))
//!     .await;
//!
//! while let Some(answer) = answers.recv().await {
//!     println!("{} answered", answer.context());
//! }
//! # Ok(()) }
//! ```

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

pub mod answer;
pub mod client;
pub mod config;
pub mod error;
pub mod request;
pub mod transport;

mod queue;
mod response;
mod worker;

pub use self::{
    answer::{Answer, RatelimitInfo},
    client::{Ingress, Pipeline, PipelineBuilder},
    config::{Config, OverflowPolicy},
    error::{Error, ErrorType},
    request::Request,
    transport::Transport,
};
pub use eventide_http_ratelimiting::{
    request::{Method, RequestId, RouteKey},
    Ratelimiter,
};

/// Discord API version the pipeline speaks.
pub const API_VERSION: u8 = 10;
