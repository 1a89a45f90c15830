//! dropwire-core — resilient access layer for a REST backend.
//!
//! # Overview
//!
//! Every backend call flows through four pieces:
//!
//! - [`Normalizer`] — canonical base URLs and per-endpoint trailing-slash policy
//! - [`StrategyChain`] — ordered fallback strategies (direct route, direct,
//!   relay, alternate name, list-and-filter), first success wins
//! - [`ResilienceContext`] — per-operation retry, circuit breaker and
//!   single-flight around the chain
//! - [`classify`] — maps transport failures to an [`ErrorRecord`] with a
//!   stable [`ErrorKind`] and a user-facing message
//!
//! The network itself sits behind [`HttpTransport`]; `dropwire-http` provides
//! the reqwest implementation.

pub mod cancel;
pub mod classify;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod normalize;
pub mod policy;
pub mod request;
pub mod strategy;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use classify::{classify, classify_exhausted};
pub use credential::{CredentialSource, SharedCredential, StaticCredential};
pub use dispatch::{DispatchFailure, Dispatched, DispatcherConfig, StrategyChain};
pub use error::{ErrorKind, ErrorRecord, TransportError};
pub use executor::{ResilienceConfig, ResilienceContext};
pub use normalize::{EndpointPolicy, Normalizer, NormalizerConfig, PathPattern, PolicyTable, TrailingSlash};
pub use request::{HttpRequest, HttpResponse, Method, Payload, RequestSpec};
pub use strategy::{RouteConfig, StrategyKind, StrategyResult, StrategySet};
pub use transport::HttpTransport;
