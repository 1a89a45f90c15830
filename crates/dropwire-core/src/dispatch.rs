//! Strategy chain dispatcher: try each enabled strategy in order until one
//! succeeds.
//!
//! The dispatcher is stateless across calls. Every attempt is bounded by its
//! strategy's timeout, and a timeout is an ordinary failed attempt rather
//! than a fault escaping the chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::classify::{classify, classify_exhausted, describe_attempts};
use crate::credential::CredentialSource;
use crate::error::{ErrorKind, ErrorRecord, TransportError};
use crate::normalize::Normalizer;
use crate::request::{Payload, RequestSpec};
use crate::strategy::{self, RouteConfig, StrategyKind, StrategyResult, StrategySet};
use crate::transport::HttpTransport;

/// Configuration for the strategy chain.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Timeout per strategy attempt.
    pub strategy_timeout: Duration,
    /// Per-strategy overrides of `strategy_timeout`.
    pub timeouts: HashMap<StrategyKind, Duration>,
    /// Strategies enabled when the call site does not choose.
    pub enabled: StrategySet,
    /// Let a 404 fall through to later strategies instead of ending the chain.
    pub fallback_on_not_found: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy_timeout: Duration::from_secs(10),
            timeouts: HashMap::new(),
            enabled: StrategySet::all(),
            fallback_on_not_found: false,
        }
    }
}

impl DispatcherConfig {
    pub fn timeout_for(&self, kind: StrategyKind) -> Duration {
        self.timeouts.get(&kind).copied().unwrap_or(self.strategy_timeout)
    }
}

/// A delivered request.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub payload: Payload,
    pub attempts: Vec<StrategyResult>,
}

/// A request no strategy could deliver.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    /// Terminal classification for the caller.
    pub record: ErrorRecord,
    /// Every attempt, in order, for diagnostics.
    pub attempts: Vec<StrategyResult>,
}

/// Ordered multi-strategy request dispatcher.
pub struct StrategyChain {
    normalizer: Arc<Normalizer>,
    routes: RouteConfig,
    transport: Arc<dyn HttpTransport>,
    credential: Arc<dyn CredentialSource>,
    config: DispatcherConfig,
}

impl StrategyChain {
    pub fn new(
        normalizer: Arc<Normalizer>,
        routes: RouteConfig,
        transport: Arc<dyn HttpTransport>,
        credential: Arc<dyn CredentialSource>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            normalizer,
            routes,
            transport,
            credential,
            config,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn routes(&self) -> &RouteConfig {
        &self.routes
    }

    pub fn credential(&self) -> &dyn CredentialSource {
        self.credential.as_ref()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatch with the default strategy set.
    pub async fn dispatch(&self, spec: &RequestSpec) -> Result<Dispatched, DispatchFailure> {
        self.dispatch_with(spec, self.config.enabled, &CancelToken::new()).await
    }

    /// Dispatch with an explicit strategy set and cancellation token.
    pub async fn dispatch_with(
        &self,
        spec: &RequestSpec,
        enabled: StrategySet,
        cancel: &CancelToken,
    ) -> Result<Dispatched, DispatchFailure> {
        let headers = self.headers_for(spec);
        let mut attempts = Vec::new();

        for kind in enabled.iter() {
            let Some(plan) =
                strategy::plan(kind, spec, &self.routes, &self.normalizer, &headers)
            else {
                continue;
            };
            let timeout = self.config.timeout_for(kind);
            let url = plan.request.url.clone();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                sent = tokio::time::timeout(timeout, self.transport.send(plan.request)) => match sent {
                    Ok(Ok(resp)) => {
                        let status = resp.status;
                        strategy::accept(&plan.acceptance, resp).map(|body| (status, body))
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(TransportError::Timeout {
                        ms: timeout.as_millis() as u64,
                    }),
                },
            };

            match outcome {
                Ok((status, body)) => {
                    tracing::debug!(strategy = %kind, %url, status, "strategy succeeded");
                    attempts.push(StrategyResult::succeeded(kind, status, body.clone()));
                    return Ok(Dispatched {
                        payload: Payload {
                            strategy: kind,
                            status,
                            body,
                        },
                        attempts,
                    });
                }
                Err(TransportError::Cancelled) => {
                    tracing::debug!(strategy = %kind, %url, "attempt cancelled");
                    attempts.push(StrategyResult::failed(kind.id(), kind, TransportError::Cancelled));
                    return Err(DispatchFailure {
                        record: ErrorRecord::cancelled(),
                        attempts,
                    });
                }
                Err(e) => {
                    let record = classify(&e);
                    tracing::debug!(strategy = %kind, %url, error = %e, kind = %record.kind, "strategy failed");
                    let fall_back = self.may_fall_back(&e, &record);
                    attempts.push(StrategyResult::failed(kind.id(), kind, e));
                    if !fall_back {
                        let mut record = record;
                        record.diagnostic_message = describe_attempts(&attempts);
                        return Err(DispatchFailure { record, attempts });
                    }
                }
            }
        }

        let record = classify_exhausted(&attempts);
        tracing::warn!(
            path = %spec.endpoint_path,
            attempts = attempts.len(),
            kind = %record.kind,
            causes = %record.diagnostic_message,
            "all strategies failed"
        );
        Err(DispatchFailure { record, attempts })
    }

    /// Whether a failed attempt lets the chain continue.
    ///
    /// Only transient classes fall through. A 2xx with an unparseable body
    /// (an HTML page from a misrouted path) also does; so does 404 when
    /// `fallback_on_not_found` is set.
    fn may_fall_back(&self, error: &TransportError, record: &ErrorRecord) -> bool {
        record.retriable
            || matches!(error, TransportError::InvalidPayload(_))
            || (self.config.fallback_on_not_found && record.kind == ErrorKind::NotFound)
    }

    fn headers_for(&self, spec: &RequestSpec) -> BTreeMap<String, String> {
        let mut headers = spec.headers.clone();
        headers
            .entry("Accept".to_string())
            .or_insert_with(|| "application/json".to_string());
        if let Some(token) = self.credential.bearer_token() {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("transport", &self.transport.name())
            .field("routes", &self.routes)
            .field("config", &self.config)
            .finish()
    }
}
