//! Resilient request executor: retry, circuit breaker and single-flight for
//! named, repeatedly invoked operations.
//!
//! One [`ResilienceContext`] is built at startup and shared (by `Arc`) with
//! every caller. It owns one slot per operation name, created on first use:
//!
//! ```text
//! execute(op) → [credential?] → [circuit gate] → [join in-flight | start sequence]
//!     sequence: dispatch → success | non-retriable | sleep(2^n · base) → dispatch …
//! ```
//!
//! Only the terminal outcome of a sequence reaches callers. Circuit updates
//! and the release of the in-flight slot happen in one synchronous step after
//! the sequence ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cancel::CancelToken;
use crate::dispatch::StrategyChain;
use crate::error::{ErrorKind, ErrorRecord};
use crate::policy::{
    CircuitBreaker, CircuitBreakerConfig, CircuitPhase, CircuitState, RetryConfig, RetryPolicy,
};
use crate::request::{Payload, RequestSpec};

/// Configuration for the executor.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

type Outcome = Result<Payload, ErrorRecord>;
type SharedSequence = Shared<BoxFuture<'static, Outcome>>;

struct InFlight {
    id: u64,
    sequence: SharedSequence,
}

#[derive(Default)]
struct Flights {
    next_id: u64,
    running: Option<InFlight>,
}

struct OperationSlot {
    name: String,
    circuit: CircuitBreaker,
    flights: Mutex<Flights>,
}

impl OperationSlot {
    fn flights(&self) -> MutexGuard<'_, Flights> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Free the slot if sequence `id` still holds it.
    fn release(&self, id: u64) {
        let mut flights = self.flights();
        if flights.running.as_ref().is_some_and(|f| f.id == id) {
            flights.running = None;
        }
    }
}

/// Held by the caller that started a sequence. Dropping it before the
/// outcome arrives cancels the sequence and frees the slot.
struct Starter {
    slot: Arc<OperationSlot>,
    id: u64,
    cancel: CancelToken,
    finished: bool,
}

impl Drop for Starter {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
            self.slot.release(self.id);
        }
    }
}

/// How a retry sequence ended.
enum SequenceEnd {
    Delivered(Payload),
    /// Surfaced without touching the circuit (non-retriable or cancelled).
    Surfaced(ErrorRecord),
    /// Retry budget spent on retriable failures.
    Exhausted(ErrorRecord),
}

/// Process-wide resilience state and the entry point for callers.
pub struct ResilienceContext {
    chain: Arc<StrategyChain>,
    retry: RetryPolicy,
    circuit_config: CircuitBreakerConfig,
    operations: Mutex<HashMap<String, Arc<OperationSlot>>>,
}

impl ResilienceContext {
    pub fn new(chain: StrategyChain, config: ResilienceConfig) -> Self {
        Self {
            chain: Arc::new(chain),
            retry: RetryPolicy::new(config.retry),
            circuit_config: config.circuit_breaker,
            operations: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> &StrategyChain {
        &self.chain
    }

    /// Run `spec` as the named operation.
    pub async fn execute(&self, operation: &str, spec: RequestSpec) -> Outcome {
        self.execute_cancellable(operation, spec, &CancelToken::new()).await
    }

    /// Run `spec` as the named operation.
    ///
    /// `cancel` aborts this caller's wait. If this caller started the
    /// sequence, the sequence is cancelled too and joined callers observe
    /// `Cancelled`.
    pub async fn execute_cancellable(
        &self,
        operation: &str,
        spec: RequestSpec,
        cancel: &CancelToken,
    ) -> Outcome {
        if !self.chain.credential().is_present() {
            tracing::debug!(operation, "no credential; not sending");
            return Err(ErrorRecord::authentication_required());
        }

        let slot = self.slot(operation);
        let (sequence, mut starter) = {
            let mut flights = slot.flights();
            match flights.running.as_ref() {
                Some(running) => {
                    tracing::debug!(operation, "joining in-flight sequence");
                    (running.sequence.clone(), None)
                }
                None => {
                    if !slot.circuit.is_allowed() {
                        tracing::debug!(operation, "circuit open; rejecting");
                        return Err(ErrorRecord::circuit_open(operation));
                    }
                    // After cooldown the circuit admits one attempt and no retries.
                    let half_open = slot.circuit.phase() == CircuitPhase::HalfOpen;
                    if half_open {
                        tracing::info!(operation, "circuit half-open; single attempt");
                    }
                    let id = flights.next_id;
                    flights.next_id += 1;
                    let sequence_cancel = CancelToken::new();
                    let sequence = run_sequence(
                        self.chain.clone(),
                        self.retry.clone(),
                        slot.clone(),
                        id,
                        spec,
                        half_open,
                        sequence_cancel.clone(),
                    )
                    .boxed()
                    .shared();
                    flights.running = Some(InFlight {
                        id,
                        sequence: sequence.clone(),
                    });
                    let starter = Starter {
                        slot: slot.clone(),
                        id,
                        cancel: sequence_cancel,
                        finished: false,
                    };
                    (sequence, Some(starter))
                }
            }
        };

        tokio::select! {
            outcome = sequence => {
                if let Some(starter) = starter.as_mut() {
                    starter.finished = true;
                }
                outcome
            }
            _ = cancel.cancelled() => Err(ErrorRecord::cancelled()),
        }
    }

    /// Snapshot of an operation's circuit, if the operation has been used.
    pub fn circuit(&self, operation: &str) -> Option<CircuitState> {
        self.operations().get(operation).map(|slot| slot.circuit.snapshot())
    }

    /// Clear an operation's circuit.
    pub fn reset(&self, operation: &str) {
        if let Some(slot) = self.operations().get(operation) {
            slot.circuit.reset();
            tracing::info!(operation, "circuit reset");
        }
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<String, Arc<OperationSlot>>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, operation: &str) -> Arc<OperationSlot> {
        self.operations()
            .entry(operation.to_string())
            .or_insert_with(|| {
                Arc::new(OperationSlot {
                    name: operation.to_string(),
                    circuit: CircuitBreaker::new(self.circuit_config.clone()),
                    flights: Mutex::new(Flights::default()),
                })
            })
            .clone()
    }
}

impl std::fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("chain", &self.chain)
            .field("retry", &self.retry)
            .field("operations", &self.operations().len())
            .finish()
    }
}

async fn run_sequence(
    chain: Arc<StrategyChain>,
    retry: RetryPolicy,
    slot: Arc<OperationSlot>,
    id: u64,
    spec: RequestSpec,
    half_open: bool,
    cancel: CancelToken,
) -> Outcome {
    let end = attempt_loop(&chain, &retry, &slot.name, &spec, half_open, &cancel).await;

    // Record and release together, with no suspension in between.
    let outcome = match end {
        SequenceEnd::Delivered(payload) => {
            slot.circuit.record_success();
            Ok(payload)
        }
        SequenceEnd::Exhausted(record) => {
            slot.circuit.record_failure();
            Err(record)
        }
        SequenceEnd::Surfaced(record) => Err(record),
    };
    slot.release(id);
    outcome
}

async fn attempt_loop(
    chain: &StrategyChain,
    retry: &RetryPolicy,
    operation: &str,
    spec: &RequestSpec,
    half_open: bool,
    cancel: &CancelToken,
) -> SequenceEnd {
    let enabled = chain.config().enabled;
    let mut attempt = 0u32;
    loop {
        let failure = match chain.dispatch_with(spec, enabled, cancel).await {
            Ok(dispatched) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt, "recovered after retry");
                }
                return SequenceEnd::Delivered(dispatched.payload);
            }
            Err(failure) => failure,
        };
        let record = failure.record;

        if record.kind == ErrorKind::Cancelled {
            return SequenceEnd::Surfaced(record);
        }
        if !record.retriable {
            tracing::debug!(operation, kind = %record.kind, "non-retriable failure");
            return SequenceEnd::Surfaced(record);
        }

        let delay = if spec.retryable && !half_open {
            retry.next_delay(attempt, record.kind)
        } else {
            None
        };
        let Some(delay) = delay else {
            tracing::error!(
                operation,
                attempt,
                error = %record,
                "max retries exceeded"
            );
            return SequenceEnd::Exhausted(record);
        };

        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %record,
            "retrying request"
        );
        tokio::select! {
            _ = cancel.cancelled() => return SequenceEnd::Surfaced(ErrorRecord::cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::credential::{SharedCredential, StaticCredential};
    use crate::credential::CredentialSource;
    use crate::dispatch::DispatcherConfig;
    use crate::error::TransportError;
    use crate::normalize::Normalizer;
    use crate::strategy::{RouteConfig, StrategyKind, StrategySet};
    use crate::testing::{Reply, ScriptedTransport};

    const OP: &str = "subscription.current";
    const URL: &str = "https://api.example.com/api/subscriptions/my";

    fn context_with(
        transport: Arc<ScriptedTransport>,
        credential: Arc<dyn CredentialSource>,
        config: ResilienceConfig,
    ) -> ResilienceContext {
        let chain = StrategyChain::new(
            Arc::new(Normalizer::default()),
            RouteConfig::new("https://api.example.com/api"),
            transport,
            credential,
            DispatcherConfig {
                enabled: StrategySet::only(&[StrategyKind::Direct]),
                ..Default::default()
            },
        );
        ResilienceContext::new(chain, config)
    }

    fn context(transport: Arc<ScriptedTransport>) -> ResilienceContext {
        context_with(transport, Arc::new(StaticCredential::new("tok")), ResilienceConfig::default())
    }

    fn spec() -> RequestSpec {
        RequestSpec::get("subscriptions/my")
    }

    /// Fail one full sequence (1 + max_retries attempts).
    async fn exhaust(ctx: &ResilienceContext) -> ErrorRecord {
        ctx.execute(OP, spec()).await.unwrap_err()
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_sends_nothing() {
        let t = ScriptedTransport::new(Reply::json("{}"));
        let ctx = context_with(t.clone(), Arc::new(StaticCredential::none()), ResilienceConfig::default());

        let err = ctx.execute(OP, spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthenticationRequired);
        assert_eq!(err.user_message, "Please sign in to continue");
        assert_eq!(t.total(), 0);
        assert!(ctx.circuit(OP).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn credential_read_at_call_time() {
        let t = ScriptedTransport::new(Reply::json("{}"));
        let cred = SharedCredential::new();
        let ctx = context_with(t.clone(), Arc::new(cred.clone()), ResilienceConfig::default());

        assert!(ctx.execute(OP, spec()).await.is_err());
        cred.set("fresh");
        assert!(ctx.execute(OP, spec()).await.is_ok());
        assert_eq!(t.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delays_double() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let ctx = context(t.clone());

        let err = exhaust(&ctx).await;
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(t.count(URL), 4, "1 try + 3 retries, none past max_retries");

        let at = t.sent_at();
        let gaps: Vec<u128> = at.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![1000, 2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_mid_sequence_and_resets() {
        let t = ScriptedTransport::new(Reply::json("{}"));
        t.script(URL, [
            Reply::Fail(TransportError::Connect("refused".into())),
            Reply::Fail(TransportError::Timeout { ms: 5 }),
            Reply::json(r#"{"plan":"pro"}"#),
        ]);
        let ctx = context(t.clone());

        let payload = ctx.execute(OP, spec()).await.unwrap();
        let v: serde_json::Value = payload.json().unwrap();
        assert_eq!(v["plan"], "pro");
        assert_eq!(t.count(URL), 3);
        assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_never_retried_and_circuit_untouched() {
        let t = ScriptedTransport::new(Reply::status(401, r#"{"detail":"Could not validate credentials"}"#));
        let ctx = context(t.clone());

        let err = ctx.execute(OP, spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(t.count(URL), 1);
        assert_eq!(ctx.circuit(OP).unwrap(), CircuitBreaker::new(CircuitBreakerConfig::default()).snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_spec_spends_no_budget() {
        let t = ScriptedTransport::new(Reply::status(500, ""));
        let ctx = context(t.clone());

        let err = ctx.execute(OP, spec().with_retryable(false)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(t.count(URL), 1);
        assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_threshold_then_cooldown_lets_one_through() {
        let t = ScriptedTransport::new(Reply::status(502, ""));
        let ctx = context(t.clone());

        for n in 1..=3 {
            exhaust(&ctx).await;
            assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, n);
        }
        assert!(ctx.circuit(OP).unwrap().open);
        let attempts_so_far = t.total();
        assert_eq!(attempts_so_far, 12);

        // Before cooldown: rejected, nothing sent.
        tokio::time::advance(Duration::from_millis(29_999)).await;
        let err = ctx.execute(OP, spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(err.user_message, "Service temporarily unavailable, retry later.");
        assert_eq!(t.total(), attempts_so_far);

        // After cooldown: exactly one attempt, which succeeds and closes.
        tokio::time::advance(Duration::from_millis(1)).await;
        t.script(URL, [Reply::json(r#"{"plan":"free"}"#)]);
        ctx.execute(OP, spec()).await.unwrap();
        assert_eq!(t.total(), attempts_so_far + 1);
        let state = ctx.circuit(OP).unwrap();
        assert!(!state.open);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_half_open_call_reopens() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let config = ResilienceConfig {
            retry: RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(5),
            },
        };
        let ctx = context_with(t.clone(), Arc::new(StaticCredential::new("tok")), config);

        exhaust(&ctx).await;
        let first_open = ctx.circuit(OP).unwrap().opened_at.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let err = ctx.execute(OP, spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        let state = ctx.circuit(OP).unwrap();
        assert!(state.open);
        assert!(state.opened_at.unwrap() > first_open);
        assert_eq!(ctx.execute(OP, spec()).await.unwrap_err().kind, ErrorKind::CircuitOpen);
        assert_eq!(t.total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_call_gets_no_retries() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let ctx = context(t.clone());

        for _ in 0..3 {
            exhaust(&ctx).await;
        }
        assert_eq!(t.total(), 12);
        let first_open = ctx.circuit(OP).unwrap().opened_at.unwrap();

        tokio::time::advance(Duration::from_millis(30_000)).await;
        let started = Instant::now();
        let err = ctx.execute(OP, spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(t.total(), 13, "one attempt, max_retries not spent");
        assert!(started.elapsed() < Duration::from_millis(1000), "no retry delay");

        let state = ctx.circuit(OP).unwrap();
        assert!(state.open);
        assert!(state.opened_at.unwrap() > first_open);
        assert_eq!(ctx.execute(OP, spec()).await.unwrap_err().kind, ErrorKind::CircuitOpen);
        assert_eq!(t.total(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_have_separate_circuits() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let config = ResilienceConfig {
            retry: RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        };
        let ctx = context_with(t.clone(), Arc::new(StaticCredential::new("tok")), config);

        exhaust(&ctx).await;
        assert!(ctx.circuit(OP).unwrap().open);
        let err = ctx.execute("usage.current", spec()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert!(ctx.circuit("usage.current").unwrap().open);
        assert_eq!(t.total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_open_circuit() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let config = ResilienceConfig {
            retry: RetryConfig {
                max_retries: 0,
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        };
        let ctx = context_with(t.clone(), Arc::new(StaticCredential::new("tok")), config);

        exhaust(&ctx).await;
        ctx.reset(OP);
        t.script(URL, [Reply::json("{}")]);
        assert!(ctx.execute(OP, spec()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_sequence() {
        let t = ScriptedTransport::new(Reply::json("{}"));
        t.script(URL, [Reply::status(503, ""), Reply::json(r#"{"plan":"team"}"#)]);
        let ctx = Arc::new(context(t.clone()));

        let first = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.execute(OP, spec()).await }
        });
        // Let the first call fail once and park in its retry delay.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(t.count(URL), 1);

        let second = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.execute(OP, spec()).await }
        });

        let (a, b) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(a, b);
        assert_eq!(a.unwrap().status, 200);
        assert_eq!(t.count(URL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_callers_share_failure() {
        let t = ScriptedTransport::new(Reply::status(500, ""));
        let ctx = context(t.clone());

        let (a, b) = tokio::join!(ctx.execute(OP, spec()), ctx.execute(OP, spec()));
        assert_eq!(a, b);
        assert_eq!(t.count(URL), 4);
        assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_attempt_is_not_a_failure() {
        let t = ScriptedTransport::new(Reply::Hang);
        let ctx = Arc::new(context(t.clone()));
        let token = CancelToken::new();

        let call = tokio::spawn({
            let ctx = ctx.clone();
            let token = token.clone();
            async move { ctx.execute_cancellable(OP, spec(), &token).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(t.count(URL), 1);
        assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, 0);

        // The slot is free again.
        t.script(URL, [Reply::json("{}")]);
        assert!(ctx.execute(OP, spec()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_retry_delay() {
        let t = ScriptedTransport::new(Reply::status(503, ""));
        let ctx = Arc::new(context(t.clone()));
        let token = CancelToken::new();

        let started = Instant::now();
        let call = tokio::spawn({
            let ctx = ctx.clone();
            let token = token.clone();
            async move { ctx.execute_cancellable(OP, spec(), &token).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(t.count(URL), 1);
        assert_eq!(ctx.circuit(OP).unwrap().consecutive_failures, 0);
    }
}
