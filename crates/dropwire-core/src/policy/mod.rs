//! Policy engine — retry and circuit breaker disciplines used by the executor.
//!
//! Applied per logical operation:
//! ```text
//! Call → [CircuitBreaker gate] → [RetryPolicy loop] → [StrategyChain]
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPhase, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};
