//! The `HttpTransport` trait — the one primitive the core needs from its host.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};

/// Sends one concrete HTTP request.
///
/// Implementations report a received response as `Ok` whatever its status;
/// only failures to obtain a response are `Err`. Timeouts are enforced by the
/// caller, per strategy.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn HttpTransport>`.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Identifier used in logs.
    fn name(&self) -> &str {
        "http"
    }
}
