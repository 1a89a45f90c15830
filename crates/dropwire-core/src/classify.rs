//! Maps raw transport failures onto the [`ErrorKind`] taxonomy.
//!
//! Classification is deterministic: the same failure always yields the same
//! record. Error bodies in FastAPI's `{"detail": ...}` shape are unpacked into
//! the diagnostic message.

use serde_json::Value;

use crate::error::{ErrorKind, ErrorRecord, TransportError};
use crate::strategy::StrategyResult;

/// Classify one raw failure.
pub fn classify(failure: &TransportError) -> ErrorRecord {
    match failure {
        TransportError::Connect(msg) => {
            ErrorRecord::new(ErrorKind::NetworkUnreachable, None, format!("connection failed: {msg}"))
        }
        TransportError::Timeout { ms } => {
            ErrorRecord::new(ErrorKind::Timeout, None, format!("no response within {ms}ms"))
        }
        TransportError::CorsRejected(msg) => {
            ErrorRecord::new(ErrorKind::CorsRejected, None, format!("blocked by origin policy: {msg}"))
        }
        TransportError::Status { status, body } => {
            let kind = kind_for_status(*status);
            let diagnostic = match extract_detail(body) {
                Some(detail) => format!("HTTP {status}: {detail}"),
                None if body.is_empty() => format!("HTTP {status}"),
                None => format!("HTTP {status}: {}", truncate(body, 200)),
            };
            ErrorRecord::new(kind, Some(*status), diagnostic)
        }
        TransportError::InvalidPayload(msg) => {
            ErrorRecord::new(ErrorKind::Unknown, None, format!("unparseable payload: {msg}"))
        }
        TransportError::Cancelled => ErrorRecord::cancelled(),
        TransportError::Other(msg) => ErrorRecord::new(ErrorKind::Unknown, None, msg.clone()),
    }
}

/// Status code → kind, per the fixed table.
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        422 => ErrorKind::ValidationFailed,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

/// Pick the terminal record for an exhausted strategy chain.
///
/// The first failure carrying an HTTP status wins, since the backend itself
/// answered; otherwise the last failure does. The diagnostic message lists
/// every strategy's cause.
pub fn classify_exhausted(attempts: &[StrategyResult]) -> ErrorRecord {
    let failures: Vec<(&StrategyResult, &TransportError)> = attempts
        .iter()
        .filter_map(|a| a.error.as_ref().map(|e| (a, e)))
        .collect();

    let chosen = failures
        .iter()
        .find(|(_, e)| e.http_status().is_some())
        .or_else(|| failures.last());

    let Some((_, terminal)) = chosen else {
        return ErrorRecord::new(ErrorKind::Unknown, None, "no applicable strategy");
    };

    let mut record = classify(terminal);
    record.diagnostic_message = describe_attempts(attempts);
    record
}

/// One-line summary of every failed attempt, in chain order.
pub fn describe_attempts(attempts: &[StrategyResult]) -> String {
    attempts
        .iter()
        .filter_map(|a| {
            a.error
                .as_ref()
                .map(|e| format!("strategy {} ({}): {}", a.strategy_id, a.kind, classify(e).diagnostic_message))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) => Some(s.clone()),
        // 422 validation errors: [{"loc": [...], "msg": "...", "type": "..."}]
        Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let msg = item.get("msg")?.as_str()?;
                    let loc = item
                        .get("loc")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .map(|p| match p {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .collect::<Vec<_>>()
                                .join(".")
                        });
                    Some(match loc {
                        Some(loc) => format!("{loc}: {msg}"),
                        None => msg.to_string(),
                    })
                })
                .collect();
            (!msgs.is_empty()).then(|| msgs.join(", "))
        }
        other => Some(other.to_string()),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
