//! Delivery strategies and their per-attempt results.
//!
//! Each strategy is one concrete way of delivering a [`RequestSpec`]. A
//! strategy either produces a plan (the HTTP request to send, plus how to
//! read the answer) or declares itself not applicable to the request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::normalize::{split_segments, Normalizer};
use crate::request::{HttpRequest, HttpResponse, Method, RequestSpec};

// ─── StrategyKind ─────────────────────────────────────────────────────────────

/// The strategies, in canonical chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Same-origin shortcut route for single resources fetched by id.
    DirectRoute,
    /// The normalized URL, as is.
    Direct,
    /// The same request through the same-origin relay.
    Relay,
    /// Singular/plural alternate of the collection name.
    AlternateName,
    /// Fetch the owning collection and pick the item by id.
    ListAndFilter,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        Self::DirectRoute,
        Self::Direct,
        Self::Relay,
        Self::AlternateName,
        Self::ListAndFilter,
    ];

    /// 1-based position in the chain.
    pub fn id(&self) -> u8 {
        match self {
            Self::DirectRoute => 1,
            Self::Direct => 2,
            Self::Relay => 3,
            Self::AlternateName => 4,
            Self::ListAndFilter => 5,
        }
    }

    fn bit(&self) -> u8 {
        1 << (self.id() - 1)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DirectRoute => "direct_route",
            Self::Direct => "direct",
            Self::Relay => "relay",
            Self::AlternateName => "alternate_name",
            Self::ListAndFilter => "list_and_filter",
        };
        f.write_str(s)
    }
}

// ─── StrategySet ──────────────────────────────────────────────────────────────

/// The strategies enabled for a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategySet(u8);

impl StrategySet {
    pub fn all() -> Self {
        Self(0b1_1111)
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn only(kinds: &[StrategyKind]) -> Self {
        Self(kinds.iter().fold(0, |acc, k| acc | k.bit()))
    }

    pub fn with(self, kind: StrategyKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn without(self, kind: StrategyKind) -> Self {
        Self(self.0 & !kind.bit())
    }

    pub fn contains(&self, kind: StrategyKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Enabled strategies in chain order.
    pub fn iter(self) -> impl Iterator<Item = StrategyKind> {
        StrategyKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::all()
    }
}

// ─── StrategyResult ───────────────────────────────────────────────────────────

/// Outcome of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyResult {
    pub strategy_id: u8,
    pub kind: StrategyKind,
    pub succeeded: bool,
    pub status_code: Option<u16>,
    pub payload: Option<Vec<u8>>,
    pub error: Option<TransportError>,
}

impl StrategyResult {
    pub fn succeeded(kind: StrategyKind, status: u16, payload: Vec<u8>) -> Self {
        Self {
            strategy_id: kind.id(),
            kind,
            succeeded: true,
            status_code: Some(status),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(strategy_id: u8, kind: StrategyKind, error: TransportError) -> Self {
        Self {
            strategy_id,
            kind,
            succeeded: false,
            status_code: error.http_status(),
            payload: None,
            error: Some(error),
        }
    }
}

// ─── Routes ───────────────────────────────────────────────────────────────────

/// Where each strategy sends its request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Backend API base URL.
    pub api_base: String,
    /// Same-origin relay base URL, if the host application serves one.
    pub relay_base: Option<String>,
    /// Collection → same-origin URL template containing `{id}`. Used verbatim.
    pub direct_routes: BTreeMap<String, String>,
    /// Collection name → its singular/plural alternate. Looked up both ways.
    pub aliases: BTreeMap<String, String>,
}

impl RouteConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Default::default()
        }
    }

    pub fn with_relay(mut self, relay_base: impl Into<String>) -> Self {
        self.relay_base = Some(relay_base.into());
        self
    }

    pub fn with_direct_route(mut self, collection: impl Into<String>, template: impl Into<String>) -> Self {
        self.direct_routes.insert(collection.into(), template.into());
        self
    }

    pub fn with_alias(mut self, name: impl Into<String>, alternate: impl Into<String>) -> Self {
        self.aliases.insert(name.into(), alternate.into());
        self
    }

    fn alternate_of(&self, name: &str) -> Option<&str> {
        if let Some(alt) = self.aliases.get(name) {
            return Some(alt);
        }
        self.aliases
            .iter()
            .find(|(_, alt)| alt.as_str() == name)
            .map(|(k, _)| k.as_str())
    }
}

// ─── Plans ────────────────────────────────────────────────────────────────────

/// How a strategy's response is turned into a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Acceptance {
    /// 2xx with a JSON (or empty) body.
    Json,
    /// 2xx collection; select the element with this id.
    FilterById(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub request: HttpRequest,
    pub acceptance: Acceptance,
}

/// `<collection>/<numeric id>` split of a relative path.
fn resource_by_id(segments: &[&str]) -> Option<(String, String)> {
    match segments {
        [collection, id] if id.bytes().all(|b| b.is_ascii_digit()) => {
            Some((collection.to_string(), id.to_string()))
        }
        _ => None,
    }
}

/// Relative path segments of `spec`, query removed, shared base prefix removed.
fn relative_segments<'a>(normalizer: &Normalizer, base: &str, path: &'a str) -> (Vec<&'a str>, Option<&'a str>) {
    let (path, query) = match path.trim().split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path.trim(), None),
    };
    let mut segments = split_segments(path);
    let normalized_base = normalizer.normalize_base(base);
    let base_last = split_segments(
        normalized_base
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, p)| p)
            .unwrap_or(""),
    )
    .last()
    .map(|s| s.to_string());
    if let (Some(first), Some(last)) = (segments.first(), base_last.as_deref()) {
        if *first == last {
            segments.remove(0);
        }
    }
    (segments, query)
}

fn join_path(segments: &[&str], query: Option<&str>) -> String {
    let mut path = segments.join("/");
    if let Some(q) = query {
        path.push('?');
        path.push_str(q);
    }
    path
}

/// Build the plan for `kind`, or `None` if it does not apply to `spec`.
pub(crate) fn plan(
    kind: StrategyKind,
    spec: &RequestSpec,
    routes: &RouteConfig,
    normalizer: &Normalizer,
    headers: &BTreeMap<String, String>,
) -> Option<Plan> {
    let (segments, query) = relative_segments(normalizer, &routes.api_base, &spec.endpoint_path);
    let forward = |url: String| Plan {
        request: HttpRequest {
            method: spec.method,
            url,
            headers: headers.clone(),
            body: spec.body.clone(),
        },
        acceptance: Acceptance::Json,
    };

    match kind {
        StrategyKind::DirectRoute => {
            if spec.method != Method::Get {
                return None;
            }
            let (collection, id) = resource_by_id(&segments)?;
            let template = routes.direct_routes.get(&collection)?;
            Some(forward(template.replace("{id}", &id)))
        }
        StrategyKind::Direct => Some(forward(normalizer.normalize(&routes.api_base, &spec.endpoint_path))),
        StrategyKind::Relay => {
            let relay = routes.relay_base.as_deref()?;
            Some(forward(normalizer.normalize(relay, &join_path(&segments, query))))
        }
        StrategyKind::AlternateName => {
            let (first, rest) = segments.split_first()?;
            let alternate = routes.alternate_of(first)?;
            let mut swapped = vec![alternate];
            swapped.extend_from_slice(rest);
            Some(forward(normalizer.normalize(&routes.api_base, &join_path(&swapped, query))))
        }
        StrategyKind::ListAndFilter => {
            if !spec.method.is_idempotent_read() {
                return None;
            }
            let (collection, id) = resource_by_id(&segments)?;
            let url = normalizer.normalize(&routes.api_base, &collection);
            Some(Plan {
                request: HttpRequest {
                    method: Method::Get,
                    url,
                    headers: headers.clone(),
                    body: None,
                },
                acceptance: Acceptance::FilterById(id),
            })
        }
    }
}

/// Turn a received response into a payload body, or a failure.
pub(crate) fn accept(acceptance: &Acceptance, response: HttpResponse) -> Result<Vec<u8>, TransportError> {
    if !response.is_success() {
        return Err(TransportError::status(response.status, response.text()));
    }
    match acceptance {
        Acceptance::Json => {
            if !response.body.iter().all(u8::is_ascii_whitespace) {
                serde_json::from_slice::<Value>(&response.body)
                    .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
            }
            Ok(response.body)
        }
        Acceptance::FilterById(id) => filter_collection(&response.body, id),
    }
}

/// Pick the element whose `id` matches from a bare array or a
/// `{ "data": [...] }` envelope. Enveloped results keep the envelope shape.
fn filter_collection(body: &[u8], id: &str) -> Result<Vec<u8>, TransportError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| TransportError::InvalidPayload(e.to_string()))?;

    let (items, enveloped) = match &value {
        Value::Array(items) => (items, false),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => (items, true),
            _ => {
                return Err(TransportError::InvalidPayload(
                    "collection is neither an array nor a data envelope".into(),
                ))
            }
        },
        _ => {
            return Err(TransportError::InvalidPayload(
                "collection is neither an array nor a data envelope".into(),
            ))
        }
    };

    let item = items
        .iter()
        .find(|item| id_matches(item.get("id"), id))
        .ok_or_else(|| TransportError::status(404, format!("id {id} not present in collection")))?;

    let out = if enveloped {
        serde_json::json!({ "success": true, "data": item })
    } else {
        item.clone()
    };
    serde_json::to_vec(&out).map_err(|e| TransportError::Other(e.to_string()))
}

fn id_matches(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::Number(n)) => n.to_string() == id,
        Some(Value::String(s)) => s == id,
        _ => false,
    }
}
