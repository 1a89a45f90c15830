//! Endpoint normalizer: canonical base URLs and per-class trailing-slash policy.
//!
//! The backend redirects between `/x` and `/x/` inconsistently depending on
//! the endpoint class, and a redirect across origins loses the
//! `Authorization` header. The normalizer produces the exact form each class
//! is served under so no redirect is ever needed.
//!
//! All functions here are pure string transformations.

use serde::{Deserialize, Serialize};

/// Trailing separator policy for an endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingSlash {
    Required,
    Forbidden,
}

/// Static matcher over the segments of a relative API path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PathPattern {
    /// Last segment is a non-empty run of ASCII digits (`resumes/11`).
    NumericIdSuffix,
    /// First segment equals the given name (`auth/login`).
    Prefix(String),
    /// Last segment equals the given name (`resumes/11/duplicate`).
    LastSegment(String),
}

impl PathPattern {
    pub fn matches(&self, segments: &[&str]) -> bool {
        match self {
            Self::NumericIdSuffix => segments
                .last()
                .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())),
            Self::Prefix(name) => segments.first().is_some_and(|s| *s == name.as_str()),
            Self::LastSegment(name) => segments.last().is_some_and(|s| *s == name.as_str()),
        }
    }
}

/// One row of the policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    /// Endpoint class name, for logs and listings.
    pub class: String,
    pub pattern: PathPattern,
    pub trailing_slash: TrailingSlash,
}

impl EndpointPolicy {
    pub fn new(class: impl Into<String>, pattern: PathPattern, trailing_slash: TrailingSlash) -> Self {
        Self {
            class: class.into(),
            pattern,
            trailing_slash,
        }
    }
}

/// Ordered policy table. The first matching row decides; no match means
/// [`TrailingSlash::Required`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    policies: Vec<EndpointPolicy>,
}

impl PolicyTable {
    pub fn new(policies: Vec<EndpointPolicy>) -> Self {
        Self { policies }
    }

    pub fn policies(&self) -> &[EndpointPolicy] {
        &self.policies
    }

    /// First policy matching `segments`, if any.
    pub fn resolve(&self, segments: &[&str]) -> Option<&EndpointPolicy> {
        self.policies.iter().find(|p| p.pattern.matches(segments))
    }

    pub fn trailing_slash_for(&self, segments: &[&str]) -> TrailingSlash {
        self.resolve(segments)
            .map(|p| p.trailing_slash)
            .unwrap_or(TrailingSlash::Required)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        use PathPattern::*;
        use TrailingSlash::Forbidden;
        Self::new(vec![
            EndpointPolicy::new("id_suffixed", NumericIdSuffix, Forbidden),
            EndpointPolicy::new("auth", Prefix("auth".into()), Forbidden),
            EndpointPolicy::new("subscription", Prefix("subscriptions".into()), Forbidden),
            EndpointPolicy::new("duplicate", LastSegment("duplicate".into()), Forbidden),
            EndpointPolicy::new("clone", LastSegment("clone".into()), Forbidden),
        ])
    }
}

/// Normalizer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Keep `http://` for loopback hosts (local development backends).
    pub allow_insecure_loopback: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            allow_insecure_loopback: true,
        }
    }
}

/// Canonicalizes base URLs and endpoint paths against a [`PolicyTable`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    table: PolicyTable,
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(table: PolicyTable, config: NormalizerConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Join `base` and `path` into one canonical URL.
    ///
    /// An empty path treats `base` as a complete URL, see
    /// [`normalize_url`](Self::normalize_url).
    pub fn normalize(&self, base: &str, path: &str) -> String {
        let (path_part, query) = split_query(path.trim());
        let mut segments = split_segments(path_part);
        if segments.is_empty() && query.is_none() {
            return self.normalize_url(base);
        }
        let base = self.normalize_base(base);

        // Shared prefix, e.g. base `/api/` and path `api/resumes`: drop it once.
        if let (Some(first), Some(last)) = (segments.first(), last_base_segment(&base)) {
            if *first == last {
                segments.remove(0);
            }
        }

        if segments.is_empty() && query.is_none() {
            return base;
        }
        let mut url = base;
        url.push_str(&self.render_path(&segments, query));
        url
    }

    /// Canonical form of an already joined URL: the base repair of
    /// [`normalize_base`](Self::normalize_base), with the trailing `/` removed
    /// when the path belongs to a `Forbidden` class. The query is kept.
    ///
    /// The API root is not known here, so the policy is resolved against each
    /// path suffix in turn and the first match decides.
    pub fn normalize_url(&self, url: &str) -> String {
        let (without_query, query) = split_query(url.trim());
        let mut out = self.normalize_base(without_query);

        let forbidden = {
            let segments = url_path_segments(&out);
            (0..segments.len())
                .find_map(|i| self.table.resolve(&segments[i..]))
                .is_some_and(|p| p.trailing_slash == TrailingSlash::Forbidden)
        };
        if forbidden {
            out.pop();
        }
        if let Some(q) = query {
            out.push('?');
            out.push_str(q);
        }
        out
    }

    /// Canonical form of a base URL: secure scheme, collapsed duplicate
    /// host labels and path segments, exactly one trailing `/`.
    pub fn normalize_base(&self, base: &str) -> String {
        let base = base.trim();
        let (scheme_insecure, rest) = match base.find("://") {
            Some(idx) => {
                let scheme = &base[..idx];
                (!scheme.eq_ignore_ascii_case("https"), &base[idx + 3..])
            }
            None => (false, base),
        };
        let rest = split_query(rest).0;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = split_port(authority);
        let host = collapse_host(&host.to_ascii_lowercase());

        let scheme = if scheme_insecure && self.config.allow_insecure_loopback && is_loopback(&host) {
            "http"
        } else {
            "https"
        };

        let segments = collapse_repeats(split_segments(path));

        let mut out = format!("{scheme}://{host}");
        if let Some(port) = port {
            out.push(':');
            out.push_str(port);
        }
        out.push('/');
        if !segments.is_empty() {
            out.push_str(&segments.join("/"));
            out.push('/');
        }
        out
    }

    /// Canonical relative path: no leading `/`, no empty segments, trailing
    /// `/` per the class policy. Query strings are preserved.
    pub fn normalize_path(&self, path: &str) -> String {
        let (path_part, query) = split_query(path.trim());
        let segments = split_segments(path_part);
        if segments.is_empty() && query.is_none() {
            return String::new();
        }
        self.render_path(&segments, query)
    }

    fn render_path(&self, segments: &[&str], query: Option<&str>) -> String {
        let mut out = segments.join("/");
        if !segments.is_empty() && self.table.trailing_slash_for(segments) == TrailingSlash::Required {
            out.push('/');
        }
        if let Some(q) = query {
            out.push('?');
            out.push_str(q);
        }
        out
    }
}

/// Non-empty `/`-separated segments of a path.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn split_query(s: &str) -> (&str, Option<&str>) {
    match s.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (s, None),
    }
}

fn split_port(authority: &str) -> (&str, Option<&str>) {
    // `[::1]:8080`
    if authority.starts_with('[') {
        if let Some(end) = authority.find(']') {
            let host = &authority[..=end];
            let port = authority[end + 1..].strip_prefix(':');
            return (host, port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => (host, Some(port)),
        _ => (authority, None),
    }
}

fn collapse_host(host: &str) -> String {
    // IP literals are left alone: `10.0.0.1` is not a doubled label.
    if host.starts_with('[') || host.split('.').all(|l| l.bytes().all(|b| b.is_ascii_digit())) {
        return host.to_string();
    }
    collapse_repeats(host.split('.').collect()).join(".")
}

fn collapse_repeats(parts: Vec<&str>) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(parts.len());
    for p in parts {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

fn is_loopback(host: &str) -> bool {
    host == "localhost" || host == "[::1]" || host.starts_with("127.")
}

fn url_path_segments(normalized: &str) -> Vec<&str> {
    normalized
        .split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, path)| split_segments(path))
        .unwrap_or_default()
}

fn last_base_segment(normalized_base: &str) -> Option<&str> {
    url_path_segments(normalized_base).last().copied()
}
