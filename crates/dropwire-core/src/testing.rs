//! In-process transport with scripted replies per URL.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::request::{HttpRequest, HttpResponse};
use crate::transport::HttpTransport;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Respond(u16, String),
    Fail(TransportError),
    /// Never answers.
    Hang,
}

impl Reply {
    pub(crate) fn status(status: u16, body: &str) -> Self {
        Self::Respond(status, body.to_string())
    }

    pub(crate) fn json(body: &str) -> Self {
        Self::Respond(200, body.to_string())
    }
}

#[derive(Default)]
struct Script {
    /// Replies per URL; the last one repeats.
    routes: HashMap<String, VecDeque<Reply>>,
    requests: Vec<HttpRequest>,
    sent_at: Vec<Instant>,
}

pub(crate) struct ScriptedTransport {
    fallback: Reply,
    inner: Mutex<Script>,
}

impl ScriptedTransport {
    /// Every URL without a script gets `fallback`.
    pub(crate) fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            fallback,
            inner: Mutex::new(Script::default()),
        })
    }

    /// Replace the replies for `url`.
    pub(crate) fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut inner = self.inner.lock().unwrap();
        inner.routes.insert(url.to_string(), replies.into_iter().collect());
    }

    pub(crate) fn count(&self, url: &str) -> usize {
        self.inner.lock().unwrap().requests.iter().filter(|r| r.url == url).count()
    }

    pub(crate) fn total(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub(crate) fn sent_at(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().sent_at.clone()
    }

    fn next_reply(&self, req: HttpRequest) -> Reply {
        let mut inner = self.inner.lock().unwrap();
        let reply = match inner.routes.get_mut(&req.url) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        inner.requests.push(req);
        inner.sent_at.push(Instant::now());
        reply.unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.next_reply(req) {
            Reply::Respond(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
