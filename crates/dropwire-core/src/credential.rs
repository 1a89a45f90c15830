//! Read-only access to the bearer credential.
//!
//! Credentials are issued and stored by the authentication layer; the core
//! only asks whether one is present.

use std::sync::{Arc, PoisonError, RwLock};

/// Accessor for the current bearer token.
pub trait CredentialSource: Send + Sync + 'static {
    /// The token, if one is stored. Empty tokens count as absent.
    fn bearer_token(&self) -> Option<String>;

    fn is_present(&self) -> bool {
        self.bearer_token().is_some()
    }
}

/// A fixed token (or none), for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()).filter(|t| !t.is_empty()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredential {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A token slot populated by the authentication layer and read by the core.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedCredential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token (called by the authentication layer on sign-in).
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(token).filter(|t| !t.is_empty());
    }

    /// Remove the token (called on sign-out).
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialSource for SharedCredential {
    fn bearer_token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
