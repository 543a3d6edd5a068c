//! # Credential Access
//!
//! The scanner never logs in by itself. It asks a [`CredentialAccessor`] for
//! the current bearer token at session start, and tells it to discard the token
//! when the backend rejects it.

use std::sync::{Arc, Mutex};
use tracing::info;

use stamp_core::Credential;

/// Source of the visitor's bearer credential.
pub trait CredentialAccessor: Send + Sync {
    /// Returns the stored credential, if any. Blank tokens count as absent.
    fn get(&self) -> Option<Credential>;

    /// Forgets the stored credential after the backend rejected it.
    fn invalidate(&self) {}
}

/// In-memory credential, shared between clones.
#[derive(Clone, Default)]
pub struct StaticCredential {
    token: Arc<Mutex<Option<Credential>>>,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredential {
            token: Arc::new(Mutex::new(Some(Credential::new(token)))),
        }
    }

    /// An accessor with no credential.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(Credential::new(token));
        }
    }

    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }
}

impl CredentialAccessor for StaticCredential {
    fn get(&self) -> Option<Credential> {
        self.token
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .filter(|c| !c.is_blank())
    }

    fn invalidate(&self) {
        if let Ok(mut slot) = self.token.lock() {
            if slot.take().is_some() {
                info!("In-memory credential discarded");
            }
        }
    }
}
