//! Bearer token kept in a file on the kiosk.
//!
//! `STAMP_TOKEN` takes precedence over the file. Invalidation deletes the
//! file and forgets the environment token for the rest of the run.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use stamp_core::Credential;
use stamp_scan::CredentialAccessor;

pub const TOKEN_ENV: &str = "STAMP_TOKEN";

pub struct TokenFileCredential {
    path: Option<PathBuf>,
    env_token: Option<String>,
    env_revoked: AtomicBool,
}

impl TokenFileCredential {
    pub fn new(path: Option<PathBuf>, env_token: Option<String>) -> Self {
        TokenFileCredential {
            path,
            env_token: env_token.filter(|t| !t.trim().is_empty()),
            env_revoked: AtomicBool::new(false),
        }
    }

    /// Reads `STAMP_TOKEN` from the environment.
    pub fn from_env(path: Option<PathBuf>) -> Self {
        Self::new(path, std::env::var(TOKEN_ENV).ok())
    }

    fn read_file(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(contents) => Some(contents.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(?path, error = %e, "Token file unreadable");
                None
            }
        }
    }
}

impl CredentialAccessor for TokenFileCredential {
    fn get(&self) -> Option<Credential> {
        if !self.env_revoked.load(Ordering::SeqCst) {
            if let Some(token) = &self.env_token {
                debug!("Using credential from {}", TOKEN_ENV);
                return Some(Credential::new(token.trim()));
            }
        }
        self.read_file().map(Credential::new)
    }

    fn invalidate(&self) {
        if self.env_token.is_some() {
            self.env_revoked.store(true, Ordering::SeqCst);
        }

        let Some(path) = &self.path else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => info!(?path, "Token file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(?path, error = %e, "Failed to remove token file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_trimmed_token_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  abc.def \n").unwrap();

        let store = TokenFileCredential::new(Some(path), None);
        assert_eq!(store.get().unwrap().token(), "abc.def");
    }

    #[test]
    fn test_missing_or_blank_file_means_no_credential() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        assert!(TokenFileCredential::new(Some(path.clone()), None).get().is_none());

        std::fs::write(&path, "\n").unwrap();
        assert!(TokenFileCredential::new(Some(path), None).get().is_none());
        assert!(TokenFileCredential::new(None, Some("  ".into())).get().is_none());
    }

    #[test]
    fn test_env_token_wins_until_invalidated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "from-file").unwrap();

        let store = TokenFileCredential::new(Some(path.clone()), Some("from-env".into()));
        assert_eq!(store.get().unwrap().token(), "from-env");

        store.invalidate();
        assert!(store.get().is_none());
        assert!(!path.exists());

        // Idempotent
        store.invalidate();
    }
}
