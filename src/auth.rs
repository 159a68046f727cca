//! Bearer credential held by the client.
//!
//! Issuance happens elsewhere (the login flow of the web app); this module only
//! stores the token it was handed and decides whether it is still usable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable that overrides the stored token
pub const TOKEN_ENV_VAR: &str = "CONSULTATION_TRACKER_TOKEN";

/// Seconds before the recorded expiry at which a token is already treated as expired
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuthState {
    pub access_token: Option<String>,
    pub token_expiry: Option<i64>, // Unix timestamp
}

/// Usability of the held credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Missing,
    Expired,
    Valid(String),
}

impl AuthState {
    pub fn with_token(token: &str, expires_in_secs: Option<i64>) -> Self {
        Self {
            access_token: Some(token.to_string()),
            token_expiry: expires_in_secs.map(|secs| Utc::now().timestamp() + secs),
        }
    }

    /// A token without recorded expiry is trusted until the server rejects it
    pub fn is_token_expired(&self) -> bool {
        match self.token_expiry {
            Some(expiry) => Utc::now().timestamp() >= expiry - EXPIRY_SKEW_SECS,
            None => false,
        }
    }

    pub fn credential(&self) -> Credential {
        match self.access_token.as_deref() {
            None | Some("") => Credential::Missing,
            Some(_) if self.is_token_expired() => Credential::Expired,
            Some(token) => Credential::Valid(token.to_string()),
        }
    }

    /// Load the stored credential, letting the environment override the token
    pub fn load(path: &Path) -> Self {
        let mut state = Self::load_from_file(path).unwrap_or_default();
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                debug!("Using bearer token from {}", TOKEN_ENV_VAR);
                state = Self::with_token(token.trim(), None);
            }
        }
        state
    }

    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AuthState>(&content) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("Failed to parse saved auth state: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read auth file: {}", e);
                None
            }
        }
    }

    /// Save auth state so later invocations reuse it
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)?;
        info!("Saved auth state to {:?}", path);
        Ok(())
    }

    pub fn delete_file(path: &Path) {
        if path.exists() {
            let _ = std::fs::remove_file(path);
            debug!("Deleted auth state file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_credential_states() {
        assert_eq!(AuthState::default().credential(), Credential::Missing);

        let state = AuthState::with_token("abc", Some(3600));
        assert_eq!(state.credential(), Credential::Valid("abc".to_string()));

        let state = AuthState {
            access_token: Some("abc".to_string()),
            token_expiry: Some(Utc::now().timestamp() - 10),
        };
        assert_eq!(state.credential(), Credential::Expired);

        // Within the skew window counts as expired
        let state = AuthState::with_token("abc", Some(10));
        assert_eq!(state.credential(), Credential::Expired);

        let state = AuthState::with_token("", None);
        assert_eq!(state.credential(), Credential::Missing);
    }

    #[test]
    fn test_token_without_expiry_is_valid() {
        let state = AuthState::with_token("abc", None);
        assert!(!state.is_token_expired());
    }

    #[test]
    fn test_file_roundtrip_and_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("auth.json");
        let state = AuthState::with_token("abc", Some(3600));
        state.save_to_file(&path).unwrap();

        assert_eq!(AuthState::load_from_file(&path), Some(state));
        AuthState::delete_file(&path);
        assert!(AuthState::load_from_file(&path).is_none());
    }

    #[test]
    fn test_unreadable_file_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(AuthState::load_from_file(&path).is_none());
    }
}
