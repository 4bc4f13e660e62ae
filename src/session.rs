// src/session.rs
//! Session store: the Google OAuth token and the profile derived from it.
//! The token is restored from durable storage at startup; any component
//! that needs the current identity reads it through this store at the
//! moment of use, never from a captured snapshot.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::AppError;
use crate::storage::{ClientStorage, KEY_USER};

const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Profile fields from Google userinfo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

/// Current sign-in state. Either fully anonymous, token-only (profile fetch
/// pending), or fully populated. A token whose profile fetch fails is
/// cleared atomically — the store is never left with a dead token.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub profile: Option<UserProfile>,
}

impl Session {
    pub fn is_signed_in(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Persisted shape of the sign-in record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    access_token: String,
}

pub struct SessionStore {
    storage: ClientStorage,
    tx: watch::Sender<Session>,
}

impl SessionStore {
    /// Restores a persisted token if one exists. The profile is fetched
    /// separately (`ensure_profile`), which also validates the token.
    pub fn load(storage: ClientStorage) -> Self {
        let mut session = Session::default();
        if let Some(stored) = storage.read::<StoredUser>(KEY_USER) {
            tracing::info!("Restored sign-in token from storage");
            session.access_token = Some(stored.access_token);
        }
        let (tx, _) = watch::channel(session);
        Self { storage, tx }
    }

    pub fn session(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().access_token.clone()
    }

    /// Observability for the connection manager (auth on token change),
    /// the profile fetcher, and the sign-out reactions of other components.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Records a fresh token from an interactive sign-in. Any previously
    /// derived profile is stale and dropped; the token is persisted so a
    /// restart stays signed in.
    pub fn set_token(&self, token: String) {
        if let Err(e) = self.storage.write(
            KEY_USER,
            &StoredUser {
                access_token: token.clone(),
            },
        ) {
            tracing::warn!("Failed to persist sign-in token: {}", e);
        }
        self.tx.send_modify(|session| {
            session.access_token = Some(token);
            session.profile = None;
        });
    }

    pub fn set_profile(&self, profile: UserProfile) {
        tracing::info!("Signed in as {} <{}>", profile.name, profile.email);
        self.tx.send_modify(|session| session.profile = Some(profile));
    }

    /// Clears the whole session atomically and removes the persisted token.
    /// Watchers see a single transition to the anonymous state, which is the
    /// logout broadcast other components react to.
    pub fn sign_out(&self) {
        self.storage.remove(KEY_USER);
        self.tx.send_modify(|session| {
            session.access_token = None;
            session.profile = None;
        });
        tracing::info!("Signed out");
    }

    /// Fetches the profile for the current token when none is loaded yet.
    /// A rejected token means the persisted credential is expired or
    /// revoked: the session is cleared, never retried.
    pub async fn ensure_profile(&self, http: &Client) -> Result<(), AppError> {
        let token = {
            let session = self.tx.borrow();
            if session.profile.is_some() {
                return Ok(());
            }
            match &session.access_token {
                Some(token) => token.clone(),
                None => return Ok(()),
            }
        };

        match fetch_user_info(http, &token).await {
            Ok(profile) => {
                self.set_profile(profile);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Profile fetch rejected the stored token: {}", e);
                self.sign_out();
                Err(AppError::Auth("Session expired, please sign in again".to_string()))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

async fn fetch_user_info(http: &Client, access_token: &str) -> Result<UserProfile, AppError> {
    let response = http
        .get(USERINFO_URL)
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .await?;

    if !response.status().is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(AppError::Auth(format!("Token invalid: {}", error_text)));
    }

    let info: GoogleUserInfo = response
        .json()
        .await
        .map_err(|e| AppError::Api(format!("Malformed userinfo response: {}", e)))?;
    Ok(UserProfile {
        name: info.name,
        email: info.email,
        picture: info.picture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();
        (dir, SessionStore::load(storage.clone()))
    }

    #[test]
    fn test_token_persists_across_load() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::open(Some(dir.path().to_path_buf())).unwrap();

        let store = SessionStore::load(storage.clone());
        store.set_token("tok-1".into());
        drop(store);

        let restored = SessionStore::load(storage);
        assert_eq!(restored.access_token().as_deref(), Some("tok-1"));
        assert!(restored.session().profile.is_none());
    }

    #[test]
    fn test_new_token_drops_stale_profile() {
        let (_dir, store) = open_store();
        store.set_token("tok-1".into());
        store.set_profile(UserProfile {
            name: "A".into(),
            email: "a@example.com".into(),
            picture: None,
        });
        store.set_token("tok-2".into());
        let session = store.session();
        assert_eq!(session.access_token.as_deref(), Some("tok-2"));
        assert!(session.profile.is_none());
    }

    #[test]
    fn test_sign_out_clears_everything() {
        let (_dir, store) = open_store();
        store.set_token("tok-1".into());
        store.set_profile(UserProfile {
            name: "A".into(),
            email: "a@example.com".into(),
            picture: None,
        });

        let mut rx = store.subscribe();
        rx.borrow_and_update();
        store.sign_out();

        let session = store.session();
        assert!(session.access_token.is_none());
        assert!(session.profile.is_none());
        // the logout transition is observable
        assert!(rx.has_changed().unwrap());
    }
}
