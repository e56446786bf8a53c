//! Client-held session: persisted storage and the explicit session state
//! machine.
//!
//! Rehydration is optimistic: a cached identity is trusted immediately so the
//! shell never blocks on the network, then a background verification either
//! refreshes it or leaves it stale. Availability wins over freshness — only a
//! corrupt cache or an explicit logout tears the session down. A generation
//! counter guards against verification responses that arrive after the
//! session has already moved on.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::identity::PublicStaff;

pub const TOKEN_KEY: &str = "brigade_token";
pub const REFRESH_TOKEN_KEY: &str = "brigade_refresh_token";
pub const USER_KEY: &str = "brigade_user";

/// Persisted client state: three string entries under fixed keys, stored as a
/// single JSON map in the profile directory.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(profile_dir: P) -> Self {
        Self { path: profile_dir.as_ref().join("session.json") }
    }

    fn read_all(&self) -> HashMap<String, String> {
        let Ok(raw) = std::fs::read(&self.path) else {
            return HashMap::new();
        };
        serde_json::from_slice(&raw).unwrap_or_default()
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let raw = serde_json::to_vec_pretty(entries)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write session file: {}", self.path.display()))?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read_all().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all();
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    pub fn save(&self, token: &str, refresh_token: Option<&str>, user_json: &str) -> Result<()> {
        let mut entries = HashMap::new();
        entries.insert(TOKEN_KEY.to_string(), token.to_string());
        if let Some(rt) = refresh_token {
            entries.insert(REFRESH_TOKEN_KEY.to_string(), rt.to_string());
        }
        entries.insert(USER_KEY.to_string(), user_json.to_string());
        self.write_all(&entries)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("failed to clear session file: {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.read_all().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Authenticated(PublicStaff),
    Unauthenticated,
}

/// What the persisted entries amounted to on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rehydration {
    /// Nothing persisted.
    Empty,
    /// token, optional refresh token, parsed cached user.
    Cached(String, Option<String>, PublicStaff),
    /// Entries present but unusable; the only safe move is a full reset.
    Corrupt,
}

/// Classify persisted entries. Partial state (a token without a cached user,
/// or the reverse) is treated as corrupt rather than guessed at.
pub fn rehydrate(
    token: Option<String>,
    refresh_token: Option<String>,
    user_json: Option<String>,
) -> Rehydration {
    match (token, user_json) {
        (Some(t), Some(uj)) => match serde_json::from_str::<PublicStaff>(&uj) {
            Ok(user) => Rehydration::Cached(t, refresh_token, user),
            Err(_) => Rehydration::Corrupt,
        },
        (None, None) if refresh_token.is_none() => Rehydration::Empty,
        _ => Rehydration::Corrupt,
    }
}

/// Result of the background verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The server confirmed the session; cached identity replaced with fresh data.
    Fresh(PublicStaff),
    /// Network or server failure. The stale cached identity is kept.
    Failed,
}

pub struct SessionContext {
    store: SessionStore,
    state: SessionState,
    token: Option<String>,
    refresh_token: Option<String>,
    generation: u64,
}

impl SessionContext {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            state: SessionState::Uninitialized,
            token: None,
            refresh_token: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read persisted state and either settle `Unauthenticated` or enter
    /// `Authenticated` on the cached identity. When a cached session was
    /// found, returns the token and the current generation so the caller can
    /// run the background verification and hand the result to
    /// [`apply_verification`](Self::apply_verification).
    pub fn begin_rehydration(&mut self) -> Option<(String, u64)> {
        self.state = SessionState::Loading;
        match rehydrate(
            self.store.get(TOKEN_KEY),
            self.store.get(REFRESH_TOKEN_KEY),
            self.store.get(USER_KEY),
        ) {
            Rehydration::Empty => {
                self.state = SessionState::Unauthenticated;
                None
            }
            Rehydration::Corrupt => {
                let _ = self.store.clear();
                self.state = SessionState::Unauthenticated;
                None
            }
            Rehydration::Cached(token, refresh_token, user) => {
                self.token = Some(token.clone());
                self.refresh_token = refresh_token;
                self.state = SessionState::Authenticated(user);
                Some((token, self.generation))
            }
        }
    }

    /// Apply a background verification result. Results from a superseded
    /// generation (the user logged out or logged in again meanwhile) are
    /// discarded.
    pub fn apply_verification(&mut self, generation: u64, outcome: VerifyOutcome) {
        if generation != self.generation {
            return;
        }
        if !matches!(self.state, SessionState::Authenticated(_)) {
            return;
        }
        match outcome {
            VerifyOutcome::Fresh(user) => {
                if let Ok(json) = serde_json::to_string(&user) {
                    let _ = self.store.put(USER_KEY, &json);
                }
                self.state = SessionState::Authenticated(user);
            }
            VerifyOutcome::Failed => {
                // Keep the stale cached identity: a flaky backend must not
                // log the user out.
            }
        }
    }

    /// Persist a successful login and enter `Authenticated`.
    pub fn complete_login(
        &mut self,
        token: String,
        refresh_token: Option<String>,
        user: PublicStaff,
    ) -> Result<()> {
        let user_json = serde_json::to_string(&user)?;
        self.store.save(&token, refresh_token.as_deref(), &user_json)?;
        self.token = Some(token);
        self.refresh_token = refresh_token;
        self.generation += 1;
        self.state = SessionState::Authenticated(user);
        Ok(())
    }

    /// Clear everything and enter `Unauthenticated`. Clearing local state must
    /// never fail the logout itself.
    pub fn complete_logout(&mut self) {
        let _ = self.store.clear();
        self.token = None;
        self.refresh_token = None;
        self.generation += 1;
        self.state = SessionState::Unauthenticated;
    }

    /// Replace the cached identity without a round trip, in memory and on disk.
    pub fn update_user(&mut self, user: PublicStaff) -> Result<()> {
        if matches!(self.state, SessionState::Authenticated(_)) {
            self.store.put(USER_KEY, &serde_json::to_string(&user)?)?;
            self.state = SessionState::Authenticated(user);
        }
        Ok(())
    }

    /// Swap in a newly minted access token (after a refresh) and persist it.
    pub fn replace_token(&mut self, token: String) -> Result<()> {
        self.store.put(TOKEN_KEY, &token)?;
        self.token = Some(token);
        Ok(())
    }
}
