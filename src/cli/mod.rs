//! Client shell: glues the HTTP transport, the persisted session context and
//! the realtime connection manager together for the interactive binary.

pub mod connectivity;
pub mod session;

use anyhow::Result;
use std::path::Path;
use tracing::warn;

pub use connectivity::{backoff_delay, HttpSession, LoginBundle, WsManager};
pub use session::{Rehydration, SessionContext, SessionState, SessionStore, VerifyOutcome};

pub struct Client {
    pub http: HttpSession,
    pub session: SessionContext,
    ws: Option<WsManager>,
}

impl Client {
    pub fn new(base: &str, profile_dir: &Path) -> Result<Self> {
        Ok(Self {
            http: HttpSession::new(base)?,
            session: SessionContext::new(SessionStore::open(profile_dir)),
            ws: None,
        })
    }

    /// App start: rehydrate from persisted state, verify in the background
    /// sense (the shell awaits it, the state machine does not require that),
    /// and auto-connect the realtime link when a token exists.
    pub async fn bootstrap(&mut self) -> Result<()> {
        if let Some((token, generation)) = self.session.begin_rehydration() {
            match self.http.me(&token).await {
                Ok(user) => self.session.apply_verification(generation, VerifyOutcome::Fresh(user)),
                Err(e) => {
                    warn!("session: verification failed, keeping cached identity: {e}");
                    self.session.apply_verification(generation, VerifyOutcome::Failed);
                }
            }
            self.connect_realtime()?;
        }
        Ok(())
    }

    /// Login errors propagate to the caller for display; the session stays
    /// `Unauthenticated` on failure.
    pub async fn login(&mut self, email: &str, password: &str, remember_me: bool) -> Result<()> {
        let bundle = self.http.login(email, password, remember_me).await?;
        // A re-login replaces the realtime link so the handshake carries the
        // new token.
        if let Some(ws) = self.ws.as_mut() {
            ws.disconnect().await;
            self.ws = None;
        }
        self.session.complete_login(bundle.token, bundle.refresh_token, bundle.user)?;
        self.connect_realtime()?;
        Ok(())
    }

    /// Logout never fails: a server-side invalidation error is logged and the
    /// local session is cleared regardless.
    pub async fn logout(&mut self) {
        if let Err(e) = self.http.logout(self.session.refresh_token()).await {
            warn!("logout: server call failed, clearing local session anyway: {e}");
        }
        if let Some(ws) = self.ws.as_mut() {
            ws.disconnect().await;
        }
        self.ws = None;
        self.session.complete_logout();
    }

    /// Exchange the refresh token for a fresh access token, if one is held.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(rt) = self.session.refresh_token().map(|s| s.to_string()) else {
            anyhow::bail!("no refresh token held; log in with --remember");
        };
        let token = self.http.refresh(&rt).await?;
        self.session.replace_token(token)?;
        Ok(())
    }

    pub fn realtime_connected(&self) -> bool {
        self.ws.as_ref().map(|w| w.is_connected()).unwrap_or(false)
    }

    /// Teardown on shutdown so no connection task outlives the shell.
    pub async fn shutdown(&mut self) {
        if let Some(ws) = self.ws.as_mut() {
            ws.disconnect().await;
        }
        self.ws = None;
    }

    fn connect_realtime(&mut self) -> Result<()> {
        let Some(token) = self.session.token() else {
            return Ok(());
        };
        let url = self.http.ws_url(token)?;
        let mgr = self.ws.get_or_insert_with(|| WsManager::new(url));
        mgr.connect();
        Ok(())
    }
}
