//! Client transport: authenticated HTTP calls and the realtime connection
//! manager with its reconnect policy.

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::PublicStaff;

#[derive(Clone)]
pub struct HttpSession {
    base: Url,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct LoginBundle {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user: PublicStaff,
}

fn remote_message(val: &serde_json::Value) -> String {
    val.get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("request failed")
        .to_string()
}

impl HttpSession {
    pub fn new(base: &str) -> Result<Self> {
        let base_url = Url::parse(base).context("invalid base URL")?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self { base: base_url, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<LoginBundle> {
        let url = self.base.join("/auth/login")?;
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({"email": email, "password": password, "rememberMe": remember_me}))
            .send()
            .await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status": "error"}));
        if !status.is_success() {
            return Err(anyhow!("login failed: {}", remote_message(&val)));
        }
        let token = val
            .get("token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow!("login response missing token"))?
            .to_string();
        let refresh_token = val
            .get("refreshToken")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string());
        let user: PublicStaff = serde_json::from_value(
            val.get("user").cloned().ok_or_else(|| anyhow!("login response missing user"))?,
        )?;
        Ok(LoginBundle { token, refresh_token, user })
    }

    pub async fn me(&self, token: &str) -> Result<PublicStaff> {
        let url = self.base.join("/auth/me")?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status": "error"}));
        if !status.is_success() {
            return Err(anyhow!("identity check failed: {}", remote_message(&val)));
        }
        let user: PublicStaff = serde_json::from_value(
            val.get("user").cloned().ok_or_else(|| anyhow!("me response missing user"))?,
        )?;
        Ok(user)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<String> {
        let url = self.base.join("/auth/refresh")?;
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({"refreshToken": refresh_token}))
            .send()
            .await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status": "error"}));
        if !status.is_success() {
            return Err(anyhow!("refresh failed: {}", remote_message(&val)));
        }
        val.get("token")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("refresh response missing token"))
    }

    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<()> {
        let url = self.base.join("/auth/logout")?;
        let body = match refresh_token {
            Some(rt) => serde_json::json!({"refreshToken": rt}),
            None => serde_json::json!({}),
        };
        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("logout failed: HTTP {}", resp.status()));
        }
        Ok(())
    }

    /// Build the realtime endpoint URL: http(s) base -> ws(s)/ws, token in the
    /// query string (the handshake cannot carry an Authorization header).
    pub fn ws_url(&self, token: &str) -> Result<Url> {
        let mut ws = self.base.clone();
        let scheme = ws.scheme().to_string();
        if scheme == "https" { ws.set_scheme("wss").ok(); } else { ws.set_scheme("ws").ok(); }
        let mut ws = ws.join("/ws")?;
        ws.query_pairs_mut().append_pair("token", token);
        Ok(ws)
    }
}

/// Reconnect delay: 500ms initial, doubled per attempt, capped at 30s.
/// Attempts are unbounded; for a long-lived staff dashboard, eventually
/// reconnecting beats giving up.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(500);
    let delay = base * 2u32.saturating_pow(attempt.min(8));
    delay.min(Duration::from_secs(30))
}

/// A link that survived this long resets the retry budget.
const STABLE_LINK: Duration = Duration::from_secs(5);

enum Disconnect {
    /// Local teardown requested.
    Teardown,
    /// The remote end closed the link; retry immediately once.
    ServerClose,
    /// Transport error or stream end; back off before retrying.
    Lost,
}

/// Maintains at most one live realtime connection. `connect` is a no-op while
/// a connection task is active; `disconnect` cancels the task and is
/// idempotent.
pub struct WsManager {
    url: Url,
    connected: Arc<AtomicBool>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl WsManager {
    pub fn new(url: Url) -> Self {
        Self { url, connected: Arc::new(AtomicBool::new(false)), shutdown: None, task: None }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.shutdown = Some(tx);
        let url = self.url.clone();
        let connected = self.connected.clone();
        self.task = Some(tokio::spawn(run_connection(url, connected, rx)));
    }

    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn run_connection(url: Url, connected: Arc<AtomicBool>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((mut stream, _resp)) => {
                connected.store(true, Ordering::SeqCst);
                attempt = attempt.saturating_add(1);
                let started = Instant::now();
                info!("ws: connected");
                let reason = drive(&mut stream, &mut shutdown).await;
                connected.store(false, Ordering::SeqCst);
                if started.elapsed() >= STABLE_LINK {
                    attempt = 0;
                }
                match reason {
                    Disconnect::Teardown => break,
                    Disconnect::ServerClose if attempt <= 1 => {
                        info!("ws: server closed the link, reconnecting immediately");
                        continue;
                    }
                    Disconnect::ServerClose | Disconnect::Lost => {}
                }
            }
            Err(e) => {
                warn!("ws: connect failed: {e}");
                attempt = attempt.saturating_add(1);
            }
        }
        let delay = backoff_delay(attempt.saturating_sub(1));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                // A dropped sender means the manager itself is gone.
                if changed.is_err() || *shutdown.borrow() { break; }
            }
        }
    }
    debug!("ws: connection task finished");
}

async fn drive(
    stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    shutdown: &mut watch::Receiver<bool>,
) -> Disconnect {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Close(_))) => return Disconnect::ServerClose,
                Some(Ok(WsMessage::Text(text))) => {
                    debug!("ws: event: {text}");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("ws: stream error: {e}");
                    return Disconnect::Lost;
                }
                None => return Disconnect::Lost,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = stream.close(None).await;
                    return Disconnect::Teardown;
                }
            }
        }
    }
}
