//! Chrome DevTools Protocol client over a single browser-level WebSocket.
//!
//! Page targets are driven through flattened sessions: every command may carry
//! a `sessionId`, so one socket serves every isolated context in the process.

use serde_json::{json, Value};
use socialpilot_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

/// Listener key: events are routed per session so two pages never see each
/// other's `Page.loadEventFired`.
fn listener_key(session_id: Option<&str>, method: &str) -> String {
    format!("{}|{}", session_id.unwrap_or(""), method)
}

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    next_id: AtomicU64,
    event_listeners: Listeners,
    /// Flips to `true` once the socket is gone.
    closed_rx: watch::Receiver<bool>,
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to the browser's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let (closed_tx, closed_rx) = watch::channel(false);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();
        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_reader = event_listeners.clone();

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let session = val.get("sessionId").and_then(|v| v.as_str());
                            let key = listener_key(session, method);
                            let mut listeners = events_reader.lock().await;
                            if let Some(senders) = listeners.get_mut(&key) {
                                let params = val.get("params").cloned().unwrap_or(Value::Null);
                                senders.retain(|tx| !tx.is_closed());
                                for tx in senders.iter() {
                                    let _ = tx.try_send(params.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Drop in-flight commands; their receivers fail immediately.
            pending_reader.lock().await.clear();
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            closed_rx,
            command_timeout,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    pub fn is_connected(&self) -> bool {
        !*self.closed_rx.borrow()
    }

    /// A receiver that observes the connection closing.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Send a browser-level command.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send(None, method, params).await
    }

    /// Send a command to an attached target session.
    pub async fn send_session_command(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.send(Some(session_id), method, params).await
    }

    async fn send(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Cdp(format!("connection closed before '{}'", method)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            msg["sessionId"] = json!(sid);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("failed to send '{}': {}", method, e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{}: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!("response channel closed for '{}'", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    /// Subscribe to an event, optionally scoped to one target session.
    pub async fn subscribe_event(
        &self,
        session_id: Option<&str>,
        method: &str,
    ) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.event_listeners
            .lock()
            .await
            .entry(listener_key(session_id, method))
            .or_default()
            .push(tx);
        rx
    }

    // ─── Browser-level target management ──────────────────────────────

    /// Create an isolated browser context (separate cookie jar and storage).
    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self
            .send_command("Target.createBrowserContext", json!({"disposeOnDetach": true}))
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("no browserContextId returned".into()))
    }

    pub async fn dispose_browser_context(&self, browser_context_id: &str) -> Result<()> {
        self.send_command(
            "Target.disposeBrowserContext",
            json!({"browserContextId": browser_context_id}),
        )
        .await?;
        Ok(())
    }

    /// Open a page target, inside `browser_context_id` when given.
    pub async fn create_target(&self, url: &str, browser_context_id: Option<&str>) -> Result<String> {
        let mut params = json!({"url": url});
        if let Some(ctx) = browser_context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.send_command("Target.createTarget", params).await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("no targetId returned from createTarget".into()))
    }

    /// Attach to a target with a flattened session and return the session id.
    pub async fn attach_to_target(&self, target_id: &str) -> Result<String> {
        let result = self
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Cdp("no sessionId returned from attachToTarget".into()))
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    /// Page targets currently open, as `(targetId, browserContextId)` pairs.
    pub async fn page_targets(&self) -> Result<Vec<(String, Option<String>)>> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        let infos = result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(infos
            .iter()
            .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
            .filter_map(|t| {
                let id = t.get("targetId").and_then(|v| v.as_str())?.to_string();
                let ctx = t
                    .get("browserContextId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Some((id, ctx))
            })
            .collect())
    }

    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// Pull `result.value` out of a `Runtime.evaluate` response, surfacing
/// script exceptions as errors.
pub fn runtime_value(response: &Value) -> Result<Value> {
    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("script exception");
        return Err(Error::Cdp(format!("evaluate: {}", text)));
    }
    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_key_scopes_sessions() {
        assert_eq!(listener_key(None, "Target.detachedFromTarget"), "|Target.detachedFromTarget");
        assert_eq!(listener_key(Some("S1"), "Page.loadEventFired"), "S1|Page.loadEventFired");
        assert_ne!(
            listener_key(Some("S1"), "Page.loadEventFired"),
            listener_key(Some("S2"), "Page.loadEventFired")
        );
    }

    #[test]
    fn test_runtime_value_extracts_result() {
        let resp = json!({"result": {"type": "boolean", "value": true}});
        assert_eq!(runtime_value(&resp).unwrap(), json!(true));

        let resp = json!({"result": {"type": "undefined"}});
        assert_eq!(runtime_value(&resp).unwrap(), Value::Null);
    }

    #[test]
    fn test_runtime_value_surfaces_exceptions() {
        let resp = json!({
            "result": {"type": "object"},
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "TypeError: x is null"}
            }
        });
        let err = runtime_value(&resp).unwrap_err();
        assert!(err.to_string().contains("TypeError: x is null"));
    }
}
