use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{InboundMessage, OutboundFrame, SocketEvent};
use crate::error::BridgeError;

/// What a successful connect hands back: who we are and where to write.
pub struct SessionHandle {
    pub bot_id: String,
    pub outbound: mpsc::UnboundedSender<String>,
}

/// Opens one real-time session. Inbound traffic for the session is reported
/// through `events`, tagged with `session`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        session: u64,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<SessionHandle, BridgeError>;
}

#[derive(Debug, Deserialize)]
struct RtmStartResponse {
    ok: Option<bool>,
    url: Option<String>,
    #[serde(rename = "self")]
    identity: Option<RtmSelf>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RtmSelf {
    id: String,
}

/// Upper bound for the handshake request and, separately, for opening the socket.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `rtm.start` handshake followed by a websocket to the returned URL.
pub struct RtmConnector {
    client: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
}

impl RtmConnector {
    pub fn new(api_base: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns `(session url, bot id)`.
    async fn handshake(&self) -> Result<(String, String), BridgeError> {
        let url = format!("{}/rtm.start", self.api_base);
        debug!("Requesting Slack session: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BridgeError::Handshake(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Handshake(format!("HTTP {status}")));
        }

        let body: RtmStartResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Handshake(format!("unreadable response: {e}")))?;

        if body.ok == Some(false) {
            let err = body.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(BridgeError::Handshake(format!("rtm.start refused: {err}")));
        }

        let session_url = body
            .url
            .ok_or_else(|| BridgeError::Handshake("response carried no session URL".into()))?;
        let bot_id = body
            .identity
            .map(|s| s.id)
            .ok_or_else(|| BridgeError::Handshake("response carried no bot identity".into()))?;

        Ok((session_url, bot_id))
    }
}

#[async_trait]
impl Connector for RtmConnector {
    async fn connect(
        &self,
        session: u64,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Result<SessionHandle, BridgeError> {
        let (session_url, bot_id) = self.handshake().await?;

        info!("Connecting to Slack RTM socket (session {session})...");
        let connecting = tokio_tungstenite::connect_async(session_url.as_str());
        let (ws_stream, _) = tokio::time::timeout(self.timeout, connecting)
            .await
            .map_err(|_| BridgeError::Connect(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(session, ws_stream, outbound_rx, events));

        Ok(SessionHandle {
            bot_id,
            outbound: outbound_tx,
        })
    }
}

/// Moves frames between the socket and the event loop until either side goes away.
async fn pump(
    session: u64,
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if events.send(SocketEvent::Opened { session }).is_err() {
        return;
    }

    let (code, reason) = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        warn!("Slack socket write failed: {e}");
                        break (None, e.to_string());
                    }
                }
                None => {
                    let _ = ws_tx.close().await;
                    break (None, "session released".to_string());
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Frame { session, text }).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break (None, e.to_string()),
                None => break (None, "stream ended".to_string()),
            }
        }
    };

    let _ = events.send(SocketEvent::Closed {
        session,
        code,
        reason,
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    next_frame_id: u64,
}

/// Owns the one live session to the chat backend.
///
/// Sending with no live session reconnects once and retries the send once;
/// a failed reconnect drops the message.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SocketEvent>,
    state: ConnectionState,
    session: Option<Session>,
    bot_id: Option<String>,
    sessions_started: u64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self {
            connector,
            events,
            state: ConnectionState::Disconnected,
            session: None,
            bot_id: None,
            sessions_started: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Identity acquired by the most recent successful connect.
    pub fn bot_id(&self) -> Option<&str> {
        self.bot_id.as_deref()
    }

    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        self.state = ConnectionState::Connecting;
        self.session = None;
        self.sessions_started += 1;
        let id = self.sessions_started;

        match self.connector.connect(id, self.events.clone()).await {
            Ok(handle) => {
                info!("Slack session {} established as {}", id, handle.bot_id);
                self.bot_id = Some(handle.bot_id);
                self.session = Some(Session {
                    id,
                    outbound: handle.outbound,
                    next_frame_id: 1,
                });
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    /// Applies a socket event; returns the decoded message for frames.
    pub fn handle_event(&mut self, event: SocketEvent) -> Option<InboundMessage> {
        match event {
            SocketEvent::Opened { session } => {
                debug!("Slack session {session} opened");
                None
            }
            SocketEvent::Frame { session, text } => {
                if !self.is_current(session) {
                    debug!("Ignoring frame from stale session {session}");
                    return None;
                }
                debug!("Received frame: {}", text);
                match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        warn!("Dropping undecodable frame: {e}");
                        None
                    }
                }
            }
            SocketEvent::Closed {
                session,
                code,
                reason,
            } => {
                info!(
                    "Slack session {} disconnected with status code: {:?}, reason: {}",
                    session, code, reason
                );
                if self.is_current(session) {
                    self.session = None;
                    self.state = ConnectionState::Closed;
                }
                None
            }
        }
    }

    /// Queues a frame on the live session without waiting for delivery.
    fn enqueue(&mut self, text: &str, channel: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let frame = OutboundFrame::message(session.next_frame_id, channel, text);
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode outbound frame: {e}");
                return false;
            }
        };

        if session.outbound.send(json).is_err() {
            // Pump already exited; its Closed event may still be in flight.
            self.session = None;
            self.state = ConnectionState::Closed;
            return false;
        }
        session.next_frame_id += 1;
        true
    }

    /// Best-effort send of `text` to `channel`. Returns whether the frame was queued.
    pub async fn send(&mut self, text: &str, channel: &str) -> bool {
        if self.enqueue(text, channel) {
            return true;
        }

        info!("No live Slack session, reconnecting before sending to {channel}");
        if let Err(e) = self.connect().await {
            warn!("Dropping message for {channel}: {e}");
            return false;
        }

        if self.enqueue(text, channel) {
            true
        } else {
            warn!("Dropping message for {channel}: new session closed immediately");
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeConnector, BOT_ID};
    use super::*;

    fn manager() -> (
        Arc<FakeConnector>,
        ConnectionManager,
        mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        let connector = Arc::new(FakeConnector::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(connector.clone(), tx);
        (connector, manager, rx)
    }

    #[tokio::test]
    async fn test_connect_acquires_identity() {
        let (connector, mut conn, mut events) = manager();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.bot_id(), None);

        conn.connect().await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.bot_id(), Some(BOT_ID));
        assert_eq!(connector.attempts(), 1);
        assert_eq!(events.try_recv().unwrap(), SocketEvent::Opened { session: 1 });
    }

    #[tokio::test]
    async fn test_send_without_session_connects_once() {
        let (connector, mut conn, _events) = manager();

        assert!(conn.send("hello", "C1").await);

        assert_eq!(connector.attempts(), 1);
        let sent = connector.sent();
        assert_eq!(
            sent,
            vec![serde_json::json!({"id": 1, "type": "message", "channel": "C1", "text": "hello"})]
        );
    }

    #[tokio::test]
    async fn test_send_on_live_session_does_not_reconnect() {
        let (connector, mut conn, _events) = manager();
        conn.connect().await.unwrap();

        assert!(conn.send("one", "C1").await);
        assert!(conn.send("two", "C2").await);

        assert_eq!(connector.attempts(), 1);
        let sent = connector.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["id"], 1);
        assert_eq!(sent[1]["id"], 2);
        assert_eq!(sent[1]["channel"], "C2");
    }

    #[tokio::test]
    async fn test_failed_reconnect_drops_message() {
        let (connector, mut conn, _events) = manager();
        connector.set_failing(true);

        assert!(!conn.send("lost", "C1").await);

        assert_eq!(connector.attempts(), 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn test_close_event_triggers_lazy_reconnect() {
        let (connector, mut conn, _events) = manager();
        conn.connect().await.unwrap();

        let decoded = conn.handle_event(SocketEvent::Closed {
            session: 1,
            code: Some(1006),
            reason: "gone".to_string(),
        });
        assert!(decoded.is_none());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(connector.attempts(), 1);

        assert!(conn.send("after", "C1").await);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(conn.state(), ConnectionState::Open);
        // Frame ids restart with the new session.
        assert_eq!(connector.sent()[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let (_connector, mut conn, _events) = manager();
        conn.connect().await.unwrap();
        conn.connect().await.unwrap();

        conn.handle_event(SocketEvent::Closed {
            session: 1,
            code: None,
            reason: String::new(),
        });
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_dead_pump_forces_reconnect() {
        let (connector, mut conn, _events) = manager();
        conn.connect().await.unwrap();
        connector.kill_sessions();

        assert!(conn.send("retry", "C1").await);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.sent().len(), 1);
    }

    /// Accepts TCP connections and never writes a byte back.
    async fn silent_listener() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_unresponsive_handshake_times_out() {
        let addr = silent_listener().await;
        let connector = RtmConnector::new(&format!("http://{addr}/api"), "xoxb-test")
            .with_timeout(Duration::from_millis(200));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = ConnectionManager::new(Arc::new(connector), tx);

        let sent = tokio::time::timeout(Duration::from_secs(5), conn.send("hi", "C1"))
            .await
            .expect("send must not hang on a silent backend");

        assert!(!sent);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unresponsive_socket_times_out() {
        let socket_addr = silent_listener().await;
        let rtm = axum::Router::new().route(
            "/api/rtm.start",
            axum::routing::get(move || async move {
                axum::Json(serde_json::json!({
                    "ok": true,
                    "url": format!("ws://{socket_addr}/"),
                    "self": {"id": BOT_ID},
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, rtm).await });

        let connector = RtmConnector::new(&format!("http://{api_addr}/api"), "xoxb-test")
            .with_timeout(Duration::from_millis(300));
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect(1, tx))
            .await
            .expect("connect must not hang on a silent socket");

        match result {
            Err(err) => assert_eq!(err.kind(), crate::error::ErrorKind::Connect),
            Ok(_) => panic!("connect to a silent socket succeeded"),
        }
    }

    #[tokio::test]
    async fn test_frames_are_decoded_or_dropped() {
        let (_connector, mut conn, _events) = manager();
        conn.connect().await.unwrap();

        let msg = conn
            .handle_event(SocketEvent::Frame {
                session: 1,
                text: r#"{"type":"message","text":"hi","channel":"C1","user":"U1"}"#.to_string(),
            })
            .unwrap();
        assert!(msg.is_message());

        assert!(conn
            .handle_event(SocketEvent::Frame {
                session: 1,
                text: "not json".to_string(),
            })
            .is_none());

        assert!(conn
            .handle_event(SocketEvent::Frame {
                session: 7,
                text: r#"{"type":"message"}"#.to_string(),
            })
            .is_none());
    }
}
