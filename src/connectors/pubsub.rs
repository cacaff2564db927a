//! PubSub client for video-playback notifications with reconnection logic.
//!
//! Key requirements:
//! 1. Heartbeat monitoring: PING every 4 minutes, PONG expected within 10s
//! 2. Exponential backoff: 1s, 2s, 4s, ... max 120s
//! 3. `ServiceConnected` is emitted after every (re)connect so the
//!    supervisor re-listens its topics
//! 4. Never drops a notification: forwarding awaits channel capacity

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::events::FeedEvent;

/// Default PubSub endpoint.
pub const DEFAULT_PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Topic prefix for per-channel playback notifications.
const VIDEO_PLAYBACK_TOPIC: &str = "video-playback-by-id.";

/// Heartbeat interval - the server drops clients silent for 5 minutes.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(240);

/// Maximum time to wait for a PONG.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time for the TCP, TLS and WebSocket handshakes together.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum reconnection backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Initial reconnection backoff.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Connection closed by server: {0}")]
    ConnectionClosed(String),

    #[error("Server requested a reconnect")]
    ReconnectRequested,

    #[error("Feed receiver dropped")]
    FeedClosed,
}

/// The supervisor's view of the upstream feed.
///
/// Calls only enqueue work; none of them block on the network.
pub trait PubSubFeed: Send {
    /// Starts connecting. `FeedEvent::ServiceConnected` follows once the
    /// connection is up.
    fn connect(&mut self);

    /// Queues the playback topic of a channel for the next `send_topics`.
    fn listen_to_video_playback(&mut self, channel_id: &str);

    /// Sends every queued topic in a single LISTEN request.
    fn send_topics(&mut self);

    /// Releases the connection. No notification follows.
    fn disconnect(&mut self);
}

/// Connection state for the PubSub socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PubSubCommand {
    Connect,
    Listen(Vec<String>),
    Disconnect,
}

/// Handle used by the supervisor. Commands are executed by the paired
/// `PubSubConnection` task.
#[derive(Debug)]
pub struct PubSubClient {
    command_tx: mpsc::UnboundedSender<PubSubCommand>,
    pending_topics: Vec<String>,
}

impl PubSubClient {
    /// Creates a client and the connection task that serves it.
    ///
    /// The caller spawns `PubSubConnection::run`. Notifications are
    /// forwarded to `feed_tx`.
    pub fn new(url: impl Into<String>, feed_tx: mpsc::Sender<FeedEvent>) -> (Self, PubSubConnection) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let client = Self {
            command_tx,
            pending_topics: Vec::new(),
        };
        let connection = PubSubConnection {
            url: url.into(),
            command_rx,
            feed_tx,
            socket: None,
            state: ConnectionState::Disconnected,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            pong_deadline: None,
            current_backoff: INITIAL_BACKOFF,
            next_nonce: 0,
        };

        (client, connection)
    }

    fn send_command(&self, command: PubSubCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("PubSub connection task is gone, command dropped");
        }
    }
}

impl PubSubFeed for PubSubClient {
    fn connect(&mut self) {
        self.send_command(PubSubCommand::Connect);
    }

    fn listen_to_video_playback(&mut self, channel_id: &str) {
        self.pending_topics.push(playback_topic(channel_id));
    }

    fn send_topics(&mut self) {
        if self.pending_topics.is_empty() {
            return;
        }
        let topics = std::mem::take(&mut self.pending_topics);
        self.send_command(PubSubCommand::Listen(topics));
    }

    fn disconnect(&mut self) {
        self.pending_topics.clear();
        self.send_command(PubSubCommand::Disconnect);
    }
}

/// Returns the playback topic for a channel.
pub fn playback_topic(channel_id: &str) -> String {
    format!("{}{}", VIDEO_PLAYBACK_TOPIC, channel_id)
}

/// Task owning the socket. Runs until `Disconnect` or until the client
/// is dropped.
pub struct PubSubConnection {
    url: String,
    command_rx: mpsc::UnboundedReceiver<PubSubCommand>,
    feed_tx: mpsc::Sender<FeedEvent>,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    state: ConnectionState,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    /// Set while a PING is unanswered.
    pong_deadline: Option<Instant>,
    current_backoff: Duration,
    next_nonce: u64,
}

impl PubSubConnection {
    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    fn with_heartbeat(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    /// Runs the connection task.
    pub async fn run(mut self) {
        info!("PubSub connection task starting ({})", self.url);

        loop {
            let keep_running = if self.socket.is_some() {
                self.run_until_disconnect().await
            } else {
                match self.command_rx.recv().await {
                    Some(command) => self.handle_command(command).await,
                    None => false,
                }
            };

            if !keep_running {
                break;
            }
        }

        self.close().await;
        info!("PubSub connection task stopped");
    }

    /// Executes a command. Returns false when the task must stop.
    async fn handle_command(&mut self, command: PubSubCommand) -> bool {
        match command {
            PubSubCommand::Connect => {
                if self.socket.is_some() {
                    debug!("PubSub already connected, ignoring connect");
                    return true;
                }
                self.establish().await
            }
            PubSubCommand::Listen(topics) => {
                if self.socket.is_none() {
                    // Topics are re-sent after the next ServiceConnected.
                    debug!("Not connected, dropping {} topic(s)", topics.len());
                    return true;
                }
                if let Err(e) = self.listen(topics).await {
                    warn!("Failed to send LISTEN: {}", e);
                }
                true
            }
            PubSubCommand::Disconnect => {
                info!("Disconnect requested");
                false
            }
        }
    }

    /// Connects, retrying with backoff until it succeeds or the task is
    /// told to stop.
    async fn establish(&mut self) -> bool {
        loop {
            match self.connect().await {
                Ok(false) => return false,
                Ok(true) => {
                    if self.feed_tx.send(FeedEvent::service_connected()).await.is_err() {
                        warn!("Feed receiver dropped, stopping PubSub connection");
                        return false;
                    }
                    return true;
                }
                Err(e) => {
                    warn!(
                        "PubSub connection failed, retrying in {}ms: {}",
                        self.current_backoff.as_millis(),
                        e
                    );
                    if !self.wait_backoff().await {
                        return false;
                    }
                }
            }
        }
    }

    /// Establishes the socket.
    ///
    /// Returns `Ok(false)` if a `Disconnect` arrived before the handshake
    /// completed; the handshake is abandoned.
    async fn connect(&mut self) -> Result<bool, PubSubError> {
        info!("Connecting to PubSub: {}", self.url);
        self.state = ConnectionState::Connecting;

        let handshake = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()));
        tokio::pin!(handshake);

        let result = loop {
            tokio::select! {
                result = &mut handshake => break result,
                command = self.command_rx.recv() => match command {
                    None | Some(PubSubCommand::Disconnect) => {
                        info!("Disconnect requested while connecting");
                        self.state = ConnectionState::Disconnected;
                        return Ok(false);
                    }
                    // Topics are re-sent after ServiceConnected.
                    Some(other) => debug!("Ignoring {:?} while connecting", other),
                }
            }
        };

        match result {
            Ok(Ok((ws_stream, _response))) => {
                info!("PubSub connected successfully");
                self.socket = Some(ws_stream);
                self.state = ConnectionState::Connected;
                self.pong_deadline = None;
                self.current_backoff = INITIAL_BACKOFF;
                Ok(true)
            }
            Ok(Err(e)) => {
                error!("PubSub connection failed: {}", e);
                self.state = ConnectionState::Disconnected;
                Err(PubSubError::ConnectionFailed(e.to_string()))
            }
            Err(_) => {
                error!("PubSub handshake timed out after {:?}", CONNECT_TIMEOUT);
                self.state = ConnectionState::Disconnected;
                Err(PubSubError::ConnectionFailed("Handshake timed out".to_string()))
            }
        }
    }

    /// Sleeps for the current backoff and doubles it. A `Disconnect`
    /// received meanwhile cuts the wait short and returns false.
    async fn wait_backoff(&mut self) -> bool {
        self.state = ConnectionState::Reconnecting;
        let deadline = Instant::now() + self.current_backoff;
        self.current_backoff = std::cmp::min(self.current_backoff * 2, MAX_BACKOFF);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                command = self.command_rx.recv() => match command {
                    None | Some(PubSubCommand::Disconnect) => return false,
                    Some(other) => debug!("Ignoring {:?} while reconnecting", other),
                }
            }
        }
    }

    /// Sends a LISTEN request for the given topics.
    async fn listen(&mut self, topics: Vec<String>) -> Result<(), PubSubError> {
        let nonce = self.next_nonce();
        let conn = self
            .socket
            .as_mut()
            .ok_or_else(|| PubSubError::SendFailed("Not connected".to_string()))?;

        let request = ListenRequest {
            type_: "LISTEN",
            nonce,
            data: ListenData { topics: &topics },
        };

        let msg_json = serde_json::to_string(&request)
            .map_err(|e| PubSubError::SendFailed(e.to_string()))?;

        debug!("Sending LISTEN: {}", msg_json);

        conn.send(Message::Text(msg_json))
            .await
            .map_err(|e| PubSubError::SendFailed(e.to_string()))?;

        info!("Listening to {} topic(s)", topics.len());
        Ok(())
    }

    /// Sends a PING frame and arms the PONG deadline.
    async fn send_ping(&mut self) -> Result<(), PubSubError> {
        let conn = self
            .socket
            .as_mut()
            .ok_or_else(|| PubSubError::SendFailed("Not connected".to_string()))?;

        conn.send(Message::Text(r#"{"type":"PING"}"#.to_string()))
            .await
            .map_err(|e| PubSubError::SendFailed(e.to_string()))?;

        debug!("Sent PING");
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(Instant::now() + self.pong_timeout);
        }
        Ok(())
    }

    /// Serves the live socket until it is lost or the task must stop.
    ///
    /// A lost socket is re-established before returning, so the caller
    /// only has to loop while this returns true.
    async fn run_until_disconnect(&mut self) -> bool {
        let mut heartbeat =
            interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);

        loop {
            let pong_deadline = self.pong_deadline;
            let conn = match self.socket.as_mut() {
                Some(conn) => conn,
                None => return true,
            };

            let result = tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                return false;
                            }
                            Ok(())
                        }
                        None => return false,
                    }
                }

                frame = conn.next() => {
                    match frame {
                        Some(Ok(msg)) => self.handle_message(msg).await,
                        Some(Err(e)) => Err(PubSubError::ReceiveFailed(e.to_string())),
                        None => Err(PubSubError::ConnectionClosed("Stream ended".to_string())),
                    }
                }

                _ = heartbeat.tick() => self.send_ping().await,

                _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                    if pong_deadline.is_some() => Err(PubSubError::HeartbeatTimeout),
            };

            match result {
                Ok(()) => {}
                Err(PubSubError::FeedClosed) => {
                    warn!("Feed receiver dropped, stopping PubSub connection");
                    return false;
                }
                Err(e) => {
                    warn!("PubSub connection lost: {}", e);
                    self.close().await;
                    return self.establish().await;
                }
            }
        }
    }

    /// Handles an incoming frame.
    async fn handle_message(&mut self, msg: Message) -> Result<(), PubSubError> {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                Ok(ServerFrame::Pong) => {
                    debug!("Received PONG");
                    self.pong_deadline = None;
                }
                Ok(ServerFrame::Reconnect) => {
                    info!("Server requested reconnect");
                    return Err(PubSubError::ReconnectRequested);
                }
                Ok(ServerFrame::Response { nonce, error }) => {
                    if error.is_empty() {
                        debug!("LISTEN {} acknowledged", nonce.unwrap_or_default());
                    } else {
                        warn!("LISTEN {} rejected: {}", nonce.unwrap_or_default(), error);
                    }
                }
                Ok(ServerFrame::Message { data }) => {
                    if let Some(event) = playback_event(&data.topic, &data.message) {
                        self.feed_tx
                            .send(event)
                            .await
                            .map_err(|_| PubSubError::FeedClosed)?;
                    }
                }
                Ok(ServerFrame::Unknown) => {
                    debug!("Ignoring frame: {}", text);
                }
                Err(e) => {
                    debug!("Unparseable frame received: {} ({})", text, e);
                }
            },
            Message::Ping(data) => {
                if let Some(conn) = self.socket.as_mut() {
                    if let Err(e) = conn.send(Message::Pong(data)).await {
                        debug!("Failed to answer WebSocket ping: {}", e);
                    }
                }
            }
            Message::Pong(_) => {
                self.pong_deadline = None;
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                return Err(PubSubError::ConnectionClosed(reason));
            }
            Message::Binary(_) | Message::Frame(_) => {}
        }

        Ok(())
    }

    /// Closes the socket if open.
    async fn close(&mut self) {
        if let Some(mut conn) = self.socket.take() {
            if let Err(e) = conn.close(None).await {
                debug!("Failed to close PubSub socket cleanly: {}", e);
            }
            info!("PubSub socket closed");
        }
        self.pong_deadline = None;
        self.state = ConnectionState::Disconnected;
    }

    fn next_nonce(&mut self) -> String {
        self.next_nonce += 1;
        format!("listen-{}", self.next_nonce)
    }
}

impl std::fmt::Debug for PubSubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubConnection")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("awaiting_pong", &self.pong_deadline.is_some())
            .finish()
    }
}

/// Converts a MESSAGE payload into a feed notification.
///
/// Returns `None` for topics other than video playback and for playback
/// message types the supervisor does not track (commercials etc.).
pub fn playback_event(topic: &str, message: &str) -> Option<FeedEvent> {
    let channel_id = topic.strip_prefix(VIDEO_PLAYBACK_TOPIC)?;

    match serde_json::from_str::<PlaybackMessage>(message) {
        Ok(PlaybackMessage::StreamUp) => Some(FeedEvent::stream_up(channel_id)),
        Ok(PlaybackMessage::StreamDown) => Some(FeedEvent::stream_down(channel_id)),
        Ok(PlaybackMessage::Viewcount { viewers }) => {
            Some(FeedEvent::view_count(channel_id, viewers))
        }
        Ok(PlaybackMessage::Other) => None,
        Err(e) => {
            debug!("[#{}] Unparseable playback message: {} ({})", channel_id, message, e);
            None
        }
    }
}

// ============ Message Types ============

#[derive(Debug, Serialize)]
struct ListenRequest<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    nonce: String,
    data: ListenData<'a>,
}

#[derive(Debug, Serialize)]
struct ListenData<'a> {
    topics: &'a [String],
}

/// Frames sent by the server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerFrame {
    #[serde(rename = "PONG")]
    Pong,

    #[serde(rename = "RECONNECT")]
    Reconnect,

    #[serde(rename = "RESPONSE")]
    Response {
        nonce: Option<String>,
        #[serde(default)]
        error: String,
    },

    #[serde(rename = "MESSAGE")]
    Message { data: MessageData },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    topic: String,
    /// JSON document encoded as a string.
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum PlaybackMessage {
    StreamUp,
    StreamDown,
    Viewcount { viewers: u32 },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_connection_state_initial() {
        let (tx, _rx) = mpsc::channel(16);
        let (_client, connection) = PubSubClient::new(DEFAULT_PUBSUB_URL, tx);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_listen_request_serialization() {
        let topics = vec![playback_topic("123"), playback_topic("456")];
        let request = ListenRequest {
            type_: "LISTEN",
            nonce: "listen-1".to_string(),
            data: ListenData { topics: &topics },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"type":"LISTEN","nonce":"listen-1","data":{"topics":["video-playback-by-id.123","video-playback-by-id.456"]}}"#
        );
    }

    #[test]
    fn test_client_batches_topics() {
        let (tx, _rx) = mpsc::channel(16);
        let (mut client, mut connection) = PubSubClient::new(DEFAULT_PUBSUB_URL, tx);

        client.connect();
        client.listen_to_video_playback("a");
        client.listen_to_video_playback("b");
        client.send_topics();
        client.send_topics();
        client.disconnect();

        assert_eq!(connection.command_rx.try_recv().unwrap(), PubSubCommand::Connect);
        assert_eq!(
            connection.command_rx.try_recv().unwrap(),
            PubSubCommand::Listen(vec![
                "video-playback-by-id.a".to_string(),
                "video-playback-by-id.b".to_string(),
            ])
        );
        assert_eq!(connection.command_rx.try_recv().unwrap(), PubSubCommand::Disconnect);
        assert!(connection.command_rx.try_recv().is_err());
    }

    #[test]
    fn test_playback_event_viewcount() {
        let event = playback_event(
            "video-playback-by-id.42",
            r#"{"type":"viewcount","server_time":1700000000.5,"viewers":318}"#,
        );
        match event {
            Some(FeedEvent::ViewCount { channel_id, viewers, .. }) => {
                assert_eq!(channel_id, "42");
                assert_eq!(viewers, 318);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_playback_event_stream_up_and_down() {
        let up = playback_event(
            "video-playback-by-id.42",
            r#"{"type":"stream-up","server_time":1700000000,"play_delay":0}"#,
        );
        assert!(matches!(up, Some(FeedEvent::StreamUp { ref channel_id, .. }) if channel_id == "42"));

        let down = playback_event(
            "video-playback-by-id.42",
            r#"{"type":"stream-down","server_time":1700000000}"#,
        );
        assert!(matches!(down, Some(FeedEvent::StreamDown { ref channel_id, .. }) if channel_id == "42"));
    }

    #[test]
    fn test_playback_event_ignores_other_messages() {
        assert!(playback_event(
            "video-playback-by-id.42",
            r#"{"type":"commercial","server_time":1700000000,"length":30}"#,
        )
        .is_none());
        assert!(playback_event("chat_moderator_actions.42", r#"{"type":"viewcount","viewers":1}"#).is_none());
        assert!(playback_event("video-playback-by-id.42", "not json").is_none());
    }

    #[test]
    fn test_server_frame_parsing() {
        assert!(matches!(
            serde_json::from_str::<ServerFrame>(r#"{"type":"PONG"}"#).unwrap(),
            ServerFrame::Pong
        ));
        assert!(matches!(
            serde_json::from_str::<ServerFrame>(r#"{"type":"RECONNECT"}"#).unwrap(),
            ServerFrame::Reconnect
        ));
        match serde_json::from_str::<ServerFrame>(r#"{"type":"RESPONSE","nonce":"listen-3","error":"ERR_BADTOPIC"}"#).unwrap() {
            ServerFrame::Response { nonce, error } => {
                assert_eq!(nonce.as_deref(), Some("listen-3"));
                assert_eq!(error, "ERR_BADTOPIC");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        let message = r#"{"type":"MESSAGE","data":{"topic":"video-playback-by-id.7","message":"{\"type\":\"stream-down\"}"}}"#;
        match serde_json::from_str::<ServerFrame>(message).unwrap() {
            ServerFrame::Message { data } => {
                assert_eq!(data.topic, "video-playback-by-id.7");
                assert!(playback_event(&data.topic, &data.message).is_some());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    /// Accepts TCP connections and never answers the upgrade.
    async fn stalled_listener() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        url
    }

    #[tokio::test]
    async fn test_disconnect_abandons_stalled_handshake() {
        let url = stalled_listener().await;
        let (tx, _rx) = mpsc::channel(16);
        let (mut client, connection) = PubSubClient::new(url, tx);
        let task = tokio::spawn(connection.run());

        client.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.disconnect();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok(), "connection task should stop while the handshake hangs");
    }

    #[tokio::test]
    async fn test_unanswered_ping_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        // Never answers PINGs; reports how long the socket survived the first one.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut ping_at = None;
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) if text.contains("PING") => {
                        ping_at.get_or_insert_with(std::time::Instant::now);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            ping_at.map(|at| at.elapsed())
        });

        let (tx, mut rx) = mpsc::channel(16);
        let (mut client, connection) = PubSubClient::new(url, tx);
        let connection =
            connection.with_heartbeat(Duration::from_millis(500), Duration::from_millis(100));
        let task = tokio::spawn(connection.run());

        client.connect();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(first, Some(FeedEvent::ServiceConnected { .. })));

        let survived = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .expect("server should have received a PING");
        assert!(
            survived < Duration::from_millis(400),
            "socket outlived the PONG deadline: {:?}",
            survived
        );

        client.disconnect();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_stops_when_client_dropped() {
        let (tx, _rx) = mpsc::channel(16);
        let (client, connection) = PubSubClient::new(DEFAULT_PUBSUB_URL, tx);
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(1), connection.run()).await;
        assert!(result.is_ok(), "connection task should exit once the client is gone");
    }
}
