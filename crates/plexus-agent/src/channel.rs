//! WebSocket/Phoenix channel transport.
//!
//! Owns the socket and the channel framing: the join handshake, the
//! heartbeat task, the reader task, and the serialized writer.  Upward it
//! exposes a single async "payload arrived" callback for `message` events
//! plus a disconnect notification; everything else stays inside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::value::RawValue;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use plexus_protocol::{
    agent_topic, event, AckPayload, DidSpec, Frame, JoinParams, Reply, CONTROL_TOPIC, SOCKET_VSN,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::Transport;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub(crate) type InboundFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type DisconnectFn = Arc<dyn Fn(Error) + Send + Sync>;
pub(crate) type RejectFn = Arc<dyn Fn(String) + Send + Sync>;

/// Callbacks wired in by the session core before connecting.
pub(crate) struct ChannelCallbacks {
    /// Awaited for each inbound `message` payload, in wire order.
    pub on_message: InboundFn,
    /// Fired at most once when the connection drops.
    pub on_disconnect: Option<DisconnectFn>,
    /// Fired when the node rejects a fire-and-forget frame.
    pub on_server_reject: Option<RejectFn>,
}

// The write half and the ref counter live under one lock so writes never
// interleave and refs are strictly monotonic in wire order.
struct Writer {
    sink: Option<WsSink>,
    ref_counter: u64,
}

impl Writer {
    fn next_ref(&mut self) -> String {
        self.ref_counter += 1;
        self.ref_counter.to_string()
    }

    async fn write(&mut self, url: &str, frame: &Frame) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::NotConnected)?;
        let text = serde_json::to_string(frame)?;
        sink.send(WsMessage::Text(text)).await.map_err(|e| Error::Connection {
            url: url.to_owned(),
            reason: e.to_string(),
        })
    }
}

pub(crate) struct Channel {
    node_url: String,
    api_key: String,
    agent_did: String,
    topic: String,
    heartbeat_interval: Duration,
    join_timeout: Duration,

    writer: tokio::sync::Mutex<Writer>,
    pending_replies: parking_lot::Mutex<HashMap<String, oneshot::Sender<String>>>,
    assigned_did: parking_lot::RwLock<Option<String>>,
    callbacks: ChannelCallbacks,
    done: CancellationToken,
    disconnect_fired: AtomicBool,
}

impl Channel {
    pub(crate) fn new(cfg: &Config, callbacks: ChannelCallbacks) -> Arc<Self> {
        Arc::new(Self {
            node_url: cfg.node_url.clone(),
            api_key: cfg.api_key.clone(),
            agent_did: cfg.agent_did.clone(),
            topic: agent_topic(&cfg.agent_did),
            heartbeat_interval: cfg.heartbeat_interval,
            join_timeout: cfg.join_timeout,
            writer: tokio::sync::Mutex::new(Writer {
                sink: None,
                ref_counter: 0,
            }),
            pending_replies: parking_lot::Mutex::new(HashMap::new()),
            assigned_did: parking_lot::RwLock::new(None),
            callbacks,
            done: CancellationToken::new(),
            disconnect_fired: AtomicBool::new(false),
        })
    }

    /// Dial the node, start the reader, run the join handshake, and start
    /// the heartbeat.
    pub(crate) async fn connect(self: &Arc<Self>, protocols: Vec<String>) -> Result<()> {
        let url = self.build_url();
        tracing::info!(url = %self.node_url, topic = %self.topic, "connecting to node");

        let (ws, _response) =
            tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| Error::Connection {
                    url: self.node_url.clone(),
                    reason: e.to_string(),
                })?;
        let (sink, stream) = ws.split();
        self.writer.lock().await.sink = Some(sink);

        let reader = self.clone();
        tokio::spawn(async move { reader.read_loop(stream).await });

        if let Err(e) = self.join(protocols).await {
            self.shutdown(false).await;
            return Err(e);
        }

        let heartbeat = self.clone();
        tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        Ok(())
    }

    /// Connect URL with auth and protocol version query parameters.
    fn build_url(&self) -> String {
        let sep = if self.node_url.contains('?') { "&" } else { "?" };
        format!(
            "{}{}api_key={}&vsn={}",
            self.node_url, sep, self.api_key, SOCKET_VSN
        )
    }

    async fn join(&self, protocols: Vec<String>) -> Result<()> {
        let params = JoinParams {
            payload_types: protocols,
            // Without a configured DID, ask the node to mint an ephemeral one.
            did_spec: self.agent_did.is_empty().then(DidSpec::ephemeral_plugin),
        };
        let payload = serde_json::value::to_raw_value(&params)?;
        let (join_ref, reply_rx) = self.send_with_waiter(event::JOIN, payload, true).await?;

        let raw = match tokio::time::timeout(self.join_timeout, reply_rx).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(_)) | Err(_) => {
                self.pending_replies.lock().remove(&join_ref);
                return Err(self.connection_error("timed out waiting for join reply".into()));
            }
        };

        let reply: Reply = serde_json::from_str(&raw).unwrap_or_default();
        if !reply.is_ok() {
            let reason = reply
                .response
                .reason
                .unwrap_or_else(|| format!("join rejected: {}", reply.status));
            return Err(self.connection_error(reason));
        }
        if let Some(did) = reply.response.did.filter(|d| !d.is_empty()) {
            *self.assigned_did.write() = Some(did);
        }
        tracing::info!(topic = %self.topic, "joined channel");
        Ok(())
    }

    /// Write a frame and install a reply waiter under its ref.  The waiter
    /// is installed before the write so the reply cannot race it.
    async fn send_with_waiter(
        &self,
        evt: &str,
        payload: Box<RawValue>,
        as_join: bool,
    ) -> Result<(String, oneshot::Receiver<String>)> {
        if self.done.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        let msg_ref = writer.next_ref();
        let (tx, rx) = oneshot::channel();
        self.pending_replies.lock().insert(msg_ref.clone(), tx);

        let frame = Frame {
            join_ref: as_join.then(|| msg_ref.clone()),
            msg_ref: Some(msg_ref.clone()),
            topic: self.topic.clone(),
            event: evt.to_owned(),
            payload,
        };
        if let Err(e) = writer.write(&self.node_url, &frame).await {
            self.pending_replies.lock().remove(&msg_ref);
            return Err(e);
        }
        Ok((msg_ref, rx))
    }

    async fn send_frame(&self, evt: &str, payload: Box<RawValue>) -> Result<()> {
        if self.done.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        let msg_ref = writer.next_ref();
        let frame = Frame {
            join_ref: None,
            msg_ref: Some(msg_ref),
            topic: self.topic.clone(),
            event: evt.to_owned(),
            payload,
        };
        writer.write(&self.node_url, &frame).await
    }

    async fn read_loop(self: Arc<Self>, mut stream: WsStream) {
        loop {
            let next = tokio::select! {
                _ = self.done.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text).await,
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.notify_disconnect("connection closed by node".into());
                    return;
                }
                // Binary, ping, pong: not part of the channel protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.notify_disconnect(e.to_string());
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            // Skip undecodable frames.
            Err(_) => return,
        };
        match frame.event.as_str() {
            event::REPLY => {
                let waiter = frame
                    .msg_ref
                    .as_ref()
                    .and_then(|r| self.pending_replies.lock().remove(r));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame.payload.get().to_owned());
                    }
                    None => {
                        // A rejected fire-and-forget frame has no waiter;
                        // surface the refusal instead of dropping it.
                        let reply: Reply =
                            serde_json::from_str(frame.payload.get()).unwrap_or_default();
                        if !reply.is_ok() {
                            if let Some(reject) = &self.callbacks.on_server_reject {
                                reject(reply.response.reason.unwrap_or_else(|| {
                                    format!("server rejected frame: {}", reply.status)
                                }));
                            }
                        }
                    }
                }
            }
            event::MESSAGE => (self.callbacks.on_message)(frame.payload.get().to_owned()).await,
            event::ERROR | event::CLOSE => {
                self.notify_disconnect(format!("channel {}", frame.event));
            }
            _ => {}
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let period = self.heartbeat_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.done.cancelled() => return,
                _ = interval.tick() => {}
            }
            let result = {
                let mut writer = self.writer.lock().await;
                let msg_ref = writer.next_ref();
                let frame = Frame {
                    join_ref: None,
                    msg_ref: Some(msg_ref),
                    topic: CONTROL_TOPIC.to_owned(),
                    event: event::HEARTBEAT.to_owned(),
                    payload: Frame::empty_payload(),
                };
                writer.write(&self.node_url, &frame).await
            };
            if let Err(e) = result {
                self.notify_disconnect(format!("heartbeat write failed: {e}"));
                return;
            }
        }
    }

    /// Fires the disconnect callback at most once, and never after a
    /// deliberate close.
    fn notify_disconnect(&self, reason: String) {
        if self.done.is_cancelled() {
            return;
        }
        if self.disconnect_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(url = %self.node_url, reason = %reason, "disconnected from node");
        if let Some(on_disconnect) = &self.callbacks.on_disconnect {
            on_disconnect(self.connection_error(reason));
        }
    }

    /// Cancel the done token and drop the carrier; optionally write a
    /// best-effort leave frame first.
    async fn shutdown(&self, send_leave: bool) {
        let mut writer = self.writer.lock().await;
        self.done.cancel();
        let msg_ref = writer.next_ref();
        if let Some(mut sink) = writer.sink.take() {
            if send_leave {
                let leave = Frame {
                    join_ref: None,
                    msg_ref: Some(msg_ref),
                    topic: self.topic.clone(),
                    event: event::LEAVE.to_owned(),
                    payload: Frame::empty_payload(),
                };
                if let Ok(text) = serde_json::to_string(&leave) {
                    let _ = sink.send(WsMessage::Text(text)).await;
                }
            }
            let _ = sink.close().await;
        }
    }

    fn connection_error(&self, reason: String) -> Error {
        Error::Connection {
            url: self.node_url.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Transport for Channel {
    async fn send(&self, evt: &str, payload: String) -> Result<()> {
        let payload = RawValue::from_string(payload)?;
        self.send_frame(evt, payload).await
    }

    async fn send_with_reply(&self, evt: &str, payload: String, timeout: Duration) -> Result<()> {
        let payload = RawValue::from_string(payload)?;
        let (msg_ref, reply_rx) = self.send_with_waiter(evt, payload, false).await?;

        let raw = match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(_)) | Err(_) => {
                self.pending_replies.lock().remove(&msg_ref);
                return Err(Error::Timeout);
            }
        };
        let reply: Reply = serde_json::from_str(&raw).unwrap_or_default();
        if !reply.is_ok() {
            return Err(self.connection_error(reply.response.reason.unwrap_or_else(|| {
                format!("server rejected frame: {}", reply.status)
            })));
        }
        Ok(())
    }

    async fn send_ack(&self, ids: &[String]) -> Result<()> {
        let payload = serde_json::value::to_raw_value(&AckPayload { ids: ids.to_vec() })?;
        self.send_frame(event::ACK, payload).await
    }

    async fn close(&self) {
        if self.done.is_cancelled() {
            return;
        }
        self.shutdown(true).await;
    }

    fn assigned_did(&self) -> Option<String> {
        self.assigned_did.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callbacks() -> ChannelCallbacks {
        ChannelCallbacks {
            on_message: Arc::new(|_: String| -> BoxFuture<'static, ()> { Box::pin(async {}) }),
            on_disconnect: None,
            on_server_reject: None,
        }
    }

    fn test_channel() -> Arc<Channel> {
        let cfg = Config::new("ws://localhost:4000/plugin_socket/websocket", "secret")
            .with_agent_did("did:web:test");
        Channel::new(&cfg, noop_callbacks())
    }

    #[test]
    fn build_url_appends_query_params() {
        let channel = test_channel();
        assert_eq!(
            channel.build_url(),
            "ws://localhost:4000/plugin_socket/websocket?api_key=secret&vsn=2.0.0"
        );
    }

    #[test]
    fn build_url_with_existing_query_params() {
        let cfg = Config::new("ws://localhost:4000/socket?foo=bar", "secret");
        let channel = Channel::new(&cfg, noop_callbacks());
        assert_eq!(
            channel.build_url(),
            "ws://localhost:4000/socket?foo=bar&api_key=secret&vsn=2.0.0"
        );
    }

    #[test]
    fn topic_derived_from_agent_did() {
        let channel = test_channel();
        assert_eq!(channel.topic, "plugins:did:web:test");
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let channel = test_channel();
        channel.done.cancel();
        let err = channel.send(event::MESSAGE, "{}".into()).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
