//! The agent client: session lifecycle, inbound routing, and the
//! send/request surface.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};

use plexus_protocol::{event, CANT_PROCESS_CODE, PROBLEM_REPORT_TYPE};

use crate::channel::{Channel, ChannelCallbacks, DisconnectFn, InboundFn, RejectFn};
use crate::config::Config;
use crate::correlation::CorrelationTable;
use crate::error::{Error, ErrorSink, Result, SdkError};
use crate::handler::{HandlerEntry, HandlerRegistry, MessageHandler};
use crate::message::{encode_outbound, new_id, parse_inbound, AckHandle, Message};
use crate::options::{AckMode, HandlerOptions, RequestOptions, SendOptions};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Connected,
    Closed,
}

/// Client for a Plexus node.
///
/// Register handlers with [`handle`](Self::handle), then
/// [`connect`](Self::connect).  After connect, every method except handler
/// registration may be called concurrently from any task.  Cheap to clone;
/// clones share the session.
#[derive(Clone)]
pub struct AgentClient {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Config,
    registry: RwLock<HandlerRegistry>,
    state: Mutex<State>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    agent_did: RwLock<String>,
    pending: CorrelationTable,
    error_sink: ErrorSink,
    disconnect_fn: Mutex<Option<DisconnectFn>>,
    // Held for a future reconnect driver; v1 never fires it.
    #[allow(dead_code)]
    reconnect_fn: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl AgentClient {
    /// Create a client.  The error sink receives every SDK-level error
    /// that has no caller to return to (parse failures, missing handlers,
    /// handler panics); see [`log_errors`](crate::log_errors) for a
    /// tracing-backed sink.
    pub fn new(cfg: Config, error_sink: ErrorSink) -> Result<Self> {
        let cfg = cfg.resolve()?;
        let agent_did = cfg.agent_did.clone();
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                registry: RwLock::new(HandlerRegistry::default()),
                state: Mutex::new(State::New),
                transport: Mutex::new(None),
                agent_did: RwLock::new(agent_did),
                pending: CorrelationTable::default(),
                error_sink,
                disconnect_fn: Mutex::new(None),
                reconnect_fn: Mutex::new(None),
            }),
        })
    }

    /// Register a handler for a message type, acknowledging on receipt.
    /// Must be called before [`connect`](Self::connect); the protocol base
    /// URI is derived automatically and advertised to the node at join.
    pub fn handle<H: MessageHandler>(
        &self,
        msg_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        self.handle_with(msg_type, handler, HandlerOptions::default())
    }

    /// Register a handler with explicit options (e.g. manual ack).
    pub fn handle_with<H: MessageHandler>(
        &self,
        msg_type: impl Into<String>,
        handler: H,
        opts: HandlerOptions,
    ) -> Result<()> {
        let state = self.inner.state.lock();
        match *state {
            State::Connected => return Err(Error::AlreadyConnected),
            State::Closed => return Err(Error::Closed),
            State::New => {}
        }
        self.inner
            .registry
            .write()
            .register(msg_type.into(), Arc::new(handler), opts.ack_mode)
    }

    /// Establish the connection and join the channel with the protocols
    /// derived from registered handlers.
    pub async fn connect(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            match *state {
                State::Connected => return Err(Error::AlreadyConnected),
                State::Closed => return Err(Error::Closed),
                State::New => {}
            }
        }

        let protocols = self.inner.registry.read().protocols();

        // The channel stores this closure and the client stores the
        // channel, so the router must be held weakly.
        let router = Arc::downgrade(&self.inner);
        let on_message: InboundFn = Arc::new(move |payload: String| -> BoxFuture<'static, ()> {
            let router = router.clone();
            Box::pin(async move {
                if let Some(router) = router.upgrade() {
                    router.route_inbound(payload).await;
                }
            })
        });
        let sink = self.inner.error_sink.clone();
        let on_server_reject: RejectFn =
            Arc::new(move |reason: String| sink(SdkError::server_reject(reason)));

        let channel = Channel::new(
            &self.inner.cfg,
            ChannelCallbacks {
                on_message,
                on_disconnect: self.inner.disconnect_fn.lock().clone(),
                on_server_reject: Some(on_server_reject),
            },
        );
        channel.connect(protocols).await?;

        // Adopt the node-assigned DID when none was configured; the
        // session identity never changes after this point.
        if self.inner.agent_did.read().is_empty() {
            if let Some(did) = channel.assigned_did() {
                *self.inner.agent_did.write() = did;
            }
        }

        let transport: Arc<dyn Transport> = channel;
        *self.inner.transport.lock() = Some(transport);
        *self.inner.state.lock() = State::Connected;
        Ok(())
    }

    /// Send a fire-and-forget message.  Returns once the frame has been
    /// written to the connection.  The message's id and originator are
    /// filled in place when empty.
    pub async fn send(&self, msg: &mut Message) -> Result<()> {
        self.send_with(msg, SendOptions::default()).await
    }

    /// Send with options; [`SendOptions::await_server_reply`] waits for
    /// the node's reply to the frame and surfaces a rejection as a
    /// connection error.
    pub async fn send_with(&self, msg: &mut Message, opts: SendOptions) -> Result<()> {
        let transport = self.connected_transport()?;
        self.fill_outbound(msg);
        let payload = encode_outbound(msg)?;
        if opts.await_server_reply {
            transport
                .send_with_reply(event::MESSAGE, payload, opts.reply_timeout)
                .await
        } else {
            transport.send(event::MESSAGE, payload).await
        }
    }

    /// Send a message and wait for the thread-correlated response.
    ///
    /// A fresh thread id is minted (in place) when the message has none.
    /// A problem-report response is returned as
    /// [`Error::RemoteProblem`]; the deadline yields [`Error::Timeout`].
    pub async fn request(&self, msg: &mut Message) -> Result<Message> {
        self.request_with(msg, RequestOptions::default()).await
    }

    /// [`request`](Self::request) with an explicit deadline and/or parent
    /// thread.
    pub async fn request_with(&self, msg: &mut Message, opts: RequestOptions) -> Result<Message> {
        let transport = self.connected_transport()?;
        self.fill_outbound(msg);
        if msg.thread_id.is_empty() {
            msg.thread_id = new_id();
        }
        if let Some(pthid) = opts.parent_thread {
            msg.parent_thread_id = pthid;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner.pending.insert(msg.thread_id.clone(), tx);
        // Removes the slot on every exit path, including future drop.
        let _slot = SlotGuard {
            table: &self.inner.pending,
            thread_id: msg.thread_id.clone(),
        };

        let payload = encode_outbound(msg)?;
        transport.send(event::MESSAGE, payload).await?;

        let resp = match tokio::time::timeout(opts.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) | Err(_) => return Err(Error::Timeout),
        };

        if resp.msg_type == PROBLEM_REPORT_TYPE {
            let problem: plexus_protocol::ProblemReportBody = resp.body_as()?;
            return Err(Error::RemoteProblem {
                code: problem.code,
                comment: problem.comment,
            });
        }
        Ok(resp)
    }

    /// Gracefully shut down the connection.  Idempotent.  Outstanding
    /// requests are not cancelled; they observe their own deadlines.
    pub async fn close(&self) {
        let transport = {
            let mut state = self.inner.state.lock();
            if *state == State::Closed {
                return;
            }
            *state = State::Closed;
            self.inner.transport.lock().take()
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// The session identity: the configured DID, else the node-assigned
    /// one, else empty before connect.
    pub fn did(&self) -> String {
        self.inner.agent_did.read().clone()
    }

    /// Register a callback invoked when the connection drops.  Register
    /// before [`connect`](Self::connect).
    pub fn on_disconnect(&self, callback: impl Fn(Error) + Send + Sync + 'static) {
        *self.inner.disconnect_fn.lock() = Some(Arc::new(callback));
    }

    /// Register a callback invoked when the connection is restored.  The
    /// client does not reconnect by itself, so this fires only under a
    /// caller-side reconnect driver.
    pub fn on_reconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.reconnect_fn.lock() = Some(Arc::new(callback));
    }

    fn connected_transport(&self) -> Result<Arc<dyn Transport>> {
        {
            let state = self.inner.state.lock();
            match *state {
                State::New => return Err(Error::NotConnected),
                State::Closed => return Err(Error::Closed),
                State::Connected => {}
            }
        }
        self.inner.transport.lock().clone().ok_or(Error::NotConnected)
    }

    fn fill_outbound(&self, msg: &mut Message) {
        if msg.id.is_empty() {
            msg.id = new_id();
        }
        if msg.from.is_empty() {
            msg.from = self.inner.agent_did.read().clone();
        }
    }
}

struct SlotGuard<'a> {
    table: &'a CorrelationTable,
    thread_id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.thread_id);
    }
}

impl Inner {
    /// Single entry point for inbound payloads, awaited by the transport
    /// reader in wire order.
    async fn route_inbound(self: &Arc<Self>, payload: String) {
        let mut msg = match parse_inbound(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                (self.error_sink)(SdkError::parse_failure(payload.into_bytes(), e));
                return;
            }
        };

        // Correlated responses flow back to their waiter before any
        // handler lookup, regardless of message type.  A drained slot
        // means the waiter is gone; fall through to handler routing.
        if !msg.thread_id.is_empty() {
            if let Some(slot) = self.pending.take(&msg.thread_id) {
                let _ = slot.send(msg);
                return;
            }
        }

        let entry = match self.registry.read().lookup(&msg.msg_type) {
            Some(entry) => entry,
            None => {
                (self.error_sink)(SdkError::no_handler(
                    msg.id.clone(),
                    msg.msg_type.clone(),
                    msg.from.clone(),
                ));
                return;
            }
        };

        let Some(transport) = self.transport.lock().clone() else {
            return;
        };
        match entry.ack_mode {
            AckMode::Auto => {
                if let Err(e) = transport.send_ack(std::slice::from_ref(&msg.id)).await {
                    (self.error_sink)(SdkError::transport_write(msg.id.clone(), e));
                }
            }
            AckMode::Manual => {
                msg.ack = Some(AckHandle::new(
                    msg.id.clone(),
                    Arc::downgrade(&transport),
                    self.error_sink.clone(),
                ));
            }
        }

        // Handlers run on their own task so the reader is never blocked.
        let worker = self.clone();
        tokio::spawn(async move { worker.run_handler(entry, msg).await });
    }

    async fn run_handler(self: Arc<Self>, entry: HandlerEntry, msg: Message) {
        let origin_id = msg.id.clone();
        let origin_type = msg.msg_type.clone();
        let origin_from = msg.from.clone();
        let origin_thread = if msg.thread_id.is_empty() {
            msg.id.clone()
        } else {
            msg.thread_id.clone()
        };

        let outcome = AssertUnwindSafe(entry.handler.handle(msg)).catch_unwind().await;
        match outcome {
            Ok(Ok(Some(mut resp))) => {
                if resp.from.is_empty() {
                    resp.from = self.agent_did.read().clone();
                }
                if resp.to.is_empty() && !origin_from.is_empty() {
                    resp.to = vec![origin_from];
                }
                if resp.thread_id.is_empty() {
                    resp.thread_id = origin_thread;
                }
                if let Err(e) = self.send_outbound(&mut resp).await {
                    (self.error_sink)(SdkError::transport_write(resp.id.clone(), e));
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(handler_err)) => {
                self.send_problem_report(&origin_from, &origin_thread, handler_err)
                    .await;
            }
            Err(panic) => {
                (self.error_sink)(SdkError::handler_panic(
                    origin_id,
                    origin_type,
                    origin_from,
                    anyhow::anyhow!(panic_message(panic)),
                ));
            }
        }
    }

    /// The only automatic remote-error signalling path: a handler error
    /// becomes a problem report to the original sender.
    async fn send_problem_report(&self, to: &str, thread_id: &str, handler_err: anyhow::Error) {
        let mut report = Message::new(PROBLEM_REPORT_TYPE)
            .with_to([to])
            .with_thread(thread_id)
            .with_body(serde_json::json!({
                "code": CANT_PROCESS_CODE,
                "comment": handler_err.to_string(),
            }));
        if let Err(e) = self.send_outbound(&mut report).await {
            (self.error_sink)(SdkError::transport_write(report.id.clone(), e));
        }
    }

    async fn send_outbound(&self, msg: &mut Message) -> Result<()> {
        if msg.id.is_empty() {
            msg.id = new_id();
        }
        if msg.from.is_empty() {
            msg.from = self.agent_did.read().clone();
        }
        let payload = encode_outbound(msg)?;
        let transport = self.transport.lock().clone().ok_or(Error::NotConnected)?;
        transport.send(event::MESSAGE, payload).await
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
