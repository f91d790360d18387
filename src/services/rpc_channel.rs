//! Persistent WebSocket link to the scoreboard: request correlation, server command dispatch
//! and keepalive.

use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    SinkExt, StreamExt,
    future::{BoxFuture, FutureExt},
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::TcpStream,
    sync::{Mutex, RwLock, mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{
            HeaderValue, StatusCode,
            header::{AUTHORIZATION, CONTENT_TYPE},
        },
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::identity::MachineIdentity,
    dto::rpc::{InboundFrame, RpcRequest, RpcResponse, ServerCommand},
    error::RpcError,
    services::commands::CommandTable,
    state::Shutdown,
};

/// Keepalive endpoint.
pub const PING_PATH: &str = "/api/v1/ping";
/// Close code the scoreboard uses to reject machine credentials.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;
const MACHINE_UUID_HEADER: &str = "x-machine-uuid";
const OUTBOUND_CAPACITY: usize = 64;
const JOIN_GRACE: Duration = Duration::from_secs(2);
const VERSION: &str = env!("CARGO_PKG_VERSION");

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Request/response transport used by the session and score services.
pub trait RpcClient: Send + Sync {
    /// Send `request` and wait for its correlated response.
    fn call(&self, request: RpcRequest) -> BoxFuture<'static, Result<RpcResponse, RpcError>>;
    /// Send `request` without waiting for a response.
    fn send(&self, request: RpcRequest) -> BoxFuture<'static, Result<(), RpcError>>;
}

/// Connection parameters for [`RpcChannel`].
#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Upper bound on the opening handshake.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a correlated response.
    pub request_timeout: Duration,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Pause between teardown and reopening on reconnect.
    pub reconnect_settle: Duration,
}

impl From<&AppConfig> for RpcSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.server_url.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            keepalive_interval: config.keepalive_interval,
            reconnect_settle: config.reconnect_settle,
        }
    }
}

/// Why the server side of the link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code, when the server sent one.
    pub code: Option<u16>,
    /// Close reason or transport error text.
    pub reason: String,
}

impl CloseReason {
    /// Whether the server rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        self.code == Some(AUTH_FAILURE_CLOSE_CODE)
    }

    fn from_frame(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => Self {
                code: None,
                reason: "closed without a close frame".into(),
            },
        }
    }

    fn transport(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Tasks owned by one open connection.
struct Link {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    keepalive: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

struct ChannelInner {
    settings: RpcSettings,
    identity: RwLock<Option<Arc<MachineIdentity>>>,
    pending: DashMap<Uuid, oneshot::Sender<RpcResponse>>,
    commands: OnceLock<CommandTable>,
    connected: watch::Sender<bool>,
    link: Mutex<Option<Link>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    last_close: Mutex<Option<CloseReason>>,
    shutdown: Shutdown,
}

/// Shared handle on the scoreboard connection.
///
/// Clones share one connection. Sends while disconnected are dropped, never queued.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

/// Non-owning handle used by command handlers stored inside the channel itself.
#[derive(Clone)]
pub struct WeakRpcChannel {
    inner: Weak<ChannelInner>,
}

impl WeakRpcChannel {
    /// Recover the channel if it is still alive.
    pub fn upgrade(&self) -> Option<RpcChannel> {
        self.inner.upgrade().map(|inner| RpcChannel { inner })
    }
}

/// Removes a pending entry when the caller stops waiting, whatever the reason.
struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, oneshot::Sender<RpcResponse>>,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl RpcChannel {
    /// Create a disconnected channel. `shutdown` stops reconnects and refuses new connections.
    pub fn new(settings: RpcSettings, shutdown: Shutdown) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(ChannelInner {
                settings,
                identity: RwLock::new(None),
                pending: DashMap::new(),
                commands: OnceLock::new(),
                connected,
                link: Mutex::new(None),
                outbound: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                last_close: Mutex::new(None),
                shutdown,
            }),
        }
    }

    /// Non-owning handle on this channel.
    pub fn downgrade(&self) -> WeakRpcChannel {
        WeakRpcChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Replace the machine identity used for handshakes and command targeting.
    pub async fn set_identity(&self, identity: MachineIdentity) {
        info!(uuid = %identity.uuid, "machine identity installed");
        *self.inner.identity.write().await = Some(Arc::new(identity));
    }

    /// Current machine identity, if one is loaded.
    pub async fn identity(&self) -> Option<Arc<MachineIdentity>> {
        self.inner.identity.read().await.clone()
    }

    /// Install the server command table. Returns `false` if one was already installed.
    pub fn install_commands(&self, table: CommandTable) -> bool {
        self.inner.commands.set(table).is_ok()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Observe connection state changes.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Number of calls still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Why the server last closed the link, if it did.
    pub async fn close_reason(&self) -> Option<CloseReason> {
        self.inner.last_close.lock().await.clone()
    }

    /// Open the transport, waiting up to the connect timeout for the handshake.
    ///
    /// Already-open links are kept; a link the server closed is torn down and reopened.
    pub async fn connect(&self) -> Result<(), RpcError> {
        if self.inner.shutdown.is_triggered() {
            return Err(RpcError::ChannelClosed);
        }

        let mut link = self.inner.link.lock().await;
        if link.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = link.take() {
            self.close_link(stale).await;
        }

        let request = self.handshake_request().await?;
        let settings = &self.inner.settings;
        let socket = match timeout(settings.connect_timeout, connect_async(request)).await {
            Err(_) => {
                return Err(RpcError::Connection(format!(
                    "no handshake within {:?}",
                    settings.connect_timeout
                )));
            }
            Ok(Err(WsError::Http(response))) if response.status() == StatusCode::UNAUTHORIZED => {
                return Err(RpcError::Authentication);
            }
            Ok(Err(err)) => return Err(RpcError::Connection(err.to_string())),
            Ok(Ok((socket, _response))) => socket,
        };

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (stop, stop_rx) = watch::channel(false);

        *self.inner.outbound.lock().await = Some(outbound_tx);
        *self.inner.last_close.lock().await = None;
        self.inner.connected.send_replace(true);

        // Dedicated writer task keeps outbound frames flowing while the reader awaits inbound ones.
        let writer = tokio::spawn(write_frames(sink, outbound_rx));
        let reader = tokio::spawn(self.clone().read_frames(stream, stop_rx.clone()));
        let keepalive = tokio::spawn(self.clone().keepalive(stop_rx));

        *link = Some(Link {
            reader,
            writer,
            keepalive,
            stop,
        });
        info!(url = %settings.url, "connected to scoreboard");
        Ok(())
    }

    /// Tear the link down and reopen it with the current identity after the settle delay.
    pub async fn reconnect(&self) -> Result<(), RpcError> {
        info!("reconnecting to scoreboard");
        self.teardown().await;
        sleep(self.inner.settings.reconnect_settle).await;
        self.connect().await
    }

    /// Run [`Self::reconnect`] on a supervised background task.
    ///
    /// Requests are chained: a new one waits for the previous one to finish.
    pub async fn schedule_reconnect(&self) {
        let mut slot = self.inner.reconnect_task.lock().await;
        let previous = slot.take();
        let channel = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        *slot = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            tokio::select! {
                _ = shutdown.wait() => debug!("reconnect abandoned; shutting down"),
                result = channel.reconnect() => {
                    if let Err(err) = result {
                        error!(error = %err, "reconnect failed");
                    }
                }
            }
        }));
    }

    /// Send `request` and wait for the correlated response, bounded by the request timeout.
    pub async fn call(&self, mut request: RpcRequest) -> Result<RpcResponse, RpcError> {
        let outbound = self.outbound().await.ok_or(RpcError::Disconnected)?;
        let (id, response) = self.register_pending();
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        request.request_id = Some(id);
        debug!(request_id = %id, path = %request.path, "sending request");
        self.transmit(&outbound, request).await?;

        match timeout(self.inner.settings.request_timeout, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => Err(RpcError::Timeout(id)),
        }
    }

    /// Fire-and-forget send. Dropped with [`RpcError::Disconnected`] while disconnected.
    pub async fn send(&self, request: RpcRequest) -> Result<(), RpcError> {
        let Some(outbound) = self.outbound().await else {
            debug!(path = %request.path, "not connected; dropping message");
            return Err(RpcError::Disconnected);
        };
        self.transmit(&outbound, request).await
    }

    /// Close the link for good: stop reconnects, close the socket, fail outstanding calls.
    pub async fn shutdown(&self) {
        self.inner.shutdown.trigger();
        if let Some(task) = self.inner.reconnect_task.lock().await.take() {
            let _ = task.await;
        }
        self.teardown().await;
        info!("scoreboard channel closed");
    }

    /// Route one inbound text frame to its waiting caller or to the command table.
    pub(crate) async fn dispatch_frame(&self, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Response(response)) => {
                let id = response.request_id;
                match self.inner.pending.remove(&id) {
                    Some((_, waiter)) => {
                        if waiter.send(response).is_err() {
                            debug!(request_id = %id, "caller stopped waiting for response");
                        }
                    }
                    None => error!(request_id = %id, "missing or invalid request id; dropping response"),
                }
            }
            Ok(InboundFrame::Command(command)) => self.dispatch_command(command).await,
            Err(err) => error!(error = %err, "dropping inbound frame"),
        }
    }

    async fn dispatch_command(&self, command: ServerCommand) {
        let Some(identity) = self.identity().await else {
            debug!(cmd = %command.cmd, "no identity loaded; ignoring command");
            return;
        };
        if !command.targets(identity.uuid) {
            debug!(cmd = %command.cmd, target = %command.uuid, "command addressed to another machine");
            return;
        }

        let Some(handler) = self
            .inner
            .commands
            .get()
            .and_then(|table| table.get(&command.cmd))
        else {
            warn!(cmd = %command.cmd, "unknown command");
            return;
        };

        info!(cmd = %command.cmd, "dispatching server command");
        handler(command).await;
    }

    fn register_pending(&self) -> (Uuid, oneshot::Receiver<RpcResponse>) {
        let (tx, rx) = oneshot::channel();
        loop {
            let id = Uuid::new_v4();
            if let Entry::Vacant(slot) = self.inner.pending.entry(id) {
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    async fn outbound(&self) -> Option<mpsc::Sender<Message>> {
        self.inner.outbound.lock().await.clone()
    }

    async fn transmit(
        &self,
        outbound: &mpsc::Sender<Message>,
        mut request: RpcRequest,
    ) -> Result<(), RpcError> {
        request.version = Some(VERSION.to_owned());
        let text = serde_json::to_string(&request)?;
        outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| RpcError::Disconnected)
    }

    async fn handshake_request(&self) -> Result<Request, RpcError> {
        let header_err = |what: &str| RpcError::Connection(format!("{what} is not a valid header value"));

        let mut request = self
            .inner
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| RpcError::Connection(err.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        if let Some(identity) = self.identity().await {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", identity.token))
                .map_err(|_| header_err("token"))?;
            let machine = HeaderValue::from_str(&identity.uuid.to_string())
                .map_err(|_| header_err("machine uuid"))?;
            headers.insert(AUTHORIZATION, bearer);
            headers.insert(MACHINE_UUID_HEADER, machine);
        }

        Ok(request)
    }

    async fn read_frames(self, mut stream: SplitStream<WsStream>, mut stop: watch::Receiver<bool>) {
        let reason = loop {
            tokio::select! {
                _ = stop.changed() => break None,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch_frame(&text).await,
                    Some(Ok(Message::Close(frame))) => break Some(CloseReason::from_frame(frame)),
                    // Ping replies are sent by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Some(CloseReason::transport(err.to_string())),
                    None => break Some(CloseReason::transport("stream ended")),
                },
            }
        };

        let Some(reason) = reason else {
            return;
        };
        if reason.is_auth_failure() {
            error!(reason = %reason, "scoreboard rejected machine credentials");
        } else {
            warn!(reason = %reason, "scoreboard closed the connection");
        }
        *self.inner.last_close.lock().await = Some(reason);
        self.mark_disconnected().await;
    }

    async fn keepalive(self, mut stop: watch::Receiver<bool>) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut connected = self.subscribe_connected();
        let period = self.inner.settings.keepalive_interval;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = shutdown.wait() => break,
                _ = wait_disconnected(&mut connected) => break,
                _ = sleep(period) => {}
            }

            if self.identity().await.is_none() {
                continue;
            }

            match timeout(period, self.call(RpcRequest::post(PING_PATH))).await {
                Ok(Ok(response)) if response.is_success() => debug!("keepalive ping acknowledged"),
                Ok(Ok(response)) => warn!(status = response.status, "keepalive ping rejected"),
                Ok(Err(err)) => warn!(error = %err, "keepalive ping failed"),
                Err(_) => warn!("keepalive ping timed out"),
            }
        }
        debug!("keepalive stopped");
    }

    async fn mark_disconnected(&self) {
        self.inner.connected.send_replace(false);
        self.inner.outbound.lock().await.take();
        self.fail_pending();
    }

    /// Dropping every waiter resolves its caller with [`RpcError::ChannelClosed`].
    fn fail_pending(&self) {
        let outstanding = self.inner.pending.len();
        self.inner.pending.clear();
        if outstanding > 0 {
            debug!(outstanding, "failed outstanding requests");
        }
    }

    async fn teardown(&self) {
        let link = self.inner.link.lock().await.take();
        match link {
            Some(link) => self.close_link(link).await,
            None => self.mark_disconnected().await,
        }
    }

    async fn close_link(&self, link: Link) {
        let outbound = self.inner.outbound.lock().await.take();
        if let Some(outbound) = outbound {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = outbound.send(Message::Close(Some(frame))).await;
        }

        link.stop.send_replace(true);
        self.inner.connected.send_replace(false);
        self.fail_pending();

        for (name, mut handle) in [
            ("reader", link.reader),
            ("keepalive", link.keepalive),
            ("writer", link.writer),
        ] {
            if timeout(JOIN_GRACE, &mut handle).await.is_err() {
                warn!(task = name, "link task did not stop in time; aborting");
                handle.abort();
            }
        }
    }
}

impl RpcClient for RpcChannel {
    fn call(&self, request: RpcRequest) -> BoxFuture<'static, Result<RpcResponse, RpcError>> {
        let channel = self.clone();
        async move { channel.call(request).await }.boxed()
    }

    fn send(&self, request: RpcRequest) -> BoxFuture<'static, Result<(), RpcError>> {
        let channel = self.clone();
        async move { channel.send(request).await }.boxed()
    }
}

async fn write_frames(mut sink: SplitSink<WsStream, Message>, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = sink.send(message).await {
            warn!(error = %err, "websocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn wait_disconnected(connected: &mut watch::Receiver<bool>) {
    let _ = connected.wait_for(|up| !*up).await;
}
