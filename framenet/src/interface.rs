//! 网络接口
//!
//! 给宿主应用（例如游戏引擎的逐帧循环）提供同步、非阻塞的连接接口：
//!
//! - `connect_async` 立即返回，连接在后台 tokio 运行时中完成，
//!   结果通过 oneshot 通道送回，由 `update`/`poll` 取出并处理，每次连接只处理一次。
//! - 收发都由应用主动驱动：`send`/`flush` 写，`poll` 读，
//!   后台任务从不触碰接收缓冲区和发送队列。
//! - 所有 IO 故障都记录为 `last_error` 并使接口失效，不会跨线程抛出。
//!
//! 持有 oneshot 接收端即表示仍拥有这次连接尝试。`close` 会丢弃接收端，
//! 之后到达的结果由后台任务直接丢弃（同时关闭 socket）。

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::lookup_host;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::frame::{Frame, MessageId};
use crate::receiver::PacketReceiver;
use crate::sender::PacketSender;
use crate::transport::{RawStream, TcpTransport, Transport};
use crate::IO_THREAD_NAME;

/// 接口状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// 未连接
    Idle,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 连接失败或连接已失效，错误见 `last_error`
    Failed,
}

/// 一次连接尝试的状态，由后台任务填写，完成回调消费一次
pub struct ConnectState<S> {
    pub attempt: u64,
    pub host: String,
    pub port: u16,
    /// 解析出的目标地址
    pub remote: Option<SocketAddr>,
    /// 连接成功后的字节流
    pub stream: Option<S>,
    pub error: Option<NetError>,
}

impl<S> ConnectState<S> {
    fn new(attempt: u64, host: &str, port: u16) -> Self {
        Self {
            attempt,
            host: host.to_string(),
            port,
            remote: None,
            stream: None,
            error: None,
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn into_result(self) -> Result<(SocketAddr, S)> {
        let target = self.target();
        match (self.error, self.stream, self.remote) {
            (Some(e), _, _) => Err(e),
            (None, Some(stream), Some(remote)) => Ok((remote, stream)),
            _ => Err(NetError::ConnectFailure {
                addr: target,
                reason: "connect task finished without a stream".to_string(),
            }),
        }
    }
}

impl<S> fmt::Debug for ConnectState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectState")
            .field("attempt", &self.attempt)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("remote", &self.remote)
            .field("connected", &self.stream.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// 交给连接回调的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub attempt: u64,
    pub host: String,
    pub port: u16,
    /// 成功时为对端地址，失败时为错误描述
    pub result: std::result::Result<SocketAddr, String>,
}

/// 连接完成回调，每次连接尝试恰好调用一次
pub type ConnectCallback = Box<dyn FnMut(&ConnectOutcome) + Send>;

/// 一条已建立的连接，重连时总是新建
struct Connection<S> {
    remote: SocketAddr,
    stream: S,
    receiver: PacketReceiver,
    sender: PacketSender,
}

struct PendingConnect<S> {
    attempt: u64,
    host: String,
    port: u16,
    started: Instant,
    rx: oneshot::Receiver<ConnectState<S>>,
}

enum Link<S> {
    Idle,
    Connecting(PendingConnect<S>),
    Connected(Connection<S>),
    Failed,
}

/// 网络接口
///
/// 一个实例对应一条逻辑连接。传输方式由 [`Transport`] 策略决定，默认 TCP。
pub struct NetworkInterface<T: Transport = TcpTransport> {
    transport: Arc<T>,
    config: Arc<NetConfig>,
    /// 自己创建的运行时，使用外部运行时时为 `None`
    runtime: Option<Runtime>,
    handle: Handle,
    link: Link<T::Stream>,
    last_error: Option<String>,
    on_connect: Option<ConnectCallback>,
    next_attempt: u64,
    span: Span,
}

impl NetworkInterface<TcpTransport> {
    /// 创建 TCP 网络接口
    pub fn tcp(config: NetConfig) -> Result<Self> {
        Self::new(TcpTransport, config)
    }
}

impl<T: Transport> NetworkInterface<T> {
    /// 创建网络接口，并启动一个单线程的后台 IO 运行时
    pub fn new(transport: T, config: NetConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(IO_THREAD_NAME)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(transport, config, handle, Some(runtime)))
    }

    /// 使用宿主已有的 tokio 运行时
    pub fn with_handle(transport: T, config: NetConfig, handle: Handle) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config, handle, None))
    }

    fn build(transport: T, config: NetConfig, handle: Handle, runtime: Option<Runtime>) -> Self {
        let span = info_span!("net", kind = transport.kind());
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            runtime,
            handle,
            link: Link::Idle,
            last_error: None,
            on_connect: None,
            next_attempt: 0,
            span,
        }
    }

    /// 注入日志上下文，之后该接口的所有日志都在此 span 内输出
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// 注册连接完成回调
    pub fn set_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&ConnectOutcome) + Send + 'static,
    {
        self.on_connect = Some(Box::new(callback));
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// 连接是否有效：已连接且底层 socket 仍处于连接状态
    ///
    /// 对端关闭后无需等到下一次 `poll` 即返回 `false`。
    pub fn is_valid(&self) -> bool {
        match &self.link {
            Link::Connected(conn) => conn.stream.is_connected(),
            _ => false,
        }
    }

    pub fn link_state(&self) -> LinkState {
        match &self.link {
            Link::Idle => LinkState::Idle,
            Link::Connecting(_) => LinkState::Connecting,
            Link::Connected(_) => LinkState::Connected,
            Link::Failed => LinkState::Failed,
        }
    }

    /// 最近一次错误
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            Link::Connected(conn) => Some(conn.remote),
            _ => None,
        }
    }

    /// 当前连接尝试已经进行的时间，调用方据此自行实现超时
    pub fn connect_elapsed(&self) -> Option<Duration> {
        match &self.link {
            Link::Connecting(pending) => Some(pending.started.elapsed()),
            _ => None,
        }
    }

    /// 发送队列中剩余的字节数
    pub fn pending_send_bytes(&self) -> usize {
        match &self.link {
            Link::Connected(conn) => conn.sender.pending_bytes(),
            _ => 0,
        }
    }

    /// 接收缓冲区中尚未解析的字节数
    pub fn buffered_recv_bytes(&self) -> usize {
        match &self.link {
            Link::Connected(conn) => conn.receiver.buffered_len(),
            _ => 0,
        }
    }

    /// 发起异步连接，立即返回
    ///
    /// 已有连接尝试在进行时返回 `ConnectInProgress`；
    /// 已连接时先关闭当前连接，重连总是新建连接。
    pub fn connect_async(&mut self, host: &str, port: u16) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();

        match self.link_state() {
            LinkState::Connecting => return Err(NetError::ConnectInProgress),
            LinkState::Connected => {
                info!("Reconnecting, closing current connection");
                self.close();
            }
            LinkState::Idle | LinkState::Failed => {}
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.last_error = None;

        let (tx, rx) = oneshot::channel();
        let state = ConnectState::new(attempt, host, port);
        let transport = Arc::clone(&self.transport);
        let config = Arc::clone(&self.config);

        info!(attempt, "Connecting to {}:{}", host, port);

        self.handle.spawn(
            async move {
                let state = run_connect(transport, config, state).await;
                if let Err(state) = tx.send(state) {
                    // 接口已放弃这次连接，丢弃结果同时关闭 socket
                    debug!(attempt = state.attempt, "Discarding result of abandoned connect");
                }
            }
            .instrument(span.clone()),
        );

        self.link = Link::Connecting(PendingConnect {
            attempt,
            host: host.to_string(),
            port,
            started: Instant::now(),
            rx,
        });
        Ok(())
    }

    /// 取出已完成的连接结果并推进状态
    pub fn update(&mut self) -> LinkState {
        let span = self.span.clone();
        let _enter = span.enter();

        if let Link::Connecting(pending) = &mut self.link {
            match pending.rx.try_recv() {
                Ok(state) => self.on_async_connect_complete(state),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    // 后台任务没有送回结果（运行时已关闭），同样算作一次完成
                    let mut state = ConnectState::new(pending.attempt, &pending.host, pending.port);
                    state.error = Some(NetError::ConnectFailure {
                        addr: state.target(),
                        reason: "connect task aborted".to_string(),
                    });
                    self.on_async_connect_complete(state);
                }
            }
        }

        self.link_state()
    }

    /// 连接完成处理
    ///
    /// 只接受当前仍在等待的那次尝试；成功时通过传输策略构造收发组件。
    fn on_async_connect_complete(&mut self, state: ConnectState<T::Stream>) {
        match &self.link {
            Link::Connecting(pending) if pending.attempt == state.attempt => {}
            _ => {
                debug!(attempt = state.attempt, "Ignoring stale connect result");
                return;
            }
        }

        let attempt = state.attempt;
        let host = state.host.clone();
        let port = state.port;
        let target = state.target();

        let result = match state.into_result() {
            Ok((remote, stream)) => {
                let receiver = self.transport.create_packet_receiver(&self.config);
                let sender = self.transport.create_packet_sender(&self.config);
                self.link = Link::Connected(Connection {
                    remote,
                    stream,
                    receiver,
                    sender,
                });
                info!(attempt, "Connected to {} ({})", target, remote);
                Ok(remote)
            }
            Err(e) => {
                error!(attempt, "Connect to {} failed: {}", target, e);
                let reason = e.to_string();
                self.last_error = Some(reason.clone());
                self.link = Link::Failed;
                Err(reason)
            }
        };

        self.notify(ConnectOutcome {
            attempt,
            host,
            port,
            result,
        });
    }

    fn notify(&mut self, outcome: ConnectOutcome) {
        if let Some(callback) = self.on_connect.as_mut() {
            callback(&outcome);
        }
    }

    /// 编码一条消息并尝试立即写出
    ///
    /// 负载过大时返回 `MessageTooLarge`，连接保持有效；
    /// 写入失败时连接失效并记录错误。
    pub fn send(&mut self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        let Link::Connected(conn) = &mut self.link else {
            return Err(NetError::NotConnected);
        };
        let result = conn
            .sender
            .enqueue(message_id, payload)
            .and_then(|_| conn.sender.flush(&conn.stream));
        result.map(drop).map_err(|e| self.on_error(e))
    }

    /// 用 bincode 序列化后发送
    pub fn send_message<M: Serialize>(&mut self, message_id: MessageId, msg: &M) -> Result<()> {
        let payload = bincode::serialize(msg)?;
        self.send(message_id, &payload)
    }

    /// 把发送队列尽量写入 socket
    pub fn flush(&mut self) -> Result<()> {
        let Link::Connected(conn) = &mut self.link else {
            return Err(NetError::NotConnected);
        };
        let result = conn.sender.flush(&conn.stream);
        result.map(drop).map_err(|e| self.on_error(e))
    }

    /// 每帧调用一次：推进连接状态，写出积压数据，取出所有已到达的完整帧
    ///
    /// 出错时连接失效，出错前已经解析出的帧照常返回。
    pub fn poll(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.update() != LinkState::Connected {
            return frames;
        }

        let span = self.span.clone();
        let _enter = span.enter();

        let Link::Connected(conn) = &mut self.link else {
            return frames;
        };
        let result = if conn.stream.is_connected() {
            conn.sender
                .flush(&conn.stream)
                .and_then(|_| conn.receiver.receive(&conn.stream, &mut frames))
        } else {
            Err(NetError::ConnectionClosed)
        };

        if let Err(e) = result {
            self.on_error(e);
        }
        frames
    }

    /// 关闭连接
    ///
    /// 连接中时放弃本次尝试，回调收到 `ConnectCancelled`；
    /// 已连接时尽量写出发送队列后关闭 socket。
    pub fn close(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Connecting(pending) => {
                let e = NetError::ConnectCancelled {
                    addr: format!("{}:{}", pending.host, pending.port),
                };
                info!(attempt = pending.attempt, "{}", e);
                let reason = e.to_string();
                self.last_error = Some(reason.clone());
                self.notify(ConnectOutcome {
                    attempt: pending.attempt,
                    host: pending.host,
                    port: pending.port,
                    result: Err(reason),
                });
            }
            Link::Connected(mut conn) => {
                if let Err(e) = conn.sender.flush(&conn.stream) {
                    debug!("Final flush before close failed: {}", e);
                }
                if !conn.sender.is_empty() {
                    debug!(
                        dropped_bytes = conn.sender.pending_bytes(),
                        "Closing with unsent data"
                    );
                }
                info!("Closed connection to {}", conn.remote);
            }
            Link::Idle | Link::Failed => {}
        }
    }

    /// 致命错误使连接失效，调用方错误只原样返回
    fn on_error(&mut self, e: NetError) -> NetError {
        if e.is_fatal() {
            self.invalidate(&e);
        }
        e
    }

    /// 记录错误并丢弃当前连接
    fn invalidate(&mut self, e: &NetError) {
        match e {
            NetError::ProtocolViolation { .. } => {
                error!("Dropping connection, peer violated framing: {}", e)
            }
            NetError::BufferOverflow { .. } => warn!("Dropping connection, {}", e),
            NetError::ConnectionClosed => info!("Connection closed by peer"),
            _ => warn!("Dropping connection: {}", e),
        }
        self.last_error = Some(e.to_string());
        self.link = Link::Failed;
    }
}

impl<T: Transport> Drop for NetworkInterface<T> {
    fn drop(&mut self) {
        // 先释放 socket，再关闭运行时；不在调用线程上等待后台任务
        self.link = Link::Idle;
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// 后台连接流程：解析地址、创建 socket、连接
///
/// 任何错误都记录到 `ConnectState` 中，不向外传播。
async fn run_connect<T: Transport>(
    transport: Arc<T>,
    config: Arc<NetConfig>,
    mut state: ConnectState<T::Stream>,
) -> ConnectState<T::Stream> {
    let target = state.target();
    let host = state.host.clone();

    let addr = match lookup_host((host.as_str(), state.port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            state.error = Some(NetError::ConnectFailure {
                addr: target,
                reason: e.to_string(),
            });
            return state;
        }
    };
    let Some(addr) = addr else {
        state.error = Some(NetError::ConnectFailure {
            addr: target,
            reason: "no address resolved".to_string(),
        });
        return state;
    };
    state.remote = Some(addr);

    let result = match transport.create_socket(&addr, &config) {
        Ok(socket) => transport.connect(socket, addr, &config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(stream) => state.stream = Some(stream),
        Err(e @ NetError::ConnectTimeout { .. }) => state.error = Some(e),
        Err(e) => {
            state.error = Some(NetError::ConnectFailure {
                addr: target,
                reason: e.to_string(),
            })
        }
    }
    state
}
