//! 帧回显服务端实现

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framenet::{FramedConnection, NetError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// 服务端配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 最大连接数
    pub max_connections: u32,
    /// 单帧负载上限
    pub max_frame_size: usize,
    /// 空闲超时，超过此时间没有收到帧则断开
    pub idle_timeout: Duration,
}

/// 共享状态
struct SharedState {
    /// 当前连接数
    connection_count: AtomicU32,
    /// 已回显的帧数
    frames_echoed: AtomicU64,
}

impl SharedState {
    fn new() -> Self {
        Self {
            connection_count: AtomicU32::new(0),
            frames_echoed: AtomicU64::new(0),
        }
    }

    /// 增加连接数，如果超过限制则返回 false
    fn try_add_connection(&self, limit: u32) -> bool {
        loop {
            let current = self.connection_count.load(Ordering::SeqCst);
            if current >= limit {
                return false;
            }
            if self
                .connection_count
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// 减少连接数
    fn remove_connection(&self) {
        self.connection_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn online_count(&self) -> u32 {
        self.connection_count.load(Ordering::SeqCst)
    }
}

/// 帧回显服务器
pub struct EchoServer {
    config: ServerConfig,
    state: Arc<SharedState>,
    /// 关闭信号发送端
    shutdown_tx: watch::Sender<bool>,
    /// 关闭信号接收端（用于克隆给连接处理器）
    shutdown_rx: watch::Receiver<bool>,
}

impl EchoServer {
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            state: Arc::new(SharedState::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// 运行服务器（支持 graceful shutdown）
    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                // 接受新连接
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_client(stream, peer.to_string()),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                // 监听 Ctrl+C 信号
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, initiating graceful shutdown...");
                    self.shutdown().await;
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_client(&self, stream: TcpStream, peer: String) {
        // 检查连接数限制
        if !self.state.try_add_connection(self.config.max_connections) {
            warn!("Connection limit reached, rejecting {}", peer);
            return;
        }

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &peer, &config, &state, shutdown_rx).await {
                debug!("Client handler error for {}: {}", peer, e);
            }
            state.remove_connection();
        });
    }

    /// 执行 graceful shutdown
    async fn shutdown(&self) {
        // 发送关闭信号
        let _ = self.shutdown_tx.send(true);

        // 等待所有连接断开（最多等待 5 秒）
        let start = std::time::Instant::now();
        let timeout_duration = Duration::from_secs(5);

        while self.state.online_count() > 0 {
            if start.elapsed() > timeout_duration {
                warn!(
                    "Shutdown timeout, {} connections still active",
                    self.state.online_count()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!(
            "Server shutdown complete, {} frames echoed",
            self.state.frames_echoed.load(Ordering::SeqCst)
        );
    }
}

/// 处理单个客户端连接：原样回显收到的每一帧
async fn handle_client(
    stream: TcpStream,
    peer: &str,
    config: &ServerConfig,
    state: &SharedState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let conn = FramedConnection::from_tcp(stream, config.max_frame_size)?;
    let (mut reader, mut writer) = conn.split();
    info!("Client {} connected", peer);

    loop {
        tokio::select! {
            // 接收帧（带空闲超时）
            result = timeout(config.idle_timeout, reader.recv()) => {
                match result {
                    Ok(Ok(frame)) => {
                        debug!(
                            "Echo message {} ({} bytes) to {}",
                            frame.message_id(),
                            frame.payload().len(),
                            peer
                        );
                        writer.write_frame(&frame).await?;
                        state.frames_echoed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(NetError::ConnectionClosed)) => {
                        info!("Client {} disconnected", peer);
                        break;
                    }
                    Ok(Err(e @ NetError::ProtocolViolation { .. })) => {
                        error!("Client {} violated framing: {}", peer, e);
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!("Error receiving from {}: {}", peer, e);
                        break;
                    }
                    Err(_) => {
                        warn!("Idle timeout for {}", peer);
                        break;
                    }
                }
            }

            // 监听 shutdown 信号
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received, closing {}", peer);
                    break;
                }
            }
        }
    }

    Ok(())
}
