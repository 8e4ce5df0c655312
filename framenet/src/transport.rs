//! 传输层抽象
//!
//! [`Transport`] 是网络接口的可插拔策略：负责创建 socket、执行连接、
//! 以及为该传输类型构造收发组件。网络接口只依赖这个 trait，
//! 便于在 TCP 之外接入其他字节流传输。

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll, Waker};

use tokio::io::ReadBuf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::receiver::PacketReceiver;
use crate::sender::PacketSender;

/// 已连接的非阻塞字节流
///
/// 收发组件只通过这里的非阻塞调用访问 socket，
/// 无数据可读或缓冲区已满时返回 `WouldBlock`。
pub trait RawStream: Send {
    /// 非阻塞读，`Ok(0)` 表示对端已关闭
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// 非阻塞写，返回实际写入的字节数
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// 底层连接是否仍处于已连接状态
    ///
    /// 对端已关闭（读到 EOF）或连接出错时返回 `false`，不消耗已到达的数据。
    fn is_connected(&self) -> bool;
}

/// 传输策略
///
/// 每个工厂方法都只做构造和配置，不产生其他副作用。
pub trait Transport: Send + Sync + 'static {
    /// 未连接的 socket
    type Socket: Send + 'static;
    /// 连接成功后的字节流
    type Stream: RawStream + 'static;

    /// 传输类型名称，用于日志
    fn kind(&self) -> &'static str;

    /// 为目标地址创建并配置 socket
    fn create_socket(&self, addr: &SocketAddr, config: &NetConfig) -> Result<Self::Socket>;

    /// 在后台执行连接
    fn connect(
        &self,
        socket: Self::Socket,
        addr: SocketAddr,
        config: &NetConfig,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// 为新连接构造接收组件
    fn create_packet_receiver(&self, config: &NetConfig) -> PacketReceiver {
        PacketReceiver::new(config)
    }

    /// 为新连接构造发送组件
    fn create_packet_sender(&self, config: &NetConfig) -> PacketSender {
        PacketSender::new(config)
    }
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 传输实现
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Socket = TcpSocket;
    type Stream = TcpStream;

    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn create_socket(&self, addr: &SocketAddr, config: &NetConfig) -> Result<TcpSocket> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_recv_buffer_size(config.tcp_recv_buffer_size)?;
        socket.set_send_buffer_size(config.tcp_send_buffer_size)?;
        Ok(socket)
    }

    async fn connect(
        &self,
        socket: TcpSocket,
        addr: SocketAddr,
        config: &NetConfig,
    ) -> Result<TcpStream> {
        let stream = match config.connect_timeout {
            Some(limit) => timeout(limit, socket.connect(addr))
                .await
                .map_err(|_| NetError::ConnectTimeout {
                    addr: addr.to_string(),
                })??,
            None => socket.connect(addr).await?,
        };

        // 设置 TCP nodelay，小帧不做合并
        stream.set_nodelay(config.nodelay)?;

        Ok(stream)
    }
}

impl RawStream for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn is_connected(&self) -> bool {
        if self.peer_addr().is_err() {
            return false;
        }
        // 对端发送 FIN 后 getpeername 仍然成功，需要 peek 一个字节确认是否 EOF
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(Waker::noop());
        match self.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => false,
            Poll::Ready(Ok(_)) | Poll::Pending => true,
            Poll::Ready(Err(e)) => e.kind() == io::ErrorKind::WouldBlock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = NetConfig::default();
        let transport = TcpTransport;
        let socket = transport.create_socket(&addr, &config).unwrap();
        let client = tokio::spawn(async move { transport.connect(socket, addr, &config).await });

        let (_server, _) = listener.accept().await.unwrap();
        let stream = client.await.unwrap().unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(RawStream::is_connected(&stream));
    }

    #[tokio::test]
    async fn test_create_socket_applies_buffer_sizes() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let config = NetConfig {
            tcp_recv_buffer_size: 32 * 1024,
            tcp_send_buffer_size: 32 * 1024,
            ..NetConfig::default()
        };
        let socket = TcpTransport.create_socket(&addr, &config).unwrap();
        // 内核可能会放大设置值，但不会低于请求值
        assert!(socket.recv_buffer_size().unwrap() >= 32 * 1024);
        assert!(socket.send_buffer_size().unwrap() >= 32 * 1024);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // 先绑定再释放，得到一个大概率无人监听的端口
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = NetConfig {
            connect_timeout: Some(Duration::from_secs(2)),
            ..NetConfig::default()
        };
        let socket = TcpTransport.create_socket(&addr, &config).unwrap();
        let result = TcpTransport.connect(socket, addr, &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_eof_reported_as_zero_read() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        stream.readable().await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(RawStream::try_read(&stream, &mut buf).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_detected_without_read() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut server, b"x").await.unwrap();
        stream.readable().await.unwrap();
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 未读的数据还在，连接仍视为有效，且数据不被消耗
        assert!(RawStream::is_connected(&stream));
        let mut buf = [0u8; 16];
        assert_eq!(RawStream::try_read(&stream, &mut buf).unwrap(), 1);

        // 数据读完后只剩 EOF
        let mut closed = false;
        for _ in 0..100 {
            if !RawStream::is_connected(&stream) {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed);
    }
}
