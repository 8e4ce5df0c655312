//! 异步帧连接
//!
//! 对端（服务端、测试桩）使用的异步收发封装，与客户端共用同一套帧格式。

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Result;
use crate::frame::{Frame, MessageId};

/// 异步帧连接
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct FramedConnection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl FramedConnection<OwnedReadHalf, OwnedWriteHalf> {
    /// 从已接受的 TCP 连接创建
    pub fn from_tcp(stream: TcpStream, max_frame_size: usize) -> Result<Self> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: FrameReader::with_max_frame_size(reader, max_frame_size),
            writer: FrameWriter::with_max_frame_size(writer, max_frame_size),
        })
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> FramedConnection<R, W> {
    /// 从读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 分离为读取端和写入端
    ///
    /// 用于需要并发读写的场景
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收一帧
    pub async fn recv(&mut self) -> Result<Frame> {
        self.reader.read_frame().await
    }

    /// 发送一条消息
    pub async fn send(&mut self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        self.writer.send(message_id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetError;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connection_send_recv() {
        // 启动服务端
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 客户端连接
        let client_handle = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut conn = FramedConnection::from_tcp(stream, 1024).unwrap();

            conn.send(1, b"hello").await.unwrap();

            let frame = conn.recv().await.unwrap();
            assert_eq!(frame, Frame::new(2, &b"welcome"[..]));
        });

        // 服务端接受连接
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = FramedConnection::from_tcp(stream, 1024).unwrap();

        let frame = conn.recv().await.unwrap();
        assert_eq!(frame, Frame::new(1, &b"hello"[..]));

        conn.send(2, b"welcome").await.unwrap();

        client_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (client, server) = tokio::io::duplex(256);
        let (cr, cw) = tokio::io::split(client);
        let (sr, sw) = tokio::io::split(server);

        let (_, mut client_writer) = FramedConnection::from_parts(cr, cw).split();
        let (mut server_reader, _) = FramedConnection::from_parts(sr, sw).split();

        client_writer.send(9, b"split").await.unwrap();
        drop(client_writer);

        assert_eq!(server_reader.recv().await.unwrap(), Frame::new(9, &b"split"[..]));
        assert!(matches!(
            server_reader.recv().await,
            Err(NetError::ConnectionClosed)
        ));
    }
}
