//! 帧编解码
//!
//! 帧格式（小端序，收发双向一致）:
//! ```text
//! ┌───────────────┬────────────────┬────────────────────────────────┐
//! │ MessageId(2B) │ PayloadLen(2B) │            Payload             │
//! │    u16 LE     │     u16 LE     │        PayloadLen 字节         │
//! └───────────────┴────────────────┴────────────────────────────────┘
//! ```
//!
//! 发送端、接收端和异步帧读写器都只通过这里的函数处理帧格式。

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, Result};
use crate::frame::{Frame, MessageId};
use crate::{HEADER_SIZE, MAX_PAYLOAD_LEN};

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: MessageId,
    pub payload_len: u16,
}

impl FrameHeader {
    /// 编码帧头
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&self.message_id.to_le_bytes());
        header[2..4].copy_from_slice(&self.payload_len.to_le_bytes());
        header
    }

    /// 整帧长度
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// 解析帧头，字节不足时返回 `None`
pub fn decode_header(src: &[u8]) -> Option<FrameHeader> {
    if src.len() < HEADER_SIZE {
        return None;
    }
    Some(FrameHeader {
        message_id: u16::from_le_bytes([src[0], src[1]]),
        payload_len: u16::from_le_bytes([src[2], src[3]]),
    })
}

/// 检查负载长度，`max_frame_size` 会被协议上限再次约束
pub fn check_payload_len(len: usize, max_frame_size: usize) -> Result<()> {
    let max = max_frame_size.min(MAX_PAYLOAD_LEN);
    if len > max {
        return Err(NetError::MessageTooLarge { len, max });
    }
    Ok(())
}

/// 把一帧追加写入 `dst`
pub fn encode_into(
    message_id: MessageId,
    payload: &[u8],
    max_frame_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    check_payload_len(payload.len(), max_frame_size)?;

    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16_le(message_id);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// 编码一帧，仅受协议上限约束
pub fn encode(message_id: MessageId, payload: &[u8]) -> Result<Bytes> {
    encode_with_limit(message_id, payload, MAX_PAYLOAD_LEN)
}

/// 编码一帧，负载不能超过 `max_frame_size`
pub fn encode_with_limit(
    message_id: MessageId,
    payload: &[u8],
    max_frame_size: usize,
) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_into(message_id, payload, max_frame_size, &mut dst)?;
    Ok(dst.freeze())
}

/// 从 `src` 头部解码一帧
///
/// 返回帧及其消耗的字节数；数据不完整时返回 `Ok(None)`；
/// 声明长度超过 `max_frame_size` 时返回 `ProtocolViolation`。
pub fn decode(src: &[u8], max_frame_size: usize) -> Result<Option<(Frame, usize)>> {
    let Some(header) = decode_header(src) else {
        return Ok(None);
    };
    validate_header(&header, max_frame_size)?;

    let frame_len = header.frame_len();
    if src.len() < frame_len {
        return Ok(None);
    }
    let payload = Bytes::copy_from_slice(&src[HEADER_SIZE..frame_len]);
    Ok(Some((Frame::new(header.message_id, payload), frame_len)))
}

/// 校验对端声明的负载长度
pub(crate) fn validate_header(header: &FrameHeader, max_frame_size: usize) -> Result<()> {
    let length = header.payload_len as usize;
    let max = max_frame_size.min(MAX_PAYLOAD_LEN);
    if length > max {
        return Err(NetError::ProtocolViolation {
            message_id: header.message_id,
            length,
            max,
        });
    }
    Ok(())
}

fn map_read_err(e: std::io::Error) -> NetError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        NetError::ConnectionClosed
    } else {
        NetError::Io(e)
    }
}

/// 异步帧读取器（服务端和测试对端使用）
pub struct FrameReader<R> {
    reader: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_size(reader, MAX_PAYLOAD_LEN)
    }

    pub fn with_max_frame_size(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            max_frame_size,
        }
    }

    /// 读取一帧
    pub async fn read_frame(&mut self) -> Result<Frame> {
        // 读取帧头
        let mut header = [0u8; HEADER_SIZE];
        self.reader
            .read_exact(&mut header)
            .await
            .map_err(map_read_err)?;

        let header = decode_header(&header).ok_or(NetError::ConnectionClosed)?;
        validate_header(&header, self.max_frame_size)?;

        // 读取负载
        let mut payload = vec![0u8; header.payload_len as usize];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(map_read_err)?;

        Ok(Frame::new(header.message_id, payload))
    }

    /// 接收一帧（read_frame 的别名）
    pub async fn recv(&mut self) -> Result<Frame> {
        self.read_frame().await
    }
}

/// 异步帧写入器
pub struct FrameWriter<W> {
    writer: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self::with_max_frame_size(writer, MAX_PAYLOAD_LEN)
    }

    pub fn with_max_frame_size(writer: W, max_frame_size: usize) -> Self {
        Self {
            writer,
            max_frame_size,
        }
    }

    /// 编码并写入一帧
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.message_id(), frame.payload()).await
    }

    /// 编码并写入一条消息
    pub async fn send(&mut self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        let bytes = encode_with_limit(message_id, payload, self.max_frame_size)?;

        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;

        Ok(())
    }
}
