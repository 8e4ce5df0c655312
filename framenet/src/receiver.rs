//! 数据包接收组件
//!
//! 把 socket 读到的原始字节累积到接收缓冲区，再按帧切出完整消息。
//! 半帧留在缓冲区里等下一批字节，不算错误。

use std::io;

use bytes::{Buf, BytesMut};
use tracing::{error, trace, warn};

use crate::codec::{decode_header, validate_header};
use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::frame::Frame;
use crate::transport::RawStream;
use crate::HEADER_SIZE;

/// 数据包接收组件
#[derive(Debug)]
pub struct PacketReceiver {
    /// 尚未解析的字节
    buffer: BytesMut,
    /// 未解析字节上限
    capacity: usize,
    max_frame_size: usize,
    /// 读 socket 用的复用缓冲区
    chunk: Vec<u8>,
    /// 每次 `receive` 最多读取的次数
    max_reads: usize,
}

impl PacketReceiver {
    pub fn new(config: &NetConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.read_chunk_size.min(config.recv_buffer_capacity)),
            capacity: config.recv_buffer_capacity,
            max_frame_size: config.max_frame_size,
            chunk: vec![0u8; config.read_chunk_size],
            max_reads: config.max_reads_per_poll,
        }
    }

    /// 追加新读到的字节
    ///
    /// 累积字节超过容量时返回 `BufferOverflow`，缓冲区不变。
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.buffer.len() + data.len() > self.capacity {
            warn!(
                buffered = self.buffer.len(),
                incoming = data.len(),
                capacity = self.capacity,
                "Receive buffer overflow"
            );
            return Err(NetError::BufferOverflow {
                buffered: self.buffer.len(),
                incoming: data.len(),
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// 尝试从缓冲区头部切出一帧
    ///
    /// - 不足一个帧头，或负载未到齐: `Ok(None)`
    /// - 声明长度超过 `max_frame_size`: `ProtocolViolation`
    pub fn try_extract_frame(&mut self) -> Result<Option<Frame>> {
        let Some(header) = decode_header(&self.buffer) else {
            return Ok(None);
        };

        if let Err(e) = validate_header(&header, self.max_frame_size) {
            error!(
                message_id = header.message_id,
                length = header.payload_len,
                max = self.max_frame_size,
                "Peer sent an invalid frame header"
            );
            return Err(e);
        }

        if self.buffer.len() < header.frame_len() {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(header.payload_len as usize).freeze();
        trace!(message_id = header.message_id, len = payload.len(), "Frame extracted");
        Ok(Some(Frame::new(header.message_id, payload)))
    }

    /// 依次取出当前缓冲区中所有完整帧
    ///
    /// 迭代器可以随时丢弃再重新创建，状态只保存在缓冲区里。
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            receiver: self,
            failed: false,
        }
    }

    /// 从非阻塞流读取，把解析出的帧追加到 `out`
    ///
    /// 读到 `WouldBlock` 或用完本次的读取次数就返回，剩余数据留在 socket 中，
    /// 单次调用处理的字节数不超过 `max_reads_per_poll * read_chunk_size`。
    /// 每读一块就先切帧，缓冲区只保留不完整的尾部。
    /// 出错前已经解析出的帧仍然留在 `out` 中。
    pub fn receive<S: RawStream + ?Sized>(&mut self, stream: &S, out: &mut Vec<Frame>) -> Result<usize> {
        let mut chunk = std::mem::take(&mut self.chunk);
        let result = self.receive_into(stream, &mut chunk, out);
        self.chunk = chunk;
        result
    }

    fn receive_into<S: RawStream + ?Sized>(
        &mut self,
        stream: &S,
        chunk: &mut [u8],
        out: &mut Vec<Frame>,
    ) -> Result<usize> {
        let mut total = 0;
        let mut reads = 0;

        while reads < self.max_reads {
            let n = match stream.try_read(chunk) {
                Ok(0) => return Err(NetError::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Io(e)),
            };
            reads += 1;
            total += n;

            self.push_bytes(&chunk[..n])?;
            for frame in self.frames() {
                out.push(frame?);
            }
        }

        if reads == self.max_reads {
            trace!(reads, bytes = total, "Read budget exhausted");
        }
        Ok(total)
    }

    /// 缓冲区中尚未解析的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 丢弃所有未解析字节
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// [`PacketReceiver::frames`] 返回的惰性迭代器
///
/// 遇到错误时产出一次 `Err` 后结束。
pub struct Frames<'a> {
    receiver: &'a mut PacketReceiver,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.receiver.try_extract_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
