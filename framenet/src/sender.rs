//! 数据包发送组件
//!
//! 消息先编码进发送队列，`flush` 时按 FIFO 顺序尽量写入 socket。
//! 部分写入时，未写完的尾部原样留在队首，下次 `flush` 接着写。

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::codec::encode_into;
use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::frame::MessageId;
use crate::transport::RawStream;

/// 数据包发送组件
#[derive(Debug)]
pub struct PacketSender {
    /// 已编码、待发送的帧
    queue: VecDeque<Bytes>,
    /// 队列中剩余的总字节数
    queued_bytes: usize,
    max_frame_size: usize,
}

impl PacketSender {
    pub fn new(config: &NetConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            queued_bytes: 0,
            max_frame_size: config.max_frame_size,
        }
    }

    /// 编码一条消息并放入发送队列
    ///
    /// 负载过大时返回 `MessageTooLarge`，队列保持不变。
    pub fn enqueue(&mut self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        let mut dst = BytesMut::new();
        encode_into(message_id, payload, self.max_frame_size, &mut dst)?;

        let frame = dst.freeze();
        self.queued_bytes += frame.len();
        self.queue.push_back(frame);
        Ok(())
    }

    /// 把队列中的字节尽量写入流，返回本次写入的字节数
    ///
    /// 流返回 `WouldBlock` 时停止并保留剩余字节；
    /// 写入出错时清空队列并返回 `WriteFailure`，不在坏连接上重试。
    pub fn flush<S: RawStream + ?Sized>(&mut self, stream: &S) -> Result<usize> {
        let mut written = 0;

        while let Some(head) = self.queue.front_mut() {
            match stream.try_write(head) {
                Ok(0) => {
                    return Err(self.fail(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => {
                    written += n;
                    self.queued_bytes -= n;
                    if n < head.len() {
                        // 部分写入，剩余部分连续保留在队首
                        head.advance(n);
                        trace!(written = n, remaining = head.len(), "Partial write");
                        break;
                    }
                    self.queue.pop_front();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail(e)),
            }
        }

        Ok(written)
    }

    fn fail(&mut self, e: io::Error) -> NetError {
        warn!(
            dropped_frames = self.queue.len(),
            dropped_bytes = self.queued_bytes,
            "Write failed, discarding send queue: {}",
            e
        );
        self.clear();
        NetError::WriteFailure(e)
    }

    /// 待发送的字节数
    pub fn pending_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// 待发送的帧数（包括写了一半的队首帧）
    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// 丢弃所有待发送的帧
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::MAX_PAYLOAD_LEN;
    use std::cell::{Cell, RefCell};

    /// 每次 flush 只接受有限字节的假流
    struct ThrottledStream {
        budget: Cell<usize>,
        max_per_write: usize,
        wire: RefCell<Vec<u8>>,
        fail: Cell<bool>,
    }

    impl ThrottledStream {
        fn new(max_per_write: usize) -> Self {
            Self {
                budget: Cell::new(0),
                max_per_write,
                wire: RefCell::new(Vec::new()),
                fail: Cell::new(false),
            }
        }

        fn allow(&self, bytes: usize) {
            self.budget.set(bytes);
        }
    }

    impl RawStream for ThrottledStream {
        fn try_read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            if self.fail.get() {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let n = buf.len().min(self.budget.get()).min(self.max_per_write);
            if n == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.budget.set(self.budget.get() - n);
            self.wire.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn is_connected(&self) -> bool {
            !self.fail.get()
        }
    }

    fn sender() -> PacketSender {
        PacketSender::new(&NetConfig {
            max_frame_size: 64,
            ..NetConfig::default()
        })
    }

    #[test]
    fn test_enqueue_too_large_keeps_queue() {
        let mut sender = sender();
        sender.enqueue(1, b"first").unwrap();
        let before = sender.pending_bytes();

        let err = sender.enqueue(2, &[0u8; 65]).unwrap_err();
        assert!(matches!(err, NetError::MessageTooLarge { len: 65, max: 64 }));
        assert_eq!(sender.pending_bytes(), before);
        assert_eq!(sender.pending_frames(), 1);
    }

    #[test]
    fn test_protocol_limit_applies_to_large_config() {
        let mut sender = PacketSender::new(&NetConfig::default());
        let err = sender.enqueue(1, &vec![0u8; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, NetError::MessageTooLarge { .. }));
        assert!(sender.is_empty());
    }

    #[test]
    fn test_partial_write_resumes() {
        let mut sender = sender();
        sender.enqueue(7, b"ping").unwrap();
        sender.enqueue(8, b"pong-pong").unwrap();
        sender.enqueue(9, b"").unwrap();

        let mut expected = encode(7, b"ping").unwrap().to_vec();
        expected.extend_from_slice(&encode(8, b"pong-pong").unwrap());
        expected.extend_from_slice(&encode(9, b"").unwrap());
        assert_eq!(sender.pending_bytes(), expected.len());

        let stream = ThrottledStream::new(3);
        let mut rounds = 0;
        while !sender.is_empty() {
            stream.allow(5);
            let n = sender.flush(&stream).unwrap();
            assert!(n <= 5);
            rounds += 1;
            // 已写出的部分必须是期望字节流的前缀
            let wire = stream.wire.borrow();
            assert_eq!(&wire[..], &expected[..wire.len()]);
            assert_eq!(sender.pending_bytes(), expected.len() - wire.len());
        }
        assert_eq!(&stream.wire.borrow()[..], &expected[..]);
        assert!(rounds > 1);
    }

    #[test]
    fn test_would_block_keeps_queue() {
        let mut sender = sender();
        sender.enqueue(1, b"abc").unwrap();

        let stream = ThrottledStream::new(16);
        assert_eq!(sender.flush(&stream).unwrap(), 0);
        assert_eq!(sender.pending_bytes(), 7);
    }

    #[test]
    fn test_write_failure_discards_queue() {
        let mut sender = sender();
        sender.enqueue(1, b"abc").unwrap();
        sender.enqueue(2, b"def").unwrap();

        let stream = ThrottledStream::new(16);
        stream.fail.set(true);
        let err = sender.flush(&stream).unwrap_err();
        assert!(matches!(err, NetError::WriteFailure(_)));
        assert!(sender.is_empty());
        assert_eq!(sender.pending_bytes(), 0);
    }
}
