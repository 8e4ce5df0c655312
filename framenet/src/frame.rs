//! 帧类型定义

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::HEADER_SIZE;

/// 消息 ID，收发双方共用 16 位无符号空间
pub type MessageId = u16;

/// 一条完整的应用消息
///
/// 消息 ID 的含义由上层应用决定，这里只负责携带。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    message_id: MessageId,
    payload: Bytes,
}

impl Frame {
    /// 创建新帧
    pub fn new(message_id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            payload: payload.into(),
        }
    }

    /// 用 bincode 序列化一个 serde 类型作为负载
    pub fn from_message<M: Serialize>(message_id: MessageId, msg: &M) -> Result<Self> {
        let payload = bincode::serialize(msg)?;
        Ok(Self::new(message_id, payload))
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 线上占用的字节数（帧头 + 负载）
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// 用 bincode 反序列化负载
    pub fn decode_payload<M: DeserializeOwned>(&self) -> Result<M> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    enum Login {
        Hello { account: String, version: u32 },
    }

    #[test]
    fn test_typed_payload() {
        let msg = Login::Hello {
            account: "alice".to_string(),
            version: 3,
        };
        let frame = Frame::from_message(42, &msg).unwrap();
        assert_eq!(frame.message_id(), 42);
        assert_eq!(frame.decode_payload::<Login>().unwrap(), msg);
    }

    #[test]
    fn test_wire_len() {
        let frame = Frame::new(1, &b"abc"[..]);
        assert_eq!(frame.wire_len(), 7);
    }

    #[test]
    fn test_bad_payload_is_serialization_error() {
        let frame = Frame::new(1, &b"\x01"[..]);
        assert!(frame.decode_payload::<Login>().is_err());
    }
}
