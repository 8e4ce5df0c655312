//! 传输层配置

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};
use crate::{
    CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_READS_PER_POLL, DEFAULT_READ_CHUNK_SIZE,
    DEFAULT_RECV_BUFFER_CAPACITY, DEFAULT_TCP_RECV_BUFFER_SIZE, DEFAULT_TCP_SEND_BUFFER_SIZE,
    HEADER_SIZE, MAX_PAYLOAD_LEN,
};

/// 传输层配置
///
/// 字段名按宿主应用的配置约定使用 camelCase，例如
/// `{"tcpRecvBufferSize": 65536, "tcpSendBufferSize": 65536, "maxFrameSize": 4096}`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetConfig {
    /// socket 接收缓冲区大小 (SO_RCVBUF)
    pub tcp_recv_buffer_size: u32,
    /// socket 发送缓冲区大小 (SO_SNDBUF)
    pub tcp_send_buffer_size: u32,
    /// 单帧负载上限，不能超过 [`MAX_PAYLOAD_LEN`]
    pub max_frame_size: usize,
    /// 接收缓冲区中未解析字节的上限
    pub recv_buffer_capacity: usize,
    /// 每次读取 socket 的字节数
    pub read_chunk_size: usize,
    /// 每次 `poll` 最多读取 socket 的次数，未读完的数据留到下一帧
    pub max_reads_per_poll: usize,
    /// 连接超时时间，`None` 表示由调用方自行计时
    #[serde(with = "optional_millis")]
    pub connect_timeout: Option<Duration>,
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            tcp_recv_buffer_size: DEFAULT_TCP_RECV_BUFFER_SIZE,
            tcp_send_buffer_size: DEFAULT_TCP_SEND_BUFFER_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            recv_buffer_capacity: DEFAULT_RECV_BUFFER_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_reads_per_poll: DEFAULT_MAX_READS_PER_POLL,
            connect_timeout: Some(CONNECT_TIMEOUT),
            nodelay: true, // 小帧低延迟
        }
    }
}

impl NetConfig {
    /// 校验配置
    ///
    /// 接收缓冲区至少要能容纳一个最大帧，否则合法的对端也会触发溢出。
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size > MAX_PAYLOAD_LEN {
            return Err(NetError::InvalidConfig(format!(
                "maxFrameSize {} exceeds protocol maximum {}",
                self.max_frame_size, MAX_PAYLOAD_LEN
            )));
        }
        if self.recv_buffer_capacity < HEADER_SIZE + self.max_frame_size {
            return Err(NetError::InvalidConfig(format!(
                "recvBufferCapacity {} cannot hold a {} byte frame",
                self.recv_buffer_capacity,
                HEADER_SIZE + self.max_frame_size
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(NetError::InvalidConfig(
                "readChunkSize must be positive".to_string(),
            ));
        }
        if self.max_reads_per_poll == 0 {
            return Err(NetError::InvalidConfig(
                "maxReadsPerPoll must be positive".to_string(),
            ));
        }
        if self.tcp_recv_buffer_size == 0 || self.tcp_send_buffer_size == 0 {
            return Err(NetError::InvalidConfig(
                "tcp buffer sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `Option<Duration>` 以毫秒数序列化
mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
