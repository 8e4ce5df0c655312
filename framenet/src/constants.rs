//! 传输层常量定义

use std::time::Duration;

/// 帧头大小: 2 字节消息 ID + 2 字节负载长度
pub const HEADER_SIZE: usize = 4;

/// 负载长度字段能表示的最大负载（65535 减去帧头开销）
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - HEADER_SIZE;

/// 默认的单帧负载上限
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_PAYLOAD_LEN;

/// 默认 TCP 接收缓冲区大小 (SO_RCVBUF)
pub const DEFAULT_TCP_RECV_BUFFER_SIZE: u32 = 64 * 1024;

/// 默认 TCP 发送缓冲区大小 (SO_SNDBUF)
pub const DEFAULT_TCP_SEND_BUFFER_SIZE: u32 = 64 * 1024;

/// 默认接收缓冲区容量（未解析字节的上限）
pub const DEFAULT_RECV_BUFFER_CAPACITY: usize = 256 * 1024;

/// 单次从 socket 读取的字节数
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

/// 每次 poll 最多读取 socket 的次数（16 x 16 KiB，与接收缓冲区容量相同）
pub const DEFAULT_MAX_READS_PER_POLL: usize = 16;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 后台 IO 线程名
pub const IO_THREAD_NAME: &str = "framenet-io";
