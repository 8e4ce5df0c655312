//! 错误类型定义

use thiserror::Error;

/// 传输层错误类型
#[derive(Error, Debug)]
pub enum NetError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 负载序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// 连接失败（DNS、拒绝连接等），不影响进程，是否重连由调用方决定
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailure { addr: String, reason: String },

    /// 连接超时
    #[error("Connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// 连接尚未完成就被关闭
    #[error("Connect to {addr} cancelled")]
    ConnectCancelled { addr: String },

    /// 已有连接请求在进行中
    #[error("A connect attempt is already in progress")]
    ConnectInProgress,

    /// 接收缓冲区容量超限
    #[error("Receive buffer overflow: {buffered} buffered + {incoming} incoming exceeds capacity {capacity}")]
    BufferOverflow {
        buffered: usize,
        incoming: usize,
        capacity: usize,
    },

    /// 对端发送了非法帧头
    #[error("Protocol violation: message {message_id} declares {length} bytes (max: {max})")]
    ProtocolViolation {
        message_id: u16,
        length: usize,
        max: usize,
    },

    /// 写入 socket 失败
    #[error("Write failed: {0}")]
    WriteFailure(std::io::Error),

    /// 负载过大（调用方错误，连接保持有效）
    #[error("Message too large: {len} bytes (max: {max})")]
    MessageTooLarge { len: usize, max: usize },

    /// 对端关闭连接
    #[error("Connection closed")]
    ConnectionClosed,

    /// 当前没有有效连接
    #[error("Not connected")]
    NotConnected,

    /// 配置非法
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl NetError {
    /// 该错误是否会使连接失效
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            NetError::MessageTooLarge { .. }
                | NetError::ConnectInProgress
                | NetError::NotConnected
                | NetError::InvalidConfig(_)
                | NetError::Serialization(_)
        )
    }
}

/// 传输层操作结果类型
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_are_not_fatal() {
        assert!(!NetError::MessageTooLarge { len: 10, max: 5 }.is_fatal());
        assert!(!NetError::ConnectInProgress.is_fatal());
        assert!(NetError::ConnectionClosed.is_fatal());
        assert!(NetError::ProtocolViolation {
            message_id: 1,
            length: 9000,
            max: 1024
        }
        .is_fatal());
    }
}
