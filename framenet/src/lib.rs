//! 客户端帧传输层
//!
//! 包含:
//! - 帧编解码 (codec, Frame)
//! - 传输策略抽象 (Transport trait, TcpTransport)
//! - 数据包收发组件 (PacketReceiver, PacketSender)
//! - 非阻塞网络接口 (NetworkInterface)
//! - 对端使用的异步帧连接 (FramedConnection)

mod codec;
mod config;
mod constants;
mod error;
mod frame;
mod framed;
mod interface;
mod receiver;
mod sender;
mod transport;

pub use codec::{
    check_payload_len, decode, decode_header, encode, encode_into, encode_with_limit,
    FrameHeader, FrameReader, FrameWriter,
};
pub use config::NetConfig;
pub use constants::*;
pub use error::{NetError, Result};
pub use frame::{Frame, MessageId};
pub use framed::FramedConnection;
pub use interface::{
    ConnectCallback, ConnectOutcome, ConnectState, LinkState, NetworkInterface,
};
pub use receiver::{Frames, PacketReceiver};
pub use sender::PacketSender;
pub use transport::{RawStream, TcpTransport, Transport};
