//! 帧回显服务端
//!
//! 基于 Tokio 的异步 TCP 服务器，把收到的每一帧原样发回，用于联调客户端传输层

mod server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use framenet::DEFAULT_MAX_FRAME_SIZE;
use server::{EchoServer, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 帧回显服务端
#[derive(Parser, Debug)]
#[command(name = "echo-server", version)]
struct Args {
    /// 监听地址
    #[arg(default_value = "127.0.0.1:8080")]
    addr: String,

    /// 最大连接数
    #[arg(long, default_value_t = 100)]
    max_connections: u32,

    /// 单帧负载上限
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// 空闲超时（秒）
    #[arg(long, default_value_t = 30)]
    idle_timeout_secs: u64,

    /// 日志级别
    #[arg(long, default_value = "debug")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("echo_server={}", args.log_level).parse()?)
                .add_directive(format!("framenet={}", args.log_level).parse()?),
        )
        .init();

    info!("Echo Server starting on {}", args.addr);

    let server = EchoServer::new(ServerConfig {
        max_connections: args.max_connections,
        max_frame_size: args.max_frame_size,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
    });
    server.run(&args.addr).await?;

    Ok(())
}
