//! 探测客户端
//!
//! 以固定帧率驱动非阻塞网络接口，向服务端发送探测消息并统计回显延迟

mod client;

use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use client::{ProbeClient, ProbeOptions, ProbeStatus};
use framenet::{
    NetConfig, DEFAULT_MAX_FRAME_SIZE, DEFAULT_TCP_RECV_BUFFER_SIZE, DEFAULT_TCP_SEND_BUFFER_SIZE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 探测客户端
#[derive(Parser, Debug)]
#[command(name = "probe-client", version)]
struct Args {
    /// 服务器地址
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// 服务器端口
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// 探测消息总数
    #[arg(long, default_value_t = 10)]
    count: u32,

    /// 每隔多少帧发送一次
    #[arg(long, default_value_t = 30)]
    ping_every: u32,

    /// 帧间隔（毫秒）
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,

    /// 探测消息的填充字节数
    #[arg(long, default_value_t = 0)]
    padding: usize,

    /// 连接超时（毫秒），由客户端自行计时
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// SO_RCVBUF
    #[arg(long, default_value_t = DEFAULT_TCP_RECV_BUFFER_SIZE)]
    tcp_recv_buffer_size: u32,

    /// SO_SNDBUF
    #[arg(long, default_value_t = DEFAULT_TCP_SEND_BUFFER_SIZE)]
    tcp_send_buffer_size: u32,

    /// 单帧负载上限
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("probe_client={}", args.log_level).parse()?)
                .add_directive(format!("framenet={}", args.log_level).parse()?),
        )
        .init();

    let config = NetConfig {
        tcp_recv_buffer_size: args.tcp_recv_buffer_size,
        tcp_send_buffer_size: args.tcp_send_buffer_size,
        max_frame_size: args.max_frame_size,
        // 超时由帧循环自行判断
        connect_timeout: None,
        ..NetConfig::default()
    };
    let options = ProbeOptions {
        host: args.host,
        port: args.port,
        count: args.count,
        ping_every: args.ping_every,
        padding: args.padding,
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
    };

    let mut client = ProbeClient::start(options, config)?;
    let tick = Duration::from_millis(args.tick_ms);

    loop {
        match client.tick() {
            ProbeStatus::Running => thread::sleep(tick),
            ProbeStatus::Finished => break,
            ProbeStatus::Failed(reason) => bail!("probe failed: {}", reason),
        }
    }

    let stats = client.stats();
    info!(
        "Probe finished: sent={} received={} min={:?} avg={:?} max={:?}",
        stats.sent,
        stats.received,
        stats.min_rtt,
        stats.avg_rtt(),
        stats.max_rtt
    );
    client.close();

    Ok(())
}
