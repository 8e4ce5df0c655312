//! 探测客户端核心实现
//!
//! 模拟宿主引擎的逐帧循环：每一帧调用一次 [`ProbeClient::tick`]，
//! 所有网络操作都是非阻塞的。

use std::time::{Duration, Instant};

use framenet::{Frame, LinkState, MessageId, NetConfig, NetworkInterface};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// 探测消息 ID
pub const PING_ID: MessageId = 1;

/// 探测消息负载
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Ping {
    pub seq: u32,
    /// 发送时相对客户端启动的微秒数
    pub sent_at_micros: u64,
    /// 填充字节，用于测试大帧
    pub padding: Vec<u8>,
}

/// 探测参数
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub host: String,
    pub port: u16,
    /// 发送的探测消息总数
    pub count: u32,
    /// 每隔多少帧发送一次
    pub ping_every: u32,
    /// 填充字节数
    pub padding: usize,
    /// 由调用方计时的连接超时
    pub connect_timeout: Duration,
}

/// 单帧执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    /// 仍在进行
    Running,
    /// 所有探测消息都已收到回显
    Finished,
    /// 连接失败或中断
    Failed(String),
}

/// 探测统计
#[derive(Debug, Default, Clone)]
pub struct ProbeStats {
    pub sent: u32,
    pub received: u32,
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,
    pub total_rtt: Duration,
}

impl ProbeStats {
    fn record(&mut self, rtt: Duration) {
        self.received += 1;
        self.total_rtt += rtt;
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |m| m.min(rtt)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt, |m| m.max(rtt)));
    }

    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.received == 0 {
            None
        } else {
            Some(self.total_rtt / self.received)
        }
    }
}

/// 探测客户端
pub struct ProbeClient {
    iface: NetworkInterface,
    options: ProbeOptions,
    started: Instant,
    ticks: u64,
    stats: ProbeStats,
}

impl ProbeClient {
    /// 创建客户端并发起连接
    pub fn start(options: ProbeOptions, config: NetConfig) -> framenet::Result<Self> {
        let mut iface = NetworkInterface::tcp(config)?;
        iface.set_connect_callback(|outcome| match &outcome.result {
            Ok(addr) => info!("Attempt {} connected to {}", outcome.attempt, addr),
            Err(reason) => warn!("Attempt {} failed: {}", outcome.attempt, reason),
        });
        iface.connect_async(&options.host, options.port)?;

        Ok(Self {
            iface,
            options,
            started: Instant::now(),
            ticks: 0,
            stats: ProbeStats::default(),
        })
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// 执行一帧
    pub fn tick(&mut self) -> ProbeStatus {
        self.ticks += 1;

        match self.iface.update() {
            LinkState::Connecting => {
                // 超时由调用方负责：超过时间就放弃本次连接
                if let Some(elapsed) = self.iface.connect_elapsed() {
                    if elapsed > self.options.connect_timeout {
                        self.iface.close();
                        return ProbeStatus::Failed(format!(
                            "connect timed out after {:?}",
                            elapsed
                        ));
                    }
                }
                return ProbeStatus::Running;
            }
            LinkState::Connected => {}
            LinkState::Idle | LinkState::Failed => {
                return ProbeStatus::Failed(
                    self.iface
                        .last_error()
                        .unwrap_or("connection lost")
                        .to_string(),
                );
            }
        }

        if self.stats.sent < self.options.count
            && self.ticks % u64::from(self.options.ping_every.max(1)) == 0
        {
            if let Err(e) = self.send_ping() {
                warn!("Failed to send ping: {}", e);
            }
        }

        for frame in self.iface.poll() {
            self.handle_frame(frame);
        }

        if !self.iface.is_valid() {
            return ProbeStatus::Failed(
                self.iface
                    .last_error()
                    .unwrap_or("connection lost")
                    .to_string(),
            );
        }
        if self.stats.received >= self.options.count {
            return ProbeStatus::Finished;
        }
        ProbeStatus::Running
    }

    fn send_ping(&mut self) -> framenet::Result<()> {
        let ping = Ping {
            seq: self.stats.sent,
            sent_at_micros: self.started.elapsed().as_micros() as u64,
            padding: vec![0xA5; self.options.padding],
        };
        self.iface.send_message(PING_ID, &ping)?;
        self.stats.sent += 1;
        debug!("Sent ping {}", ping.seq);
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) {
        if frame.message_id() != PING_ID {
            debug!("Ignoring message {}", frame.message_id());
            return;
        }
        match frame.decode_payload::<Ping>() {
            Ok(ping) => {
                let now = self.started.elapsed();
                let rtt = now.saturating_sub(Duration::from_micros(ping.sent_at_micros));
                self.stats.record(rtt);
                info!("Echo seq={} rtt={:?}", ping.seq, rtt);
            }
            Err(e) => warn!("Malformed echo: {}", e),
        }
    }

    /// 关闭连接
    pub fn close(&mut self) {
        self.iface.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framenet::FramedConnection;
    use std::thread;
    use tokio::net::TcpListener;
    use tokio::runtime::Runtime;

    fn options(port: u16) -> ProbeOptions {
        ProbeOptions {
            host: "127.0.0.1".to_string(),
            port,
            count: 5,
            ping_every: 1,
            padding: 512,
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn run(client: &mut ProbeClient) -> ProbeStatus {
        for _ in 0..2000 {
            match client.tick() {
                ProbeStatus::Running => thread::sleep(Duration::from_millis(2)),
                status => return status,
            }
        }
        ProbeStatus::Running
    }

    #[test]
    fn test_probe_against_echo_peer() {
        let rt = Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        rt.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = FramedConnection::from_tcp(stream, 4096).unwrap().split();
            while let Ok(frame) = reader.recv().await {
                if writer.write_frame(&frame).await.is_err() {
                    break;
                }
            }
        });

        let mut client = ProbeClient::start(options(port), NetConfig::default()).unwrap();
        assert_eq!(run(&mut client), ProbeStatus::Finished);
        assert_eq!(client.stats().sent, 5);
        assert_eq!(client.stats().received, 5);
        assert!(client.stats().avg_rtt().is_some());
        client.close();
    }

    #[test]
    fn test_probe_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = ProbeClient::start(options(port), NetConfig::default()).unwrap();
        assert!(matches!(run(&mut client), ProbeStatus::Failed(_)));
    }

    #[test]
    fn test_stats() {
        let mut stats = ProbeStats::default();
        assert_eq!(stats.avg_rtt(), None);
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(30));
        assert_eq!(stats.avg_rtt(), Some(Duration::from_millis(20)));
        assert_eq!(stats.min_rtt, Some(Duration::from_millis(10)));
        assert_eq!(stats.max_rtt, Some(Duration::from_millis(30)));
    }
}
