use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

/// 一条已完成事务的访问日志记录
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// 事务完成时刻（本地时间，记录时取值）
    pub timestamp: DateTime<Local>,
    /// 客户端地址（IPv4 点分十进制）
    pub client_ip: IpAddr,
    /// 请求目标（原始 URI 文本）
    pub target: String,
    /// 写回客户端的响应字节数
    pub bytes: u64,
}

impl LogEntry {
    /// 以当前时刻构造一条记录
    pub fn new(client_ip: IpAddr, target: String, bytes: u64) -> Self {
        Self {
            timestamp: Local::now(),
            client_ip,
            target,
            bytes,
        }
    }
}

/// 格式化为固定格式的日志行
///
/// `<星期> <日> <月> <年> <时:分:秒> <时区>: <点分 IP> <请求目标> <字节数>`
pub fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{}: {} {} {}\n",
        entry.timestamp.format("%a %d %b %Y %H:%M:%S %Z"),
        entry.client_ip,
        entry.target,
        entry.bytes,
    )
}

/// 串行化访问日志的格式化与追加写入
///
/// 格式化和写入在同一个临界区内完成，并发 handler 的日志行
/// 不会在行中间交错。这与诊断日志（`logger` 模块）无关：访问
/// 日志是每事务一行的固定格式数据文件。
pub struct AccessLogger {
    writer: Mutex<File>,
}

impl AccessLogger {
    /// 在进程启动时创建（已存在则清空）访问日志文件
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: Mutex::new(file),
        })
    }

    /// 追加一条完整的日志行
    ///
    /// 写入失败只产生一条告警，不影响连接处理。
    pub fn append(&self, entry: &LogEntry) {
        let mut file = match self.writer.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };

        let line = format_entry(entry);
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            log::warn!("写入访问日志失败: {}", e);
        }
    }
}
