use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 代理性能监控指标
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    // 连接统计
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    failed_connections: AtomicU64,

    // 事务统计
    completed_transactions: AtomicU64,
    bytes_relayed: AtomicU64,

    // 错误统计
    invalid_uri_errors: AtomicU64,
    dns_errors: AtomicU64,
    connect_errors: AtomicU64,
    io_errors: AtomicU64,

    // 启动时间
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// 创建新的监控指标实例
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                total_connections: AtomicU64::new(0),
                active_connections: AtomicUsize::new(0),
                failed_connections: AtomicU64::new(0),
                completed_transactions: AtomicU64::new(0),
                bytes_relayed: AtomicU64::new(0),
                invalid_uri_errors: AtomicU64::new(0),
                dns_errors: AtomicU64::new(0),
                connect_errors: AtomicU64::new(0),
                io_errors: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // 连接统计
    pub fn inc_total_connections(&self) {
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_active_connections(&self) {
        self.inner.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_active_connections(&self) {
        self.inner.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_failed_connections(&self) {
        self.inner.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    // 事务统计
    pub fn inc_completed_transactions(&self) {
        self.inner
            .completed_transactions
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_relayed(&self, bytes: u64) {
        self.inner.bytes_relayed.fetch_add(bytes, Ordering::Relaxed);
    }

    // 错误统计
    pub fn inc_invalid_uri_errors(&self) {
        self.inner.invalid_uri_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_errors(&self) {
        self.inner.dns_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_errors(&self) {
        self.inner.connect_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_io_errors(&self) {
        self.inner.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    // 获取当前计数器值
    pub fn get_total_connections(&self) -> u64 {
        self.inner.total_connections.load(Ordering::Relaxed)
    }

    pub fn get_active_connections(&self) -> usize {
        self.inner.active_connections.load(Ordering::Relaxed)
    }

    // 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
            active_connections: self.inner.active_connections.load(Ordering::Relaxed),
            failed_connections: self.inner.failed_connections.load(Ordering::Relaxed),
            completed_transactions: self.inner.completed_transactions.load(Ordering::Relaxed),
            bytes_relayed: self.inner.bytes_relayed.load(Ordering::Relaxed),
            invalid_uri_errors: self.inner.invalid_uri_errors.load(Ordering::Relaxed),
            dns_errors: self.inner.dns_errors.load(Ordering::Relaxed),
            connect_errors: self.inner.connect_errors.load(Ordering::Relaxed),
            io_errors: self.inner.io_errors.load(Ordering::Relaxed),
            uptime: self.inner.start_time.elapsed(),
        }
    }

    /// 打印监控指标
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();
        log::info!("=== 性能监控指标 ===");
        log::info!("运行时间: {:?}", snapshot.uptime);
        log::info!("总连接数: {}", snapshot.total_connections);
        log::info!("活跃连接: {}", snapshot.active_connections);
        log::info!("失败连接: {}", snapshot.failed_connections);
        log::info!("完成事务: {}", snapshot.completed_transactions);
        log::info!("中继流量: {} KB", snapshot.bytes_relayed / 1024);
        log::info!("URI 解析错误: {}", snapshot.invalid_uri_errors);
        log::info!("DNS 错误: {}", snapshot.dns_errors);
        log::info!("连接错误: {}", snapshot.connect_errors);
        log::info!("中继 I/O 错误: {}", snapshot.io_errors);
    }
}

/// 监控指标快照
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub failed_connections: u64,
    pub completed_transactions: u64,
    pub bytes_relayed: u64,
    pub invalid_uri_errors: u64,
    pub dns_errors: u64,
    pub connect_errors: u64,
    pub io_errors: u64,
    pub uptime: Duration,
}

/// RAII 风格的连接计数器
pub struct ConnectionGuard {
    metrics: Metrics,
}

impl ConnectionGuard {
    pub fn new(metrics: Metrics) -> Self {
        metrics.inc_total_connections();
        metrics.inc_active_connections();

        log::debug!(
            "新连接建立 | 总连接数: {} | 活跃连接: {}",
            metrics.get_total_connections(),
            metrics.get_active_connections()
        );

        Self { metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.metrics.dec_active_connections();

        log::debug!(
            "连接关闭 | 总连接数: {} | 活跃连接: {}",
            self.metrics.get_total_connections(),
            self.metrics.get_active_connections()
        );
    }
}
