use anyhow::Result;
use futures::FutureExt;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::access_log::AccessLogger;
use crate::handler::{handle_connection, ConnectionContext};
use crate::metrics::Metrics;
use crate::resolver::ThreadSafeResolver;

/// 转发式 HTTP 代理服务器
pub struct ProxyServer {
    /// 监听地址
    listen_addr: SocketAddr,
    /// 共享的解析器（唯一的解析临界区）
    resolver: Arc<ThreadSafeResolver>,
    /// 共享的访问日志（唯一的日志临界区）
    access_log: Arc<AccessLogger>,
    /// 性能监控指标
    metrics: Metrics,
}

impl ProxyServer {
    /// 创建新的代理实例
    pub fn new(listen_addr: SocketAddr, access_log: Arc<AccessLogger>) -> Self {
        Self {
            listen_addr,
            resolver: Arc::new(ThreadSafeResolver::new()),
            access_log,
            metrics: Metrics::new(),
        }
    }

    /// 获取监控指标
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// 创建监听套接字并设置选项
    pub fn bind(&self) -> Result<TcpListener> {
        use socket2::{Domain, Protocol, Socket, Type};

        // 手动创建 socket 以设置选项和更大的 backlog
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        socket.bind(&self.listen_addr.into())?;

        // 加大 backlog，突发连接在 accept 之前先在队列里排队
        socket.listen(1024)?;

        let std_listener: std::net::TcpListener = socket.into();
        Ok(TcpListener::from_std(std_listener)?)
    }

    /// 启动代理服务器（bind + 无限 accept 循环）
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// 在给定监听套接字上无限循环接受连接
    ///
    /// 每个连接派生一个独立任务并立即继续 accept，从不等待任务
    /// 结束；并发 handler 数量没有上限。accept 失败只影响那一次
    /// 连接尝试，循环继续。
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("转发代理服务器启动在 {}", listener.local_addr()?);

        // 后台任务：每分钟打印监控指标
        let metrics_clone = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                metrics_clone.print_summary();
            }
        });

        loop {
            let (client, client_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!("接受连接失败: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            debug!("接受来自 {} 的新连接", client_addr);

            let ctx = ConnectionContext {
                client,
                client_addr,
                resolver: Arc::clone(&self.resolver),
                access_log: Arc::clone(&self.access_log),
                metrics: self.metrics.clone(),
            };

            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                // 捕获 panic，单个连接不能拖垮别的任务
                let result = std::panic::AssertUnwindSafe(handle_connection(ctx))
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("处理连接时出错: {}", e);
                    }
                    Err(panic_err) => {
                        error!("连接处理任务 panic: {:?}", panic_err);
                        metrics.inc_failed_connections();
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn temp_log_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "forward-proxy-server-{}-{}.log",
            name,
            std::process::id()
        ))
    }

    /// 起一个目标服务：读完请求头后回写固定响应并关闭
    async fn spawn_origin(response: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let response = response.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.split();
                    let mut reader = BufReader::new(read_half);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        let n = reader.read_line(&mut line).await.unwrap_or(0);
                        if n == 0 || line == "\r\n" {
                            break;
                        }
                    }
                    let _ = write_half.write_all(&response).await;
                    let _ = write_half.shutdown().await;
                });
            }
        });
        addr
    }

    /// 起代理服务器，返回其监听地址
    async fn spawn_proxy(log_path: &std::path::Path) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let access_log = Arc::new(AccessLogger::create(log_path).unwrap());
        let server = ProxyServer::new(addr, access_log);
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        addr
    }

    /// 通过代理完成一次完整事务，返回收到的全部响应字节
    async fn proxy_request(proxy: SocketAddr, target: &str) -> Vec<u8> {
        let mut client = TcpStream::connect(proxy).await.unwrap();
        let request = format!("GET {} HTTP/1.0\r\nAccept: */*\r\n\r\n", target);
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_transaction_end_to_end() {
        let body = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec();
        let origin = spawn_origin(body.clone()).await;

        let log_path = temp_log_path("single");
        let proxy = spawn_proxy(&log_path).await;

        let target = format!("http://127.0.0.1:{}/index.html", origin.port());
        let response = proxy_request(proxy, &target).await;
        assert_eq!(response, body);

        // 日志在客户端看到 EOF 之前写入，但再等一拍保险
        tokio::time::sleep(Duration::from_millis(100)).await;
        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(&format!("{} {}", target, body.len())));

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_transactions_log_exactly_n_lines() {
        let body = b"HTTP/1.0 200 OK\r\n\r\npayload-data".to_vec();
        let origin = spawn_origin(body.clone()).await;

        let log_path = temp_log_path("concurrent");
        let proxy = spawn_proxy(&log_path).await;

        let n = 40;
        let mut tasks = Vec::new();
        for i in 0..n {
            let target = format!("http://127.0.0.1:{}/page/{}", origin.port(), i);
            let expected = body.clone();
            tasks.push(tokio::spawn(async move {
                let response = proxy_request(proxy, &target).await;
                assert_eq!(response, expected);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), n);

        // 每行都完整且字节数正确
        for line in lines {
            assert!(line.contains(" http://127.0.0.1:"), "坏行: {}", line);
            let bytes_field: u64 = line.rsplit(' ').next().unwrap().parse().unwrap();
            assert_eq!(bytes_field, body.len() as u64);
        }

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parse_failure_does_not_affect_listener() {
        let body = b"HTTP/1.0 200 OK\r\n\r\nstill-alive".to_vec();
        let origin = spawn_origin(body.clone()).await;

        let log_path = temp_log_path("parse-failure");
        let proxy = spawn_proxy(&log_path).await;

        // 无效请求：收到诊断文本，连接关闭，没有日志
        let response = proxy_request(proxy, "ftp://example.com/").await;
        assert_eq!(response, b"Not a valid URL\n");

        // 随后的正常请求不受影响
        let target = format!("http://127.0.0.1:{}/after", origin.port());
        let response = proxy_request(proxy, &target).await;
        assert_eq!(response, body);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 1);

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn test_bind_produces_usable_listener() {
        let log_path = temp_log_path("bind");
        let access_log = Arc::new(AccessLogger::create(&log_path).unwrap());
        let server = ProxyServer::new("127.0.0.1:0".parse().unwrap(), access_log);

        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // 监听套接字立刻可以接受连接
        let connect = TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        assert!(accepted.is_ok());
        assert!(connected.is_ok());

        let _ = std::fs::remove_file(&log_path);
    }
}
