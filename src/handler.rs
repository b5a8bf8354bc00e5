use anyhow::Result;
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::access_log::{AccessLogger, LogEntry};
use crate::error::ProxyError;
use crate::forwarder::forward_request;
use crate::metrics::{ConnectionGuard, Metrics};
use crate::relay::relay_response;
use crate::resolver::ThreadSafeResolver;

/// 单个连接的全部上下文
///
/// accept 时创建，整体移交给派生出的 handler 任务独占；客户端
/// 套接字随上下文所有权走，任何退出路径上都恰好关闭一次。
pub struct ConnectionContext {
    /// 客户端套接字
    pub client: TcpStream,
    /// 客户端地址
    pub client_addr: SocketAddr,
    /// 共享的解析器
    pub resolver: Arc<ThreadSafeResolver>,
    /// 共享的访问日志
    pub access_log: Arc<AccessLogger>,
    /// 共享的监控指标
    pub metrics: Metrics,
}

/// 处理单个客户端连接
///
/// 流程：解析并转发请求 -> 中继响应 -> 记录访问日志 -> 关闭。
/// 解析、解析域名、连接三类失败回写诊断文本后直接终止，不产生
/// 日志记录；一旦进入中继阶段，无论是否出现 I/O 错误都恰好
/// 记录一条日志，字节数取实际送达的数量。
pub async fn handle_connection(ctx: ConnectionContext) -> Result<()> {
    let ConnectionContext {
        client,
        client_addr,
        resolver,
        access_log,
        metrics,
    } = ctx;

    // 连接计数随任务生命周期自动增减
    let _guard = ConnectionGuard::new(metrics.clone());

    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let forwarded = match forward_request(&mut reader, &resolver).await {
        Ok(forwarded) => forwarded,
        Err(e) => {
            warn!("来自 {} 的请求转发失败: {}", client_addr, e);
            count_failure(&metrics, &e);

            // 回写诊断文本；写不进去也无所谓，连接马上关闭
            let _ = write_half.write_all(e.client_message().as_bytes()).await;
            let _ = write_half.shutdown().await;
            return Ok(());
        }
    };

    let mut upstream = forwarded.upstream;

    // 中继响应；中途失败时已送达的字节数仍进入日志
    let outcome = relay_response(&mut upstream, &mut write_half).await;
    if let Some(e) = &outcome.error {
        metrics.inc_io_errors();
        debug!(
            "来自 {} 的中继提前结束: {} (已送达 {} 字节)",
            client_addr, e, outcome.bytes
        );
    }

    // 恰好一条日志记录，时间戳取记录时刻
    let entry = LogEntry::new(client_addr.ip(), forwarded.target, outcome.bytes);
    access_log.append(&entry);

    metrics.add_bytes_relayed(outcome.bytes);
    metrics.inc_completed_transactions();

    let _ = write_half.shutdown().await;
    Ok(())
}

fn count_failure(metrics: &Metrics, err: &ProxyError) {
    metrics.inc_failed_connections();
    match err {
        ProxyError::InvalidUri(_) => metrics.inc_invalid_uri_errors(),
        ProxyError::Dns { .. } => metrics.inc_dns_errors(),
        ProxyError::Connect { .. } => metrics.inc_connect_errors(),
        ProxyError::Io(_) => metrics.inc_io_errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::AccessLogger;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn temp_log_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "forward-proxy-handler-{}-{}.log",
            name,
            std::process::id()
        ))
    }

    /// 把一个真实的 loopback 连接交给 handler 处理
    async fn run_handler_with_client(
        log_path: &std::path::Path,
    ) -> (TcpStream, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let access_log = Arc::new(AccessLogger::create(log_path).unwrap());
        let handler = tokio::spawn(async move {
            let (client, client_addr) = listener.accept().await.unwrap();
            let ctx = ConnectionContext {
                client,
                client_addr,
                resolver: Arc::new(ThreadSafeResolver::new()),
                access_log,
                metrics: Metrics::new(),
            };
            handle_connection(ctx).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        (stream, handler)
    }

    #[tokio::test]
    async fn test_invalid_uri_writes_diagnostic_and_no_log_entry() {
        let log_path = temp_log_path("invalid-uri");
        let (mut client, handler) = run_handler_with_client(&log_path).await;

        client
            .write_all(b"GET ftp://example.com/ HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "Not a valid URL\n");

        handler.await.unwrap();

        // 失败路径不产生任何日志记录
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.is_empty());

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn test_connect_failure_writes_diagnostic_and_no_log_entry() {
        let log_path = temp_log_path("connect-fail");
        let (mut client, handler) = run_handler_with_client(&log_path).await;

        // 先绑定再释放端口，保证无人监听
        let dead_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let request = format!("GET http://127.0.0.1:{}/ HTTP/1.0\r\n\r\n", dead_port);
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "Could not connect to host\n");

        handler.await.unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.is_empty());

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn test_successful_transaction_relays_and_logs_once() {
        // 固定内容的目标服务
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        let body = b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let expected = body.clone();
        tokio::spawn(async move {
            let (mut stream, _) = origin.accept().await.unwrap();
            let (read_half, mut write_half) = stream.split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)
                    .await
                    .unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            write_half.write_all(&body).await.unwrap();
            write_half.shutdown().await.unwrap();
        });

        let log_path = temp_log_path("success");
        let (mut client, handler) = run_handler_with_client(&log_path).await;

        let request = format!(
            "GET http://127.0.0.1:{}/index.html HTTP/1.0\r\n\r\n",
            origin_addr.port()
        );
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, expected);

        handler.await.unwrap();

        // 恰好一条日志，字节数等于响应大小
        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("127.0.0.1"));
        assert!(lines[0].contains(&format!(
            "http://127.0.0.1:{}/index.html {}",
            origin_addr.port(),
            expected.len()
        )));

        let _ = std::fs::remove_file(&log_path);
    }
}
