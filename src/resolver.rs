use log::debug;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;

use crate::error::ProxyError;

/// 线程安全的域名解析 + 连接封装
///
/// 底层解析原语的结果可能存放在被复用的共享存储中，因此解析和
/// 结果拷贝必须在同一个临界区内完成：先把解析出的地址拷贝进
/// 调用方自有的 `Vec`，然后才释放锁。先释放后拷贝会让第二个
/// 调用方的解析覆盖第一个调用方尚未使用的地址数据，这个顺序
/// 在这里是硬性约束。套接字创建和 connect 在临界区之外进行。
pub struct ThreadSafeResolver {
    /// 解析临界区锁（实例内持有，不使用进程级全局量）
    lock: Mutex<()>,
}

impl ThreadSafeResolver {
    /// 创建新的解析器实例
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// 解析主机名并连接，返回已连接的目标套接字
    ///
    /// 解析和连接各尝试一次，不重试。解析出错或结果为空返回
    /// `Dns`，连接失败返回 `Connect`。
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, ProxyError> {
        let addrs: Vec<SocketAddr> = {
            let _guard = self.lock.lock().await;

            let resolved = lookup_host((host, port)).await.map_err(|e| ProxyError::Dns {
                host: host.to_string(),
                source: Some(e),
            })?;

            // 锁仍持有：把解析结果收集进调用方自有的 Vec
            resolved.collect()
        };

        if addrs.is_empty() {
            return Err(ProxyError::Dns {
                host: host.to_string(),
                source: None,
            });
        }

        debug!("解析 {} -> {:?}", host, addrs);

        // 连接只使用已拷贝出的地址，取第一个解析结果
        TcpStream::connect(addrs[0])
            .await
            .map_err(|e| ProxyError::Connect {
                host: host.to_string(),
                port,
                source: e,
            })
    }
}

impl Default for ThreadSafeResolver {
    fn default() -> Self {
        Self::new()
    }
}
