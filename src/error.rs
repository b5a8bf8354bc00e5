use std::io;
use thiserror::Error;

/// 请求处理各阶段的类型化错误
///
/// 解析、解析域名、建立连接三类失败都会把诊断文本回写给客户端，
/// 并且不产生访问日志记录；中继阶段的 I/O 失败则保留已送达的
/// 字节数并照常记录日志。
#[derive(Debug, Error)]
pub enum ProxyError {
    /// 请求目标不是合法的 http:// 绝对 URI
    #[error("无效的 URI: {0}")]
    InvalidUri(String),

    /// 域名解析失败（解析出错或结果为空）
    #[error("DNS 解析失败: {host}")]
    Dns {
        host: String,
        #[source]
        source: Option<io::Error>,
    },

    /// 无法连接到目标服务器
    #[error("连接目标服务器 {host}:{port} 失败")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// 读写客户端或目标服务器时的 I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// 回写给客户端的简短诊断文本
    pub fn client_message(&self) -> &'static str {
        match self {
            ProxyError::InvalidUri(_) => "Not a valid URL\n",
            ProxyError::Dns { .. } => "Could not resolve host\n",
            ProxyError::Connect { .. } => "Could not connect to host\n",
            ProxyError::Io(_) => "Proxy I/O error\n",
        }
    }
}
