//! 转发式 HTTP 代理
//!
//! 接受客户端连接，解析绝对 URI 请求（`http://host[:port]/path`），
//! 连接目标服务器，把请求原样转发过去，再把响应逐字节中继回
//! 客户端，每完成一次事务记录一行访问日志。
//!
//! 并发模型：每连接一个派生任务，accept 循环从不等待任务结束。
//! 进程范围内只有两个互不嵌套的临界区：访问日志的格式化加写入，
//! 以及域名解析加结果拷贝。

pub mod access_log;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod logger;
pub mod metrics;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod uri;

pub use error::ProxyError;
pub use server::ProxyServer;
