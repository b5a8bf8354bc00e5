use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 一次响应中继的结果
#[derive(Debug)]
pub struct RelayOutcome {
    /// 成功写回客户端的字节总数
    pub bytes: u64,
    /// 中继提前结束时的 I/O 错误（读目标失败或写客户端失败）
    pub error: Option<std::io::Error>,
}

/// 根据 CPU 核心数选择中继缓冲区大小
///
/// 小型服务器（1-2核）：16KB，节省内存
/// 中型服务器（4-8核）：32KB
/// 大型服务器（16+核）：64KB，提高吞吐量
pub(crate) fn relay_buffer_size() -> usize {
    let num_cpus = num_cpus::get();
    if num_cpus <= 2 {
        16384
    } else if num_cpus <= 8 {
        32768
    } else {
        65536
    }
}

/// 把目标服务器的响应逐块原样写回客户端，直到对端关闭
///
/// 返回送达的字节总数。写客户端失败立即中止中继，但此前已
/// 送达的字节数保留给日志使用；读到但未送达的那一块不计入
/// 总数，差额以告警形式记录。
pub async fn relay_response<R, W>(upstream: &mut R, client: &mut W) -> RelayOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; relay_buffer_size()];
    let mut total: u64 = 0;

    loop {
        let n = match upstream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("读取目标服务器响应失败: {}", e);
                return RelayOutcome {
                    bytes: total,
                    error: Some(e),
                };
            }
        };

        if let Err(e) = client.write_all(&buf[..n]).await {
            warn!("写回客户端失败: {} (本块 {} 字节已读到但未送达)", e, n);
            return RelayOutcome {
                bytes: total,
                error: Some(e),
            };
        }

        total += n as u64;
    }

    RelayOutcome { bytes: total, error: None }
}
