use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::resolver::ThreadSafeResolver;
use crate::uri::{parse_uri, ParsedTarget};

/// 请求行与单个头部行的最大长度（字节）
pub const MAX_LINE: usize = 8192;

/// 请求转发完成后交还给 handler 的信息
#[derive(Debug)]
pub struct ForwardedRequest {
    /// 已建立的目标服务器连接
    pub upstream: TcpStream,
    /// 请求目标（原始 URI 文本，用于访问日志）
    pub target: String,
}

/// 读取一行（含行结束符）到 `buf`，超过 `MAX_LINE` 视为 I/O 错误
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_LINE as u64)
        .read_until(b'\n', buf)
        .await?;

    if n == MAX_LINE && !buf.ends_with(b"\n") {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "request line exceeds maximum length",
        )));
    }

    Ok(n)
}

/// 从请求行中取出目标 URI
///
/// 方法标记透明传递，不限于 GET；取不到第二个标记视为无效请求。
fn request_target(line: &[u8]) -> Result<String, ProxyError> {
    let text = String::from_utf8_lossy(line);
    let mut tokens = text.split_whitespace();
    let _method = tokens.next();
    match tokens.next() {
        Some(uri) => Ok(uri.to_string()),
        None => Err(ProxyError::InvalidUri(text.trim_end().to_string())),
    }
}

/// 读取并解析客户端请求，建立目标连接，把请求原样转发过去
///
/// 请求行和所有头部行逐行原样写给目标服务器，不注入 Host，
/// 不做任何改写，转发完头部结束空行后立即停止。客户端在空行
/// 之前关闭连接时提前结束头部转发。
pub async fn forward_request<R>(
    reader: &mut R,
    resolver: &ThreadSafeResolver,
) -> Result<ForwardedRequest, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(MAX_LINE);

    // 1. 请求行
    let n = read_line_bounded(reader, &mut line).await?;
    if n == 0 {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "client closed before sending a request",
        )));
    }

    // 2. 解析目标
    let target = request_target(&line)?;
    let ParsedTarget { host, port, .. } = parse_uri(&target)?;
    debug!("请求目标: {} ({}:{})", target, host, port);

    // 3. 建立目标连接（解析 + 连接各一次）
    let mut upstream = resolver.connect(&host, port).await?;

    // 4. 请求行原样转发
    upstream.write_all(&line).await?;

    // 5. 头部行逐行原样转发，直到（含）结束空行
    loop {
        let n = read_line_bounded(reader, &mut line).await?;
        if n == 0 {
            debug!("客户端在头部结束前关闭连接");
            break;
        }
        upstream.write_all(&line).await?;
        if line.as_slice() == b"\r\n" || line.as_slice() == b"\n" {
            break;
        }
    }

    Ok(ForwardedRequest { upstream, target })
}
