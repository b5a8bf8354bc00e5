use crate::error::ProxyError;

/// 从绝对 URI 中解析出的目标信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// 目标主机名
    pub host: String,
    /// 目标端口（URI 中未给出时默认 80）
    pub port: u16,
    /// 主机名后第一个斜杠之后的路径（没有斜杠则为空串）
    pub path: String,
}

/// 解析代理请求中的绝对 URI（`http://host[:port]/path`）
///
/// scheme 大小写不敏感，但必须是 `http://`，否则返回 `InvalidUri`。
/// 主机名到第一个空格、冒号、斜杠或行结束符为止；主机名后紧跟
/// 冒号时取其后的十进制数字作为端口（没有数字或超出 u16 范围
/// 时得到 0），否则默认 80。
pub fn parse_uri(uri: &str) -> Result<ParsedTarget, ProxyError> {
    // 按字节比较 scheme：URI 来自网络输入，字节下标切片会在
    // 多字节字符中间 panic
    let scheme_ok = uri
        .as_bytes()
        .get(..7)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(b"http://"));
    if !scheme_ok {
        return Err(ProxyError::InvalidUri(uri.to_string()));
    }

    // 前 7 个字节已确认是 ASCII，从这里切片是安全的
    let rest = &uri[7..];

    // 1. 提取主机名
    let host_end = rest
        .find([' ', ':', '/', '\r', '\n'])
        .unwrap_or(rest.len());
    let host = rest[..host_end].to_string();

    // 2. 提取端口
    let mut port = 80u16;
    if rest[host_end..].starts_with(':') {
        let digits: String = rest[host_end + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        port = digits.parse().unwrap_or(0);
    }

    // 3. 提取路径（从主机名开头找第一个斜杠）
    let path = match rest.find('/') {
        Some(idx) => rest[idx + 1..].to_string(),
        None => String::new(),
    };

    Ok(ParsedTarget { host, port, path })
}
