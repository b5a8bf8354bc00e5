use anyhow::{Context, Result};
use forward_proxy::access_log::AccessLogger;
use forward_proxy::logger::{init_from_env, init_logger, LogConfig, LogLevel};
use forward_proxy::ProxyServer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// 可选配置文件（工作目录下的 proxy.json），缺失时全部使用默认值
///
/// 监听端口始终来自命令行参数，不进配置文件。
#[derive(Debug, Serialize, Deserialize)]
struct Config {
    /// 访问日志文件路径
    #[serde(default = "default_access_log")]
    access_log: String,
    /// 监听地址（不含端口）
    #[serde(default = "default_listen_host")]
    listen_host: String,
    /// 诊断日志配置（可选）
    #[serde(default)]
    log: LogConfigFile,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct LogConfigFile {
    /// 日志级别: off, error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    level: String,
    /// 日志输出目标: stdout, file, both
    #[serde(default = "default_log_output")]
    output: String,
    /// 日志文件路径（当 output 为 file 或 both 时需要）
    file_path: Option<String>,
    /// 是否显示时间戳
    #[serde(default = "default_true")]
    show_timestamp: bool,
    /// 是否显示模块路径
    #[serde(default = "default_true")]
    show_module: bool,
    /// 是否使用颜色输出
    #[serde(default = "default_true")]
    use_color: bool,
}

fn default_access_log() -> String {
    "proxy.log".to_string()
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfigFile {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
            file_path: None,
            show_timestamp: true,
            show_module: true,
            use_color: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_log: default_access_log(),
            listen_host: default_listen_host(),
            log: LogConfigFile::default(),
        }
    }
}

const CONFIG_PATH: &str = "proxy.json";

/// 从指定路径读取配置；文件缺失或 JSON 不合法时回退到默认值
fn load_config_from(path: &std::path::Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "解析配置文件 {} 失败: {}，使用默认配置",
                    path.display(),
                    e
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // 命令行只接受一个参数：监听端口；参数数量不对打印用法后退出
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <port number>", args[0]);
        std::process::exit(0);
    }
    let port: u16 = args[1].parse().context("无效的端口号")?;

    let config_path = std::path::Path::new(CONFIG_PATH);
    let have_config_file = config_path.exists();
    let config = load_config_from(config_path);

    // 初始化诊断日志：有配置文件按配置文件来，否则按 RUST_LOG
    if have_config_file {
        let log_level = LogLevel::from_str(&config.log.level).unwrap_or(LogLevel::Info);
        let mut log_config = LogConfig::new(log_level)
            .with_timestamp(config.log.show_timestamp)
            .with_module(config.log.show_module)
            .with_color(config.log.use_color);

        match config.log.output.as_str() {
            "file" => {
                let file_path = config
                    .log
                    .file_path
                    .clone()
                    .unwrap_or_else(|| "logs/forward-proxy.log".to_string());
                log_config = log_config.with_file(&file_path);
            }
            "both" => {
                let file_path = config
                    .log
                    .file_path
                    .clone()
                    .unwrap_or_else(|| "logs/forward-proxy.log".to_string());
                log_config = log_config.with_both(&file_path);
            }
            _ => {
                // 默认输出到 stdout
            }
        }

        init_logger(log_config).map_err(|e| anyhow::anyhow!("初始化日志系统失败: {}", e))?;
    } else {
        init_from_env().map_err(|e| anyhow::anyhow!("初始化日志系统失败: {}", e))?;
    }

    log::info!("=== 转发代理服务器启动 ===");
    log::info!("监听端口: {}", port);
    log::info!("访问日志: {}", config.access_log);
    log::info!("诊断日志级别: {}", config.log.level);

    // 启动时创建（或清空）访问日志文件
    let access_log = Arc::new(
        AccessLogger::create(&config.access_log)
            .context(format!("无法创建访问日志文件: {}", config.access_log))?,
    );

    let listen_addr: SocketAddr = format!("{}:{}", config.listen_host, port)
        .parse()
        .context("无效的监听地址")?;

    let server = ProxyServer::new(listen_addr, access_log);

    log::info!("=== 服务器准备就绪 ===");
    server.run().await?;

    Ok(())
}
