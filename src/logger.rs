use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 诊断日志配置
///
/// 这里配置的是过程性诊断输出（`log` 宏族），与每事务一行的
/// 访问日志（`access_log` 模块）是两件事。
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否显示时间戳
    pub show_timestamp: bool,
    /// 是否显示模块路径
    pub show_module: bool,
    /// 是否使用颜色输出（仅终端）
    pub use_color: bool,
    /// 日志输出目标
    pub output: LogOutput,
}

/// 日志输出目标
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// 仅输出到标准输出
    Stdout,
    /// 仅输出到文件
    File(PathBuf),
    /// 同时输出到标准输出和文件
    Both(PathBuf),
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// 关闭所有日志
    Off,
    /// 错误日志
    Error,
    /// 警告日志
    Warn,
    /// 信息日志
    Info,
    /// 调试日志
    Debug,
    /// 追踪日志
    Trace,
}

impl LogLevel {
    /// 转换为 log::LevelFilter
    pub fn to_level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }

    /// 从字符串解析日志级别
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            show_timestamp: true,
            show_module: true,
            use_color: true,
            output: LogOutput::Stdout,
        }
    }
}

impl LogConfig {
    /// 创建新的日志配置
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// 设置是否显示时间戳
    pub fn with_timestamp(mut self, show: bool) -> Self {
        self.show_timestamp = show;
        self
    }

    /// 设置是否显示模块路径
    pub fn with_module(mut self, show: bool) -> Self {
        self.show_module = show;
        self
    }

    /// 设置是否使用颜色
    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    /// 设置输出到文件
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.as_ref().to_path_buf());
        self
    }

    /// 设置同时输出到标准输出和文件
    pub fn with_both<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.as_ref().to_path_buf());
        self
    }
}

/// 诊断日志文件写入器（追加模式）
struct FileWriter {
    file: File,
}

impl FileWriter {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }
}

/// 实现 log::Log 的诊断日志器
struct DiagnosticLogger {
    config: LogConfig,
    file_writer: Option<Arc<Mutex<FileWriter>>>,
}

impl Log for DiagnosticLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.config.level.to_level_filter()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let plain = self.format_record(record, false);

        // 标准输出
        match &self.config.output {
            LogOutput::Stdout | LogOutput::Both(_) => {
                if self.config.use_color {
                    println!("{}", self.format_record(record, true));
                } else {
                    println!("{}", plain);
                }
            }
            LogOutput::File(_) => {}
        }

        // 文件（文件中不使用颜色）
        if let Some(writer) = &self.file_writer {
            if let Ok(mut w) = writer.lock() {
                let _ = w.write_line(&plain);
            }
        }
    }

    fn flush(&self) {
        if let Some(writer) = &self.file_writer {
            if let Ok(mut w) = writer.lock() {
                let _ = w.file.flush();
            }
        }
    }
}

impl DiagnosticLogger {
    fn format_record(&self, record: &Record, use_color: bool) -> String {
        let timestamp = if self.config.show_timestamp {
            format!("[{}] ", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        let level = if use_color && self.config.use_color {
            match record.level() {
                log::Level::Error => "\x1b[31mERROR\x1b[0m",
                log::Level::Warn => "\x1b[33mWARN \x1b[0m",
                log::Level::Info => "\x1b[32mINFO \x1b[0m",
                log::Level::Debug => "\x1b[36mDEBUG\x1b[0m",
                log::Level::Trace => "\x1b[35mTRACE\x1b[0m",
            }
        } else {
            match record.level() {
                log::Level::Error => "ERROR",
                log::Level::Warn => "WARN ",
                log::Level::Info => "INFO ",
                log::Level::Debug => "DEBUG",
                log::Level::Trace => "TRACE",
            }
        };

        let module = if self.config.show_module {
            record
                .module_path()
                .map(|p| format!("[{}] ", p))
                .unwrap_or_default()
        } else {
            String::new()
        };

        format!("{}{} {}{}", timestamp, level, module, record.args())
    }
}

/// 初始化诊断日志系统
///
/// # 示例
///
/// ```no_run
/// use forward_proxy::logger::{init_logger, LogConfig, LogLevel};
///
/// // 默认配置（输出到标准输出）
/// init_logger(LogConfig::default()).unwrap();
///
/// // 同时输出到标准输出和文件
/// let config = LogConfig::new(LogLevel::Debug).with_both("logs/proxy.log");
/// init_logger(config).unwrap();
/// ```
pub fn init_logger(config: LogConfig) -> Result<(), String> {
    let file_writer = match &config.output {
        LogOutput::File(path) | LogOutput::Both(path) => {
            let writer =
                FileWriter::new(path).map_err(|e| format!("无法创建日志文件: {}", e))?;
            Some(Arc::new(Mutex::new(writer)))
        }
        LogOutput::Stdout => None,
    };

    let logger = DiagnosticLogger {
        config,
        file_writer,
    };

    log::set_boxed_logger(Box::new(logger)).map_err(|e| format!("设置日志器失败: {}", e))?;
    log::set_max_level(LevelFilter::Trace);

    Ok(())
}

/// 从环境变量初始化诊断日志系统
///
/// 读取 RUST_LOG 环境变量来设置日志级别，无法识别时回退到 info。
pub fn init_from_env() -> Result<(), String> {
    let level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let level = LogLevel::from_str(&level_str).unwrap_or(LogLevel::Info);
    init_logger(LogConfig::new(level))
}
