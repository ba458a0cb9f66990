//! 配置管理模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 默认配置文件
pub const DEFAULT_CONFIG_PATH: &str = "config/iotsrv.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl HttpConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Mongodb,
    /// 进程内存储，仅用于测试和本地调试；数据来自 `seed_path`，不持久化
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// 连接与选主超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// memory 后端的初始数据（JSON：`{"<collection>": [...]}`）
    #[serde(default)]
    pub seed_path: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            uri: default_uri(),
            database: default_database(),
            connect_timeout_ms: default_connect_timeout(),
            seed_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// 原始数据查询行数上限
    #[serde(default = "default_max_rows")]
    pub max_rows: i64,
    /// 默认时间窗口（天）
    #[serde(default = "default_window_days")]
    pub default_window_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            default_window_days: default_window_days(),
        }
    }
}

// 默认值函数
fn default_name() -> String {
    "iotsrv-query".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8003
}
fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}
fn default_database() -> String {
    "iotsrv".to_string()
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_max_rows() -> i64 {
    1000
}
fn default_window_days() -> i64 {
    30
}

impl ServiceConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        let config: Self =
            toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self, String> {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.query.max_rows <= 0 {
            return Err(format!(
                "query.max_rows must be positive, got {}",
                self.query.max_rows
            ));
        }
        if self.query.default_window_days < 0 {
            return Err(format!(
                "query.default_window_days must not be negative, got {}",
                self.query.default_window_days
            ));
        }
        Ok(())
    }
}
