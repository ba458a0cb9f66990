//! IOTSRV 查询服务
//!
//! 启动流程：
//! 1. 加载配置（`config/iotsrv.toml`，缺失时使用默认值）
//! 2. 初始化日志
//! 3. 连接文档存储，失败即退出
//! 4. 构建命名查询注册表
//! 5. 启动 HTTP API
//!
//! 运行: cargo run --bin iotsrv-query-server -- [--config path] [--http addr] [--mongo uri] [--memory]

use anyhow::Context;
use iotsrv_query::service::http::HttpServer;
use iotsrv_query::storage;
use iotsrv_query::utils::config::{ServiceConfig, StoreBackend, DEFAULT_CONFIG_PATH};
use iotsrv_query::{QueryExecutor, QueryRegistry};
use std::sync::Arc;

/// 命令行参数
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<String>,
    http_address: Option<String>,
    mongo_uri: Option<String>,
    memory: bool,
}

impl CliArgs {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut cli = CliArgs::default();
        for i in 0..args.len() {
            match args[i].as_str() {
                "--config" | "-c" => cli.config_path = args.get(i + 1).cloned(),
                "--http" | "-h" => cli.http_address = args.get(i + 1).cloned(),
                "--mongo" | "-m" => cli.mongo_uri = args.get(i + 1).cloned(),
                "--memory" => cli.memory = true,
                _ => {}
            }
        }
        cli
    }
}

fn split_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    // 1. 加载配置文件（日志尚未初始化，告警延后输出）
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (mut config, load_warning) = match ServiceConfig::load_from_file(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (ServiceConfig::default(), Some(e)),
    };

    // 2. 初始化日志
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.server.log_level.as_str()),
    )
    .init();

    match load_warning {
        Some(e) => log::warn!("{} ({}), using defaults", e, config_path),
        None => log::info!("Configuration loaded from {}", config_path),
    }

    if let Some(address) = cli.http_address {
        match split_address(&address) {
            Some((host, port)) => {
                config.http.host = host;
                config.http.port = port;
            }
            None => log::warn!("Ignoring invalid --http address: {}", address),
        }
    }
    if let Some(uri) = cli.mongo_uri {
        config.store.uri = uri;
    }
    if cli.memory {
        config.store.backend = StoreBackend::Memory;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    log::info!("  Store backend: {:?}", config.store.backend);
    log::info!("  Database: {} @ {}", config.store.database, config.store.uri);

    // 3. 连接存储，服务离开存储无法工作，连接失败直接退出
    let store = match storage::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to connect to data store: {}", e);
            std::process::exit(1);
        }
    };

    // 4. 命名查询注册表（默认时间窗口以启动时刻为锚点）
    let now_ms = chrono::Utc::now().timestamp_millis();
    let registry = Arc::new(QueryRegistry::builtin(now_ms, &config.query));
    let executor = QueryExecutor::new(registry, store);

    // 5. HTTP API
    let bind_address = config.http.bind_address();
    log::info!("✅ {} definitions registered", executor.registry().len());
    HttpServer::new(executor, &config.server.name, bind_address.clone())
        .run()
        .await
        .with_context(|| format!("HTTP server on {} failed", bind_address))
}
