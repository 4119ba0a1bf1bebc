//! 过滤引擎命令行
//!
//! 用法: filter-engine [--log-level <LEVEL>] [--print-metrics] <ast.json> <items.json>
//!
//! 读取过滤树和记录数组，经由管道本地求值，输出匹配的记录。

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use filter_engine::{
    CacheMiddleware, FilterStore, LocalExecutor, LoggingMiddleware, Pipeline, RetryMiddleware,
};
use filter_shared::config::AppConfig;
use filter_shared::observability;
use serde_json::Value;
use tracing::info;

const SERVICE_NAME: &str = "filter-engine";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    let mut obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    if let Some(level) = &cli.log_level {
        obs_config.log_level = level.clone();
    }
    obs_config.metrics_enabled |= cli.print_metrics;
    let _guard = observability::init(&obs_config)?;

    let ast_json = tokio::fs::read_to_string(&cli.ast)
        .await
        .with_context(|| format!("读取过滤树失败: {}", cli.ast.display()))?;
    let store = FilterStore::from_json(&ast_json).context("解析过滤树失败")?;

    let items_json = tokio::fs::read_to_string(&cli.items)
        .await
        .with_context(|| format!("读取记录失败: {}", cli.items.display()))?;
    let items: Vec<Value> = serde_json::from_str(&items_json).context("记录必须是 JSON 数组")?;

    info!(
        rules = store.get_all_rules().len(),
        items = items.len(),
        "输入加载完成"
    );

    let pipeline_config = &config.pipeline;
    let pipeline = Pipeline::builder()
        .middleware(LoggingMiddleware::new(SERVICE_NAME))
        .middleware_if(
            pipeline_config.cache.enabled,
            CacheMiddleware::from_config(&pipeline_config.cache),
        )
        .middleware(RetryMiddleware::from_config(&pipeline_config.retry))
        .terminal(LocalExecutor::new(items))
        .build()?;

    let matched = pipeline.execute(store.root()).await?;

    println!("{}", serde_json::to_string_pretty(&matched)?);

    if cli.print_metrics {
        if let Some(rendered) = observability::metrics::render() {
            eprintln!("{}", rendered);
        }
    }
    Ok(())
}
