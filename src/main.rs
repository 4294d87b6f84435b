use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use scheduler_core::{init_logging, AppConfig};
use site_scheduler::{
    app::Application,
    cli::{execute, Cli},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置，命令行参数覆盖日志设置
    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    init_logging(&config.logging.level, &config.logging.format)?;
    info!("启动站点任务调度引擎");

    let app = Application::new(config).await?;
    let result = execute(&app, cli.command).await;
    app.close().await;

    // 任务级别的失败只记录在任务上，这里只有基础设施错误
    if let Err(e) = &result {
        error!("执行失败: {:#}", e);
    }
    result
}
