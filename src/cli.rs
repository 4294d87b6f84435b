use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use scheduler_core::models::{QueueFilter, RunOnce, Task, TaskFilter};
use scheduler_handlers::LOG_ROTATE_TYPE;
use scheduler_runner::WorkQueue;

use crate::app::Application;
use crate::shutdown::shutdown_signal;

/// 命令行入口
#[derive(Parser, Debug)]
#[command(name = "site-scheduler")]
#[command(version)]
#[command(about = "站点监控控制台的定时任务调度引擎")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，不指定时依次查找 config/scheduler.toml 和 scheduler.toml
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 覆盖配置中的日志级别
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 覆盖配置中的日志格式
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 执行一轮到期任务
    Run,
    /// 直接调用一个维护处理器，不经过 cron 调度
    Maintenance {
        #[arg(long, default_value = LOG_ROTATE_TYPE)]
        handler: String,
        /// 处理器参数 (JSON对象)
        #[arg(long)]
        params: Option<String>,
    },
    /// 启动HTTP服务
    Serve {
        /// 覆盖配置中的监听地址
        #[arg(long)]
        bind: Option<String>,
    },
    /// 任务管理
    Task(TaskCommands),
    /// 工作队列管理
    Queue(QueueCommands),
}

#[derive(Args, Debug)]
pub struct TaskCommands {
    #[command(subcommand)]
    pub action: TaskActions,
}

#[derive(Subcommand, Debug)]
pub enum TaskActions {
    /// 列出任务
    List {
        #[arg(long)]
        site: Option<i64>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// 创建任务
    Add {
        #[arg(long = "type")]
        task_type: String,
        /// 5 字段 cron 表达式或 @daily 等宏
        #[arg(long)]
        cron: String,
        #[arg(long)]
        site: Option<i64>,
        #[arg(long, default_value = "0")]
        priority: i32,
        /// 任务参数 (JSON对象)
        #[arg(long)]
        params: Option<String>,
        /// none | disable | delete
        #[arg(long, default_value = "none")]
        run_once: String,
        /// 创建后保持禁用
        #[arg(long)]
        disabled: bool,
    },
    /// 启用任务
    Enable { id: i64 },
    /// 禁用任务
    Disable { id: i64 },
    /// 删除任务
    Delete { id: i64 },
    /// 强制解锁卡死的任务
    Unlock { id: i64 },
    /// 列出卡死的任务
    Stuck,
    /// 让任务立即到期并执行一轮调度
    RunNow { id: i64 },
}

#[derive(Args, Debug)]
pub struct QueueCommands {
    #[command(subcommand)]
    pub action: QueueActions,
}

#[derive(Subcommand, Debug)]
pub enum QueueActions {
    /// 统计队列中的项
    Count {
        identifier: String,
        #[command(flatten)]
        filter: QueueFilterArgs,
    },
    /// 删除队列中匹配的项
    Clear {
        identifier: String,
        #[command(flatten)]
        filter: QueueFilterArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct QueueFilterArgs {
    #[arg(long)]
    pub site: Option<i64>,
    #[arg(long = "type")]
    pub queue_type: Option<String>,
}

impl QueueFilterArgs {
    fn to_filter(&self) -> QueueFilter {
        let mut filter = QueueFilter::new();
        if let Some(site) = self.site {
            filter = filter.site(site);
        }
        if let Some(queue_type) = &self.queue_type {
            filter = filter.queue_type(queue_type.clone());
        }
        filter
    }
}

fn parse_params(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("参数不是有效的JSON"),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 执行一个子命令
pub async fn execute(app: &Application, command: Commands) -> Result<()> {
    match command {
        Commands::Run => {
            let summary = app.run_scheduled().await?;
            info!(
                "调度完成: 执行 {} 个任务，失败 {} 个，待续 {} 个",
                summary.executed, summary.failed, summary.resumed
            );
            print_json(&summary)
        }
        Commands::Maintenance { handler, params } => {
            let params = parse_params(params.as_deref())?;
            let execution = app.run_maintenance(&handler, params).await?;
            info!("维护任务 {} 结束: {}", handler, execution.status);
            print_json(&serde_json::json!({
                "handler": handler,
                "status": execution.status,
                "storage": execution.storage,
                "duration_ms": execution.duration.as_millis() as u64,
            }))
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| app.config().api.bind_address.clone());
            app.serve(&bind, shutdown_signal()).await
        }
        Commands::Task(TaskCommands { action }) => execute_task(app, action).await,
        Commands::Queue(QueueCommands { action }) => execute_queue(app, action).await,
    }
}

async fn execute_task(app: &Application, action: TaskActions) -> Result<()> {
    let repo = app.task_repository();

    match action {
        TaskActions::List {
            site,
            task_type,
            enabled,
            limit,
            offset,
        } => {
            let filter = TaskFilter {
                site_id: site,
                task_type,
                enabled,
                limit: Some(limit),
                offset: Some(offset),
            };
            print_json(&repo.list(&filter).await?)
        }
        TaskActions::Add {
            task_type,
            cron,
            site,
            priority,
            params,
            run_once,
            disabled,
        } => {
            if !app.registry().has(&task_type).await? {
                return Err(anyhow!("未注册的任务类型: {task_type}"));
            }
            let run_once: RunOnce = run_once.parse()?;

            let mut task = Task::new(task_type, cron)
                .with_priority(priority)
                .with_params(parse_params(params.as_deref())?)
                .with_run_once(run_once)
                .with_enabled(!disabled);
            task.site_id = site;

            let task = repo.create(&task).await?;
            info!("已创建{}", task.entity_description());
            print_json(&task)
        }
        TaskActions::Enable { id } => print_json(&app.set_enabled(id, true).await?),
        TaskActions::Disable { id } => print_json(&app.set_enabled(id, false).await?),
        TaskActions::Delete { id } => {
            repo.delete(id).await?;
            info!("已删除任务 #{}", id);
            Ok(())
        }
        TaskActions::Unlock { id } => {
            if !repo.force_unlock(id, Utc::now()).await? {
                return Err(anyhow!("任务 #{id} 没有被锁定"));
            }
            info!("已强制解锁任务 #{}", id);
            print_json(&repo.get_by_id(id).await?)
        }
        TaskActions::Stuck => {
            let threshold = app.config().runner.stuck_threshold();
            print_json(&repo.find_stuck_tasks(Utc::now(), threshold).await?)
        }
        TaskActions::RunNow { id } => print_json(&app.run_now(id).await?),
    }
}

async fn execute_queue(app: &Application, action: QueueActions) -> Result<()> {
    match action {
        QueueActions::Count { identifier, filter } => {
            let queue = WorkQueue::new(identifier, app.queue_repository())?;
            let count = queue.count_by(&filter.to_filter()).await?;
            println!("{count}");
            Ok(())
        }
        QueueActions::Clear { identifier, filter } => {
            let queue = WorkQueue::new(identifier, app.queue_repository())?;
            let removed = queue.clear(&filter.to_filter()).await?;
            info!("已从队列 {} 删除 {} 项", queue.identifier(), removed);
            println!("{removed}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_add() {
        let cli = Cli::try_parse_from([
            "site-scheduler",
            "task",
            "add",
            "--type",
            "log_rotate",
            "--cron",
            "*/5 * * * *",
            "--site",
            "2",
            "--run-once",
            "delete",
        ])
        .unwrap();

        match cli.command {
            Commands::Task(TaskCommands {
                action:
                    TaskActions::Add {
                        task_type,
                        cron,
                        site,
                        run_once,
                        disabled,
                        ..
                    },
            }) => {
                assert_eq!(task_type, "log_rotate");
                assert_eq!(cron, "*/5 * * * *");
                assert_eq!(site, Some(2));
                assert_eq!(run_once, "delete");
                assert!(!disabled);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_maintenance_defaults_to_log_rotate() {
        let cli = Cli::try_parse_from(["site-scheduler", "maintenance"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Maintenance { handler, params: None } if handler == LOG_ROTATE_TYPE
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["site-scheduler", "run", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Run));
    }

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_object());
        assert_eq!(parse_params(Some(r#"{"a":1}"#)).unwrap()["a"], 1);
        assert!(parse_params(Some("not json")).is_err());
    }
}
