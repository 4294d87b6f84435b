use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;

use scheduler_api::create_app;
use scheduler_core::{
    models::Task,
    traits::{QueueRepository, TaskRepository},
    AppConfig,
};
use scheduler_handlers::BuiltinHandlers;
use scheduler_infrastructure::DatabaseManager;
use scheduler_runner::{CallbackRegistry, Execution, RunSummary, Runner};

/// 主应用程序
///
/// 持有数据库连接和处理器注册表。每个 CLI 命令或 HTTP 服务都从这里取得依赖。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    registry: Arc<CallbackRegistry>,
}

impl Application {
    /// 连接数据库（同时执行迁移）并注册内置处理器
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;

        let registry = Arc::new(CallbackRegistry::new().with_source(Arc::new(
            BuiltinHandlers::new(config.handlers.clone(), database.queue_repository()),
        )));

        info!("应用初始化完成，数据库类型: {:?}", database.database_type());

        Ok(Self {
            config,
            database,
            registry,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<CallbackRegistry> {
        self.registry.clone()
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        self.database.task_repository()
    }

    pub fn queue_repository(&self) -> Arc<dyn QueueRepository> {
        self.database.queue_repository()
    }

    pub fn runner(&self) -> Runner {
        Runner::new(
            self.task_repository(),
            self.registry(),
            self.config.runner.clone(),
        )
    }

    /// 执行一轮调度
    pub async fn run_scheduled(&self) -> Result<RunSummary> {
        self.runner().run().await.context("调度执行失败")
    }

    /// 在 cron 循环之外直接调用一个处理器
    pub async fn run_maintenance(&self, handler_type: &str, params: Value) -> Result<Execution> {
        self.runner()
            .run_task_directly(handler_type, params)
            .await
            .with_context(|| format!("维护任务执行失败: {handler_type}"))
    }

    /// 让任务立即到期并执行一轮调度
    pub async fn run_now(&self, id: i64) -> Result<RunSummary> {
        if !self.task_repository().schedule_now(id, Utc::now()).await? {
            return Err(anyhow!("任务 #{id} 正在执行"));
        }
        self.run_scheduled().await
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<Task> {
        let repo = self.task_repository();
        let mut task = repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("任务 #{id} 不存在"))?;

        task.enabled = enabled;
        Ok(repo.update(&task, Utc::now()).await?)
    }

    /// 启动HTTP服务，`shutdown` 完成后停止接收新请求
    pub async fn serve<F>(&self, bind_address: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_app(
            self.task_repository(),
            self.registry(),
            self.config.runner.clone(),
            &self.config.api,
        );

        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {bind_address}"))?;
        info!("API服务器监听: {}", bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::TaskStatus;
    use scheduler_handlers::LOG_ROTATE_TYPE;
    use serde_json::json;
    use tempfile::TempDir;

    async fn application(dir: &TempDir) -> Application {
        let mut config = AppConfig::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
        config.handlers.log_dir = dir.path().join("log").to_string_lossy().into_owned();
        Application::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_run_with_empty_store() {
        let dir = TempDir::new().unwrap();
        let app = application(&dir).await;

        let summary = app.run_scheduled().await.unwrap();
        assert_eq!(summary.executed, 0);
        app.close().await;
    }

    #[tokio::test]
    async fn test_run_now_and_toggle_enabled() {
        let dir = TempDir::new().unwrap();
        let app = application(&dir).await;
        let task = app
            .task_repository()
            .create(&Task::new(LOG_ROTATE_TYPE, "0 0 1 1 *"))
            .await
            .unwrap();

        let summary = app.run_now(task.id).await.unwrap();
        assert_eq!(summary.count(TaskStatus::Ok), 1);

        let disabled = app.set_enabled(task.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(app.set_enabled(999, true).await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_unknown_handler_fails() {
        let dir = TempDir::new().unwrap();
        let app = application(&dir).await;

        assert!(app.run_maintenance("missing", json!({})).await.is_err());
        let execution = app.run_maintenance(LOG_ROTATE_TYPE, json!({})).await.unwrap();
        assert_eq!(execution.status, TaskStatus::Ok);
    }
}
