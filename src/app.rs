use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use scheduler_core::config::AppConfig;
use scheduler_dispatcher::{BeaconWatcher, IngestPipeline, PeriodicTaskRegistry};
use scheduler_infrastructure::{DatabaseManager, EventSourceFactory};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 消费生命周期事件并维护投影，直到收到关闭信号
    Ingest,
    /// 执行数据库迁移后退出
    Migrate,
    /// 打印已启用周期任务的到期判断后退出
    Schedules,
}

impl AppMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "ingest" => Ok(AppMode::Ingest),
            "migrate" => Ok(AppMode::Migrate),
            "schedules" => Ok(AppMode::Schedules),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }

    /// 是否需要等待关闭信号
    pub fn is_long_running(&self) -> bool {
        matches!(self, AppMode::Ingest)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;

        Ok(Self {
            config,
            mode,
            database,
        })
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let result = match self.mode {
            AppMode::Migrate => self.run_migrate().await,
            AppMode::Schedules => self.run_schedules().await,
            AppMode::Ingest => self.run_ingest(shutdown_rx).await,
        };

        self.database.close().await;
        result
    }

    async fn run_migrate(&self) -> Result<()> {
        self.database.migrate().await.context("数据库迁移失败")?;
        info!("数据库迁移完成");
        Ok(())
    }

    async fn run_schedules(&self) -> Result<()> {
        self.database.migrate().await.context("数据库迁移失败")?;

        let registry = PeriodicTaskRegistry::new(self.database.registry_store());
        let beacon = self.database.beacon_reader().last_change().await?;
        let now = Utc::now();

        match beacon {
            Some(last_change) => println!("变更信标: {}", last_change.to_rfc3339()),
            None => println!("变更信标: 未设置"),
        }

        for task in registry.list_enabled().await? {
            match registry.due_status(&task, now) {
                Ok(state) => println!(
                    "{}\t{}\t{}\tdue={}\tnext_check={}s",
                    task.name,
                    task.task,
                    task.schedule,
                    state.is_due,
                    state.next_check.num_seconds()
                ),
                Err(e) => warn!("周期任务 {} 调度求值失败: {e}", task.name),
            }
        }

        Ok(())
    }

    async fn run_ingest(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.database.migrate().await.context("数据库迁移失败")?;

        let handle = EventSourceFactory::create(
            &self.config.event_source,
            self.config.ingest.channel_capacity,
        )
        .await
        .context("创建事件源失败")?;

        let watcher_handle = {
            let watcher = BeaconWatcher::new(self.database.beacon_reader());
            let interval = self.config.beacon.poll_interval_seconds;
            let shutdown_rx = shutdown_rx.resubscribe();

            tokio::spawn(async move {
                run_beacon_loop(watcher, interval, shutdown_rx).await;
            })
        };

        let pipeline =
            IngestPipeline::new(self.config.ingest.clone(), self.database.projection_store());
        let result = pipeline.run(handle.source, shutdown_rx).await;

        watcher_handle.abort();

        let stats = result.context("事件摄取管道异常退出")?;
        info!(
            "事件摄取管道已停止: 接收 {}, 应用 {}, 跳过 {}, 格式错误 {}, 失败 {}",
            stats.received, stats.applied, stats.skipped, stats.malformed, stats.failed
        );
        Ok(())
    }
}

/// 周期检查变更信标，发现变更时记录日志
async fn run_beacon_loop(
    mut watcher: BeaconWatcher,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match watcher.poll().await {
                    Ok(true) => info!("周期任务集合已变更，信标: {:?}", watcher.last_seen()),
                    Ok(false) => {}
                    Err(e) => error!("读取变更信标失败: {e}"),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("信标轮询收到关闭信号");
                break;
            }
        }
    }
}
