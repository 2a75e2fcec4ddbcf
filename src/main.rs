use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use periodic_scheduler::app::{AppMode, Application};
use periodic_scheduler::shutdown::ShutdownManager;
use scheduler_core::config::AppConfig;
use scheduler_core::{init_logging, LogFormat};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("periodic-scheduler")
        .version("1.0.0")
        .about("周期任务调度与事件投影控制面")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/scheduler.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["ingest", "migrate", "schedules"])
                .default_value("ingest"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，缺省时使用配置文件中的值")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，缺省时使用配置文件中的值")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = required_arg(&matches, "config")?;
    let mode_str = required_arg(&matches, "mode")?;

    let config = AppConfig::load(Some(config_path))
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    // 命令行参数优先于配置文件
    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format)
        .parse()?;
    init_logging(log_level, log_format)?;

    info!("启动周期任务调度系统");
    info!("配置文件: {config_path}");
    info!("运行模式: {mode_str}");

    let app_mode = AppMode::parse(mode_str)?;
    let app = Application::new(config.clone(), app_mode).await?;
    let shutdown_manager = ShutdownManager::new();

    if !app_mode.is_long_running() {
        let shutdown_rx = shutdown_manager.subscribe().await;
        return app.run(shutdown_rx).await;
    }

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move { app.run(shutdown_rx).await })
    };
    tokio::pin!(app_handle);

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            // 应用在关闭信号之前自行退出，通常是事件源断开
            return match result {
                Ok(run_result) => run_result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
    }

    shutdown_manager.shutdown().await;

    // 摄取管道自身带排空超时，这里再多留出一些余量
    let timeout = Duration::from_secs(config.ingest.shutdown_timeout_seconds + 5);
    match tokio::time::timeout(timeout, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("周期任务调度系统已退出");
    Ok(())
}

fn required_arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow::anyhow!("缺少参数: {name}"))
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败") };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        sigterm.recv().await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("收到Ctrl+C信号");
        },
        result = terminate => {
            result?;
            info!("收到SIGTERM信号");
        },
    }

    Ok(())
}
