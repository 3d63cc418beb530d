use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scheduler_core::AppConfig;

use crate::app::Application;
use crate::shutdown::ShutdownManager;

/// 命令行给出的启动参数，未给出的使用配置文件与环境变量
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub node_id: Option<String>,
}

/// 初始化日志系统，`RUST_LOG` 优先于 `log_level`
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(node_id) = &startup.node_id {
        config.broker.node_id = node_id.clone();
    }
    if let Some(log_level) = &startup.log_level {
        config.observability.log_level = log_level.clone();
    }
    if let Some(log_format) = &startup.log_format {
        config.observability.log_format = log_format.clone();
    }
    config.validate()?;
    Ok(config)
}

/// 启动调度节点并运行到收到关闭信号
pub async fn start_application(startup: StartupConfig) -> Result<()> {
    let config = load_config(&startup)?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动调度节点 {}", config.broker.node_id);
    if let Some(path) = &startup.config_path {
        info!("配置文件: {}", path);
    }

    let app = Arc::new(Application::new(config)?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("调度节点运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(60), app_handle).await {
        Ok(Ok(())) => info!("调度节点已优雅关闭"),
        Ok(Err(e)) => error!("调度节点关闭时发生错误: {e}"),
        Err(_) => warn!("调度节点关闭超时，强制退出"),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_command_line_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[broker]
node_id = "from-file"
port = 9100

[observability]
log_level = "debug"
"#
        )
        .unwrap();

        let startup = StartupConfig {
            config_path: Some(file.path().to_str().unwrap().to_string()),
            node_id: Some("from-cli".to_string()),
            log_format: Some("json".to_string()),
            ..Default::default()
        };
        let config = load_config(&startup).unwrap();

        assert_eq!(config.broker.node_id, "from-cli");
        assert_eq!(config.broker.port, 9100);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let startup = StartupConfig {
            config_path: Some(file.path().to_str().unwrap().to_string()),
            log_format: Some("xml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/scheduler.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }
}
