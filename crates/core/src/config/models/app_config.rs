use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    broker::BrokerConfig, dispatcher::DispatcherConfig, meta_task::MetaTaskConfig,
    observability::ObservabilityConfig,
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub meta_task: MetaTaskConfig,
    pub dispatcher: DispatcherConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER_, nested keys joined by `__`)
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file path, if None try the default paths
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("broker.node_id", defaults.broker.node_id)?
            .set_default("broker.host", defaults.broker.host)?
            .set_default("broker.port", defaults.broker.port as i64)?
            .set_default("broker.slot_size", defaults.broker.slot_size as i64)?
            .set_default(
                "broker.worker_heartbeat_timeout_seconds",
                defaults.broker.worker_heartbeat_timeout_seconds,
            )?
            .set_default(
                "meta_task.max_concurrent_executions",
                defaults.meta_task.max_concurrent_executions as i64,
            )?
            .set_default(
                "meta_task.plan_load_interval_seconds",
                defaults.meta_task.plan_load_interval_seconds as i64,
            )?
            .set_default(
                "meta_task.job_check_interval_seconds",
                defaults.meta_task.job_check_interval_seconds as i64,
            )?
            .set_default(
                "meta_task.job_check_grace_seconds",
                defaults.meta_task.job_check_grace_seconds,
            )?
            .set_default(
                "meta_task.job_check_page_size",
                defaults.meta_task.job_check_page_size as i64,
            )?
            .set_default(
                "meta_task.worker_check_interval_seconds",
                defaults.meta_task.worker_check_interval_seconds as i64,
            )?
            .set_default(
                "meta_task.task_check_interval_seconds",
                defaults.meta_task.task_check_interval_seconds as i64,
            )?
            .set_default(
                "dispatcher.max_dispatch_attempts",
                defaults.dispatcher.max_dispatch_attempts as i64,
            )?
            .set_default(
                "dispatcher.max_concurrent_dispatches",
                defaults.dispatcher.max_concurrent_dispatches as i64,
            )?
            .set_default(
                "dispatcher.lru_lookback_seconds",
                defaults.dispatcher.lru_lookback_seconds,
            )?
            .set_default(
                "dispatcher.rpc_timeout_seconds",
                defaults.dispatcher.rpc_timeout_seconds as i64,
            )?
            .set_default("observability.log_level", defaults.observability.log_level)?
            .set_default("observability.log_format", defaults.observability.log_format)?;

        // 1. Load config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // 2. Environment variable overrides - highest priority
        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("调度节点配置验证失败")?;

        self.meta_task.validate().context("元任务配置验证失败")?;

        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
