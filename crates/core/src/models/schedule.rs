use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "FIXED_RATE")]
    FixedRate,
    #[serde(rename = "FIXED_DELAY")]
    FixedDelay,
    #[serde(rename = "DELAYED")]
    Delayed,
    /// 反序列化时无法识别的类型
    #[serde(other)]
    Unknown,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::None => "NONE",
            ScheduleType::Cron => "CRON",
            ScheduleType::FixedRate => "FIXED_RATE",
            ScheduleType::FixedDelay => "FIXED_DELAY",
            ScheduleType::Delayed => "DELAYED",
            ScheduleType::Unknown => "UNKNOWN",
        }
    }
}

/// 触发方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TriggerType {
    #[serde(rename = "SCHEDULE")]
    Schedule,
    #[serde(rename = "API")]
    Api,
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleOption {
    pub schedule_type: ScheduleType,
    /// 调度开始时间，为空表示立即生效
    pub schedule_start_at: Option<DateTime<Utc>>,
    /// 调度结束时间，为空表示不结束
    pub schedule_end_at: Option<DateTime<Utc>>,
    /// DELAYED 的延迟秒数
    #[serde(default)]
    pub schedule_delay_seconds: u64,
    /// FIXED_RATE / FIXED_DELAY 的间隔秒数
    #[serde(default)]
    pub schedule_interval_seconds: u64,
    /// CRON 表达式，六段式（秒 分 时 日 月 周）
    pub schedule_cron: Option<String>,
}

impl ScheduleOption {
    pub fn new(schedule_type: ScheduleType) -> Self {
        Self {
            schedule_type,
            schedule_start_at: None,
            schedule_end_at: None,
            schedule_delay_seconds: 0,
            schedule_interval_seconds: 0,
            schedule_cron: None,
        }
    }

    pub fn none() -> Self {
        Self::new(ScheduleType::None)
    }

    pub fn cron(expr: &str) -> Self {
        Self {
            schedule_cron: Some(expr.to_string()),
            ..Self::new(ScheduleType::Cron)
        }
    }

    pub fn fixed_rate(interval_seconds: u64) -> Self {
        Self {
            schedule_interval_seconds: interval_seconds,
            ..Self::new(ScheduleType::FixedRate)
        }
    }

    pub fn fixed_delay(interval_seconds: u64) -> Self {
        Self {
            schedule_interval_seconds: interval_seconds,
            ..Self::new(ScheduleType::FixedDelay)
        }
    }

    pub fn delayed(delay_seconds: u64) -> Self {
        Self {
            schedule_delay_seconds: delay_seconds,
            ..Self::new(ScheduleType::Delayed)
        }
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.schedule_start_at = Some(start_at);
        self
    }

    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.schedule_end_at = Some(end_at);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.schedule_interval_seconds as i64)
    }

    pub fn delay(&self) -> Duration {
        Duration::seconds(self.schedule_delay_seconds as i64)
    }

    /// 触发时间是否已超出调度结束时间
    pub fn is_expired_at(&self, trigger_at: DateTime<Utc>) -> bool {
        matches!(self.schedule_end_at, Some(end) if trigger_at > end)
    }

    /// 校验调度配置，计划保存前调用
    pub fn validate(&self) -> SchedulerResult<()> {
        if let (Some(start), Some(end)) = (self.schedule_start_at, self.schedule_end_at) {
            if end < start {
                return Err(SchedulerError::Validation(
                    "调度结束时间不能早于开始时间".to_string(),
                ));
            }
        }

        match self.schedule_type {
            ScheduleType::Cron => {
                let expr = self.schedule_cron.as_deref().unwrap_or_default();
                if expr.trim().is_empty() {
                    return Err(SchedulerError::Validation("CRON表达式不能为空".to_string()));
                }
                cron::Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
                    expr: expr.to_string(),
                    message: e.to_string(),
                })?;
            }
            ScheduleType::FixedRate | ScheduleType::FixedDelay => {
                if self.schedule_interval_seconds == 0 {
                    return Err(SchedulerError::Validation(format!(
                        "{} 调度间隔必须大于0",
                        self.schedule_type.as_str()
                    )));
                }
            }
            ScheduleType::Delayed | ScheduleType::None => {}
            ScheduleType::Unknown => {
                return Err(SchedulerError::UnsupportedScheduleType(
                    self.schedule_type.as_str().to_string(),
                ));
            }
        }
        Ok(())
    }
}
