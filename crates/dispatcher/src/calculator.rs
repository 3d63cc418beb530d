//! 调度时间计算
//!
//! 每种调度类型对应一个计算器，根据调度配置与历史触发/反馈时间推算下次触发时间。
//! 返回 `None` 表示不再触发。

use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use cron::Schedule;
use tracing::{error, warn};

use scheduler_core::{ScheduleOption, ScheduleType, SchedulerError, SchedulerResult};

/// 可被计算下次触发时间的对象
pub trait Calculated {
    fn schedule_option(&self) -> &ScheduleOption;

    /// 上次触发时间，从未触发为 `None`
    fn last_trigger_at(&self) -> Option<DateTime<Utc>>;

    /// 上次执行完成反馈时间
    fn last_feedback_at(&self) -> Option<DateTime<Utc>>;
}

/// 计算所需的最小状态
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub schedule_option: ScheduleOption,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub last_feedback_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    pub fn new(schedule_option: ScheduleOption) -> Self {
        Self {
            schedule_option,
            last_trigger_at: None,
            last_feedback_at: None,
        }
    }
}

impl Calculated for ScheduleState {
    fn schedule_option(&self) -> &ScheduleOption {
        &self.schedule_option
    }

    fn last_trigger_at(&self) -> Option<DateTime<Utc>> {
        self.last_trigger_at
    }

    fn last_feedback_at(&self) -> Option<DateTime<Utc>> {
        self.last_feedback_at
    }
}

pub trait ScheduleCalculator: Send + Sync {
    fn schedule_type(&self) -> ScheduleType;

    fn next_trigger_at(
        &self,
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>>;
}

fn start_at(option: &ScheduleOption, now: DateTime<Utc>) -> DateTime<Utc> {
    option.schedule_start_at.unwrap_or(now)
}

/// CRON：当前时间之后的下一个匹配时刻
pub struct CronScheduleCalculator;

impl ScheduleCalculator for CronScheduleCalculator {
    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::Cron
    }

    fn next_trigger_at(
        &self,
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let option = calculated.schedule_option();
        let expr = option.schedule_cron.as_deref().unwrap_or_default();
        let schedule = match Schedule::from_str(expr) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!("CRON表达式 {} 解析失败: {}", expr, e);
                return None;
            }
        };

        let from = now.max(start_at(option, now));
        let next = schedule.after(&from).next();
        if next.is_none() {
            warn!("CRON表达式 {} 没有下一次触发时间", expr);
        }
        next
    }
}

/// FIXED_RATE：按上次触发时间推进，落后时收敛到当前时间，不补偿积压
pub struct FixedRateScheduleCalculator;

impl ScheduleCalculator for FixedRateScheduleCalculator {
    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::FixedRate
    }

    fn next_trigger_at(
        &self,
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let option = calculated.schedule_option();
        match calculated.last_trigger_at() {
            None => Some(start_at(option, now).max(now)),
            Some(last) => Some((last + option.interval()).max(now)),
        }
    }
}

/// FIXED_DELAY：按上次反馈时间推进，上次执行未反馈时不触发
pub struct FixedDelayScheduleCalculator;

impl ScheduleCalculator for FixedDelayScheduleCalculator {
    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::FixedDelay
    }

    fn next_trigger_at(
        &self,
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let option = calculated.schedule_option();
        if calculated.last_trigger_at().is_none() {
            return Some(start_at(option, now).max(now));
        }
        let feedback_at = calculated.last_feedback_at()?;
        Some((feedback_at + option.interval()).max(now))
    }
}

/// DELAYED：只触发一次
pub struct DelayedScheduleCalculator;

impl ScheduleCalculator for DelayedScheduleCalculator {
    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::Delayed
    }

    fn next_trigger_at(
        &self,
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if calculated.last_trigger_at().is_some() {
            return None;
        }
        let option = calculated.schedule_option();
        Some((start_at(option, now) + option.delay()).max(now))
    }
}

/// NONE：从不触发
pub struct NoneScheduleCalculator;

impl ScheduleCalculator for NoneScheduleCalculator {
    fn schedule_type(&self) -> ScheduleType {
        ScheduleType::None
    }

    fn next_trigger_at(&self, _: &dyn Calculated, _: DateTime<Utc>) -> Option<DateTime<Utc>> {
        None
    }
}

static CRON: CronScheduleCalculator = CronScheduleCalculator;
static FIXED_RATE: FixedRateScheduleCalculator = FixedRateScheduleCalculator;
static FIXED_DELAY: FixedDelayScheduleCalculator = FixedDelayScheduleCalculator;
static DELAYED: DelayedScheduleCalculator = DelayedScheduleCalculator;
static NONE: NoneScheduleCalculator = NoneScheduleCalculator;

pub struct ScheduleCalculatorFactory;

impl ScheduleCalculatorFactory {
    pub fn get(schedule_type: ScheduleType) -> SchedulerResult<&'static dyn ScheduleCalculator> {
        match schedule_type {
            ScheduleType::Cron => Ok(&CRON),
            ScheduleType::FixedRate => Ok(&FIXED_RATE),
            ScheduleType::FixedDelay => Ok(&FIXED_DELAY),
            ScheduleType::Delayed => Ok(&DELAYED),
            ScheduleType::None => Ok(&NONE),
            ScheduleType::Unknown => Err(SchedulerError::UnsupportedScheduleType(
                schedule_type.as_str().to_string(),
            )),
        }
    }

    /// 计算下次触发时间，不足一秒的部分进位到整秒，超出调度结束时间的视为不触发
    pub fn next_trigger_at(
        calculated: &dyn Calculated,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let option = calculated.schedule_option();
        let calculator = Self::get(option.schedule_type)?;
        Ok(calculator
            .next_trigger_at(calculated, now)
            .map(ceil_to_second)
            .filter(|at| !option.is_expired_at(*at)))
    }
}

/// 进位到整秒，结果不早于 `at`
fn ceil_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at.trunc_subsecs(0);
    if truncated < at {
        truncated + Duration::seconds(1)
    } else {
        truncated
    }
}
