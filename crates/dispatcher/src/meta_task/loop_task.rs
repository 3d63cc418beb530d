use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use scheduler_core::{ScheduleOption, ScheduleType, SchedulerResult};

use super::{MetaTask, MetaTaskScheduler, MetaTaskType};
use crate::calculator::{Calculated, ScheduleCalculatorFactory};

/// 一次循环执行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// 执行已完成，完成时间即反馈时间
    Completed,
    /// 工作已移交，完成后通过 [`MetaTaskScheduler::feedback`] 回传
    Pending,
}

/// 循环元任务的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Waiting,
    Running,
    AwaitingFeedback,
    Stopped,
}

/// 被循环执行的工作
#[async_trait]
pub trait LoopWork: Send + Sync {
    /// 工作对应的实体ID
    fn id(&self) -> String;

    fn meta_type(&self) -> MetaTaskType;

    fn schedule_option(&self) -> &ScheduleOption;

    async fn verify(&self) -> bool {
        true
    }

    async fn run(&self, trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome>;
}

#[derive(Debug)]
struct LoopState {
    last_trigger_at: Option<DateTime<Utc>>,
    last_feedback_at: Option<DateTime<Utc>>,
    next_trigger_at: Option<DateTime<Utc>>,
    phase: LoopPhase,
}

struct Snapshot<'a> {
    option: &'a ScheduleOption,
    state: &'a LoopState,
}

impl Calculated for Snapshot<'_> {
    fn schedule_option(&self) -> &ScheduleOption {
        self.option
    }

    fn last_trigger_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_trigger_at
    }

    fn last_feedback_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_feedback_at
    }
}

/// 按调度配置循环执行的元任务
///
/// CRON / FIXED_RATE 在执行前先布置下一次，保证节奏，可能重叠；
/// FIXED_DELAY 执行完成并记录反馈后才布置下一次，保证不重叠。
/// 工作返回 [`WorkOutcome::Pending`] 时进入 `AwaitingFeedback`，
/// 保留登记直到收到反馈。
pub struct LoopMetaTask {
    work: Arc<dyn LoopWork>,
    state: Mutex<LoopState>,
    this: Weak<LoopMetaTask>,
}

impl LoopMetaTask {
    pub fn new(work: Arc<dyn LoopWork>) -> Arc<Self> {
        Self::resume(work, None, None)
    }

    /// 由历史触发与反馈时间恢复循环
    pub fn resume(
        work: Arc<dyn LoopWork>,
        last_trigger_at: Option<DateTime<Utc>>,
        last_feedback_at: Option<DateTime<Utc>>,
    ) -> Arc<Self> {
        let mut state = LoopState {
            last_trigger_at,
            last_feedback_at,
            next_trigger_at: None,
            phase: LoopPhase::Stopped,
        };
        state.next_trigger_at = calculate(work.schedule_option(), &state, Utc::now());
        state.phase = if state.next_trigger_at.is_some() {
            LoopPhase::Waiting
        } else if work.schedule_option().schedule_type == ScheduleType::FixedDelay
            && last_trigger_at.is_some()
            && last_feedback_at.is_none()
        {
            LoopPhase::AwaitingFeedback
        } else {
            LoopPhase::Stopped
        };

        Arc::new_cyclic(|this| Self {
            work,
            state: Mutex::new(state),
            this: this.clone(),
        })
    }

    pub fn phase(&self) -> LoopPhase {
        self.state().phase
    }

    pub fn last_trigger_at(&self) -> Option<DateTime<Utc>> {
        self.state().last_trigger_at
    }

    pub fn last_feedback_at(&self) -> Option<DateTime<Utc>> {
        self.state().last_feedback_at
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn keeps_cadence(&self) -> bool {
        matches!(
            self.work.schedule_option().schedule_type,
            ScheduleType::Cron | ScheduleType::FixedRate
        )
    }

    /// 记录反馈并计算下一次触发，返回是否还需要布置
    fn complete(&self, feedback_at: DateTime<Utc>) -> bool {
        let mut state = self.state();
        state.last_feedback_at = Some(feedback_at);
        self.advance(&mut state)
    }

    fn advance(&self, state: &mut LoopState) -> bool {
        state.next_trigger_at = calculate(self.work.schedule_option(), state, Utc::now());
        state.phase = if state.next_trigger_at.is_some() {
            LoopPhase::Waiting
        } else {
            LoopPhase::Stopped
        };
        state.next_trigger_at.is_some()
    }

    async fn rearm(&self, scheduler: &MetaTaskScheduler) {
        if let Some(this) = self.this.upgrade() {
            scheduler.reschedule(this).await;
        }
    }
}

fn calculate(
    option: &ScheduleOption,
    state: &LoopState,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let snapshot = Snapshot { option, state };
    match ScheduleCalculatorFactory::next_trigger_at(&snapshot, now) {
        Ok(next) => next,
        Err(e) => {
            error!("计算下次触发时间失败: {}", e);
            None
        }
    }
}

#[async_trait]
impl MetaTask for LoopMetaTask {
    fn schedule_id(&self) -> String {
        self.work.meta_type().schedule_id(&self.work.id())
    }

    fn meta_type(&self) -> MetaTaskType {
        self.work.meta_type()
    }

    fn trigger_at(&self) -> Option<DateTime<Utc>> {
        self.state().next_trigger_at
    }

    async fn verify(&self) -> bool {
        self.work.verify().await
    }

    async fn execute(&self, scheduler: &MetaTaskScheduler) -> SchedulerResult<()> {
        let trigger_at = {
            let mut state = self.state();
            let Some(trigger_at) = state.next_trigger_at else {
                return Ok(());
            };
            state.last_trigger_at = Some(trigger_at);
            state.last_feedback_at = None;
            state.phase = LoopPhase::Running;
            trigger_at
        };

        if self.keeps_cadence() {
            let rearm = {
                let mut state = self.state();
                self.advance(&mut state)
            };
            if rearm {
                self.rearm(scheduler).await;
            }
            self.work.run(trigger_at).await?;
            return Ok(());
        }

        let outcome = match self.work.run(trigger_at).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state().phase = LoopPhase::Stopped;
                return Err(e);
            }
        };

        let awaiting = outcome == WorkOutcome::Pending
            && self.work.schedule_option().schedule_type == ScheduleType::FixedDelay;
        let rearm = {
            let mut state = self.state();
            match state.last_feedback_at {
                // 运行期间已收到反馈
                Some(_) => self.advance(&mut state),
                None if awaiting => {
                    state.phase = LoopPhase::AwaitingFeedback;
                    state.next_trigger_at = None;
                    false
                }
                None => {
                    state.last_feedback_at = Some(Utc::now());
                    self.advance(&mut state)
                }
            }
        };
        if rearm {
            self.rearm(scheduler).await;
        } else if self.phase() == LoopPhase::AwaitingFeedback {
            debug!("元任务 {} 等待执行反馈", self.schedule_id());
        }
        Ok(())
    }

    fn is_awaiting_feedback(&self) -> bool {
        self.state().phase == LoopPhase::AwaitingFeedback
    }

    fn on_feedback(&self, feedback_at: DateTime<Utc>) -> bool {
        let mut state = self.state();
        let phase = state.phase;
        match phase {
            LoopPhase::AwaitingFeedback => {
                drop(state);
                self.complete(feedback_at);
                true
            }
            LoopPhase::Running => {
                state.last_feedback_at = Some(feedback_at);
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use scheduler_core::SchedulerError;

    use super::*;

    struct CountingWork {
        option: ScheduleOption,
        runs: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        outcome: WorkOutcome,
        fail: bool,
        busy: Duration,
    }

    impl CountingWork {
        fn new(option: ScheduleOption) -> Self {
            Self {
                option,
                runs: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                outcome: WorkOutcome::Completed,
                fail: false,
                busy: Duration::ZERO,
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LoopWork for CountingWork {
        fn id(&self) -> String {
            "counting".to_string()
        }

        fn meta_type(&self) -> MetaTaskType {
            MetaTaskType::PlanSchedule
        }

        fn schedule_option(&self) -> &ScheduleOption {
            &self.option
        }

        async fn run(&self, _trigger_at: DateTime<Utc>) -> SchedulerResult<WorkOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.busy).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(SchedulerError::Internal("work failed".to_string()));
            }
            Ok(self.outcome)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_keeps_firing() {
        let scheduler = MetaTaskScheduler::new(8);
        let work = Arc::new(CountingWork::new(ScheduleOption::fixed_rate(1)));

        let task = LoopMetaTask::new(work.clone());
        assert_eq!(task.phase(), LoopPhase::Waiting);
        assert!(scheduler.schedule(task).await);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(work.runs() >= 2);
        assert!(scheduler.is_scheduled("plan-schedule-counting").await);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_never_overlaps() {
        let scheduler = MetaTaskScheduler::new(8);
        let work = Arc::new(CountingWork {
            busy: Duration::from_millis(1_500),
            ..CountingWork::new(ScheduleOption::fixed_delay(1))
        });

        scheduler.schedule(LoopMetaTask::new(work.clone())).await;
        tokio::time::sleep(Duration::from_secs(8)).await;

        assert!(work.runs() >= 2);
        assert_eq!(work.max_running.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_work_awaits_feedback() {
        let scheduler = MetaTaskScheduler::new(8);
        let work = Arc::new(CountingWork {
            outcome: WorkOutcome::Pending,
            ..CountingWork::new(ScheduleOption::fixed_delay(1))
        });
        let task = LoopMetaTask::new(work.clone());
        scheduler.schedule(task.clone()).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(work.runs(), 1);
        assert_eq!(task.phase(), LoopPhase::AwaitingFeedback);
        assert!(scheduler.is_scheduled("plan-schedule-counting").await);

        assert!(scheduler.feedback("plan-schedule-counting", Utc::now()).await);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(work.runs(), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_without_feedback_awaits() {
        let work = Arc::new(CountingWork::new(ScheduleOption::fixed_delay(10)));
        let task = LoopMetaTask::resume(work, Some(Utc::now()), None);
        assert_eq!(task.phase(), LoopPhase::AwaitingFeedback);
        assert!(task.trigger_at().is_none());
        assert!(task.is_awaiting_feedback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_work_stops_loop() {
        let scheduler = MetaTaskScheduler::new(8);
        let work = Arc::new(CountingWork {
            fail: true,
            ..CountingWork::new(ScheduleOption::fixed_delay(1))
        });
        scheduler.schedule(LoopMetaTask::new(work.clone())).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(work.runs(), 1);
        assert!(scheduler.scheduled_ids().await.is_empty());
    }

    #[test]
    fn test_none_schedule_is_stopped() {
        let work = Arc::new(CountingWork::new(ScheduleOption::none()));
        let task = LoopMetaTask::new(work);
        assert_eq!(task.phase(), LoopPhase::Stopped);
        assert!(task.trigger_at().is_none());
    }
}
