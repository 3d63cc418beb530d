use std::sync::Arc;

use tracing::info;

use scheduler_core::{Plan, PlanInfo, PlanRepository, SchedulerError, SchedulerResult};

use crate::cluster::slot_of;

/// 计划的保存、版本更新与启停
pub struct PlanService {
    plans: Arc<dyn PlanRepository>,
    slot_size: u32,
}

impl PlanService {
    pub fn new(plans: Arc<dyn PlanRepository>, slot_size: u32) -> Self {
        Self { plans, slot_size }
    }

    /// 校验并保存新计划，槽位在保存时计算
    pub async fn save(&self, info: &PlanInfo) -> SchedulerResult<Plan> {
        info.validate()?;
        if self.plans.get(&info.plan_id).await?.is_some() {
            return Err(SchedulerError::Validation(format!(
                "计划已存在: {}",
                info.plan_id
            )));
        }

        let slot = slot_of(&info.plan_id, self.slot_size);
        let plan = Plan::new(&info.plan_id, &info.name, &info.version, slot);
        self.plans.create(&plan, info).await?;
        info!("保存计划 {} 版本 {} 槽位 {}", plan.plan_id, info.version, slot);
        Ok(plan)
    }

    /// 以新版本快照更新计划，`expected_version` 与当前版本不一致时返回 `StaleVersion`
    pub async fn update(
        &self,
        plan_id: &str,
        expected_version: &str,
        info: &PlanInfo,
    ) -> SchedulerResult<Plan> {
        if info.plan_id != plan_id {
            return Err(SchedulerError::Validation(format!(
                "版本快照属于计划 {}，不能用于更新 {}",
                info.plan_id, plan_id
            )));
        }
        info.validate()?;

        let plan = self.get(plan_id).await?;
        let stale = || SchedulerError::StaleVersion {
            plan_id: plan_id.to_string(),
            expected: expected_version.to_string(),
        };
        if plan.current_version != expected_version {
            return Err(stale());
        }

        // 快照先于版本切换写入，切换失败时撤回
        self.plans.save_info(info).await?;
        if !self
            .plans
            .update_version(plan_id, expected_version, &plan.recently_version, &info.version)
            .await?
        {
            self.plans.delete_info(plan_id, &info.version).await?;
            return Err(stale());
        }
        info!(
            "计划 {} 版本 {} → {}",
            plan_id, expected_version, info.version
        );
        self.get(plan_id).await
    }

    pub async fn enable(&self, plan_id: &str) -> SchedulerResult<()> {
        self.set_enabled(plan_id, true).await
    }

    pub async fn disable(&self, plan_id: &str) -> SchedulerResult<()> {
        self.set_enabled(plan_id, false).await
    }

    async fn set_enabled(&self, plan_id: &str, enabled: bool) -> SchedulerResult<()> {
        let plan = self.get(plan_id).await?;
        if plan.enabled == enabled {
            return Ok(());
        }
        if !self.plans.update_enabled(plan_id, enabled).await? {
            return Err(SchedulerError::PlanNotFound {
                id: plan_id.to_string(),
            });
        }
        info!("计划 {} {}", plan_id, if enabled { "已启用" } else { "已停用" });
        Ok(())
    }

    pub async fn get(&self, plan_id: &str) -> SchedulerResult<Plan> {
        self.plans
            .get(plan_id)
            .await?
            .ok_or_else(|| SchedulerError::PlanNotFound {
                id: plan_id.to_string(),
            })
    }
}
