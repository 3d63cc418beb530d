use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use scheduler_core::{Plan, PlanInfo, PlanRepository, SchedulerError, SchedulerResult};

/// 内存计划仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanRepository {
    plans: Arc<RwLock<HashMap<String, Plan>>>,
    /// (plan_id, version) -> 快照
    infos: Arc<RwLock<HashMap<(String, String), PlanInfo>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.plans.read().await.len()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn get(&self, plan_id: &str) -> SchedulerResult<Option<Plan>> {
        Ok(self.plans.read().await.get(plan_id).cloned())
    }

    async fn get_info(&self, plan_id: &str, version: &str) -> SchedulerResult<Option<PlanInfo>> {
        let key = (plan_id.to_string(), version.to_string());
        Ok(self.infos.read().await.get(&key).cloned())
    }

    async fn create(&self, plan: &Plan, info: &PlanInfo) -> SchedulerResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.plan_id) {
            return Err(SchedulerError::Validation(format!(
                "计划已存在: {}",
                plan.plan_id
            )));
        }
        self.save_info(info).await?;
        plans.insert(plan.plan_id.clone(), plan.clone());
        debug!("保存计划: {} 版本 {}", plan.plan_id, plan.current_version);
        Ok(())
    }

    async fn save_info(&self, info: &PlanInfo) -> SchedulerResult<()> {
        let key = (info.plan_id.clone(), info.version.clone());
        let mut infos = self.infos.write().await;
        if infos.contains_key(&key) {
            return Err(SchedulerError::Validation(format!(
                "计划版本已存在: {} {}",
                info.plan_id, info.version
            )));
        }
        infos.insert(key, info.clone());
        Ok(())
    }

    async fn delete_info(&self, plan_id: &str, version: &str) -> SchedulerResult<()> {
        let key = (plan_id.to_string(), version.to_string());
        if self.infos.write().await.remove(&key).is_some() {
            debug!("删除计划版本快照: {} {}", plan_id, version);
        }
        Ok(())
    }

    async fn update_version(
        &self,
        plan_id: &str,
        expected_current: &str,
        expected_recently: &str,
        new_version: &str,
    ) -> SchedulerResult<bool> {
        let mut plans = self.plans.write().await;
        match plans.get_mut(plan_id) {
            Some(plan)
                if plan.current_version == expected_current
                    && plan.recently_version == expected_recently =>
            {
                plan.current_version = new_version.to_string();
                plan.recently_version = new_version.to_string();
                plan.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_enabled(&self, plan_id: &str, enabled: bool) -> SchedulerResult<bool> {
        let mut plans = self.plans.write().await;
        match plans.get_mut(plan_id) {
            Some(plan) if plan.enabled != enabled => {
                plan.enabled = enabled;
                plan.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_next_trigger_at(
        &self,
        plan_id: &str,
        next_trigger_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        if let Some(plan) = self.plans.write().await.get_mut(plan_id) {
            plan.next_trigger_at = next_trigger_at;
        }
        Ok(())
    }

    async fn find_enabled_by_slots(&self, slots: &[u32]) -> SchedulerResult<Vec<Plan>> {
        let plans = self.plans.read().await;
        let mut result: Vec<Plan> = plans
            .values()
            .filter(|p| p.enabled && slots.contains(&p.slot))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        Ok(result)
    }
}
