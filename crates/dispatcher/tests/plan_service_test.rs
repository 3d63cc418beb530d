mod common;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};

    use scheduler_core::*;
    use scheduler_dispatcher::PlanService;
    use scheduler_infrastructure::InMemoryPlanRepository;
    use scheduler_testing_utils::*;

    use crate::common::Harness;

    /// 第一次切换版本前，另一方抢先把计划更新到 `rival_version`
    struct RacingPlanRepository {
        inner: InMemoryPlanRepository,
        rival_version: String,
        raced: AtomicBool,
    }

    #[async_trait]
    impl PlanRepository for RacingPlanRepository {
        async fn get(&self, plan_id: &str) -> SchedulerResult<Option<Plan>> {
            self.inner.get(plan_id).await
        }

        async fn get_info(&self, plan_id: &str, version: &str) -> SchedulerResult<Option<PlanInfo>> {
            self.inner.get_info(plan_id, version).await
        }

        async fn create(&self, plan: &Plan, info: &PlanInfo) -> SchedulerResult<()> {
            self.inner.create(plan, info).await
        }

        async fn save_info(&self, info: &PlanInfo) -> SchedulerResult<()> {
            self.inner.save_info(info).await
        }

        async fn delete_info(&self, plan_id: &str, version: &str) -> SchedulerResult<()> {
            self.inner.delete_info(plan_id, version).await
        }

        async fn update_version(
            &self,
            plan_id: &str,
            expected_current: &str,
            expected_recently: &str,
            new_version: &str,
        ) -> SchedulerResult<bool> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner
                    .update_version(plan_id, expected_current, expected_recently, &self.rival_version)
                    .await?;
            }
            self.inner
                .update_version(plan_id, expected_current, expected_recently, new_version)
                .await
        }

        async fn update_enabled(&self, plan_id: &str, enabled: bool) -> SchedulerResult<bool> {
            self.inner.update_enabled(plan_id, enabled).await
        }

        async fn update_next_trigger_at(
            &self,
            plan_id: &str,
            next_trigger_at: Option<DateTime<Utc>>,
        ) -> SchedulerResult<()> {
            self.inner.update_next_trigger_at(plan_id, next_trigger_at).await
        }

        async fn find_enabled_by_slots(&self, slots: &[u32]) -> SchedulerResult<Vec<Plan>> {
            self.inner.find_enabled_by_slots(slots).await
        }
    }

    #[tokio::test]
    async fn test_save_assigns_slot_and_rejects_duplicates() {
        let harness = Harness::new(workers(1));
        let service = harness.broker.plan_service();

        let plan = service.save(&PlanInfoBuilder::new("p").build()).await.unwrap();
        assert!(plan.enabled);
        assert_eq!(plan.current_version, "v1");
        assert_eq!(plan.slot, harness.broker.strategy().slots().slot("p"));

        let again = service.save(&PlanInfoBuilder::new("p").build()).await;
        assert!(matches!(again, Err(SchedulerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_save_validates_schedule() {
        let harness = Harness::new(workers(1));
        let service = harness.broker.plan_service();

        let bad_cron = PlanInfoBuilder::new("cron")
            .with_schedule(ScheduleOption::cron("not a cron"))
            .build();
        assert!(matches!(
            service.save(&bad_cron).await,
            Err(SchedulerError::InvalidCron { .. })
        ));

        let zero_rate = PlanInfoBuilder::new("rate")
            .with_schedule(ScheduleOption::fixed_rate(0))
            .build();
        assert!(matches!(
            service.save(&zero_rate).await,
            Err(SchedulerError::Validation(_))
        ));

        let now = Utc::now();
        let inverted = PlanInfoBuilder::new("window")
            .with_schedule(
                ScheduleOption::fixed_rate(10)
                    .with_start_at(now)
                    .with_end_at(now - Duration::hours(1)),
            )
            .build();
        assert!(service.save(&inverted).await.is_err());
        assert_eq!(harness.plans.count().await, 0);
    }

    #[tokio::test]
    async fn test_update_requires_expected_version() {
        let harness = Harness::new(workers(1));
        let service = harness.broker.plan_service();
        service.save(&PlanInfoBuilder::new("p").build()).await.unwrap();

        let v2 = PlanInfoBuilder::new("p").with_version("v2").build();
        let plan = service.update("p", "v1", &v2).await.unwrap();
        assert_eq!(plan.current_version, "v2");
        assert!(harness.plans.get_info("p", "v2").await.unwrap().is_some());
        assert!(harness.plans.get_info("p", "v1").await.unwrap().is_some());

        let v3 = PlanInfoBuilder::new("p").with_version("v3").build();
        let stale = service.update("p", "v1", &v3).await;
        assert!(matches!(stale, Err(SchedulerError::StaleVersion { .. })));
        assert_eq!(service.get("p").await.unwrap().current_version, "v2");

        let other = PlanInfoBuilder::new("q").with_version("v3").build();
        assert!(matches!(
            service.update("p", "v2", &other).await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            service.update("missing", "v1", &PlanInfoBuilder::new("missing").build()).await,
            Err(SchedulerError::PlanNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let harness = Harness::online(workers(1)).await;
        let service = harness.broker.plan_service();
        service.save(&PlanInfoBuilder::new("p").build()).await.unwrap();

        service.disable("p").await.unwrap();
        service.disable("p").await.unwrap();
        assert!(!service.get("p").await.unwrap().enabled);

        let fired = harness
            .broker
            .processor()
            .schedule("p", TriggerType::Api, Attributes::new(), Utc::now())
            .await
            .unwrap();
        assert!(fired.is_none());

        service.enable("p").await.unwrap();
        assert!(service.get("p").await.unwrap().enabled);
        assert!(matches!(
            service.enable("missing").await,
            Err(SchedulerError::PlanNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_version_trigger_is_ignored() {
        let harness = Harness::online(workers(1)).await;
        let service = harness.broker.plan_service();
        service.save(&PlanInfoBuilder::new("p").build()).await.unwrap();
        service
            .update("p", "v1", &PlanInfoBuilder::new("p").with_version("v2").build())
            .await
            .unwrap();

        let strategy = harness.broker.strategy();
        let stale = strategy
            .schedule_plan("p", Some("v1"), TriggerType::Schedule, Attributes::new(), Utc::now())
            .await
            .unwrap();
        assert!(stale.is_none());

        let current = strategy
            .schedule_plan("p", Some("v2"), TriggerType::Schedule, Attributes::new(), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version, "v2");
    }

    #[tokio::test]
    async fn test_schedule_trigger_deduplication() {
        let harness = Harness::online(workers(1)).await;
        harness.save(&PlanInfoBuilder::new("rate").build()).await;
        harness
            .save(
                &PlanInfoBuilder::new("delay")
                    .with_schedule(ScheduleOption::fixed_delay(60))
                    .build(),
            )
            .await;
        let processor = harness.broker.processor();
        let at = Utc::now();

        let first = processor
            .schedule("rate", TriggerType::Schedule, Attributes::new(), at)
            .await
            .unwrap();
        assert!(first.is_some());
        let same_time = processor
            .schedule("rate", TriggerType::Schedule, Attributes::new(), at)
            .await
            .unwrap();
        assert!(same_time.is_none());
        // API触发不做去重
        assert!(processor
            .schedule("rate", TriggerType::Api, Attributes::new(), at)
            .await
            .unwrap()
            .is_some());

        let first = processor
            .schedule("delay", TriggerType::Schedule, Attributes::new(), at)
            .await
            .unwrap()
            .unwrap();
        let overlapping = processor
            .schedule(
                "delay",
                TriggerType::Schedule,
                Attributes::new(),
                at + Duration::seconds(60),
            )
            .await
            .unwrap();
        assert!(overlapping.is_none());

        let tasks = harness
            .wait_executing(&first.plan_instance_id, "job", 1)
            .await;
        harness.succeed(&tasks[0].task_id).await;
        assert!(harness
            .wait_plan_status(&first.plan_instance_id, PlanStatus::Succeed)
            .await);
        let next = processor
            .schedule(
                "delay",
                TriggerType::Schedule,
                Attributes::new(),
                at + Duration::seconds(60),
            )
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_expired_window_is_not_triggered() {
        let harness = Harness::online(workers(1)).await;
        let now = Utc::now();
        harness
            .save(
                &PlanInfoBuilder::new("p")
                    .with_schedule(
                        ScheduleOption::fixed_rate(10)
                            .with_start_at(now - Duration::hours(2))
                            .with_end_at(now - Duration::hours(1)),
                    )
                    .build(),
            )
            .await;

        let fired = harness
            .broker
            .processor()
            .schedule("p", TriggerType::Schedule, Attributes::new(), now)
            .await
            .unwrap();
        assert!(fired.is_none());
        assert!(matches!(
            harness
                .broker
                .processor()
                .schedule("missing", TriggerType::Api, Attributes::new(), now)
                .await,
            Err(SchedulerError::PlanNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unowned_slot_is_not_triggered() {
        // 节点未上线，不持有任何槽位
        let harness = Harness::new(workers(1));
        harness.save(&PlanInfoBuilder::new("p").build()).await;
        let processor = harness.broker.processor();

        let scheduled = processor
            .schedule("p", TriggerType::Schedule, Attributes::new(), Utc::now())
            .await
            .unwrap();
        assert!(scheduled.is_none());

        let api = processor
            .schedule("p", TriggerType::Api, Attributes::new(), Utc::now())
            .await
            .unwrap();
        assert!(api.is_some());
    }

    #[tokio::test]
    async fn test_lost_version_race_leaves_no_snapshot() {
        let repository = Arc::new(RacingPlanRepository {
            inner: InMemoryPlanRepository::new(),
            rival_version: "v-rival".to_string(),
            raced: AtomicBool::new(false),
        });
        let service = PlanService::new(repository.clone(), 1024);
        service.save(&PlanInfoBuilder::new("p").build()).await.unwrap();

        let v2 = PlanInfoBuilder::new("p").with_version("v2").build();
        let lost = service.update("p", "v1", &v2).await;
        assert!(matches!(lost, Err(SchedulerError::StaleVersion { .. })));
        assert!(repository.get_info("p", "v2").await.unwrap().is_none());
        assert_eq!(service.get("p").await.unwrap().current_version, "v-rival");

        // 以最新版本重试，复用同一个新版本号
        let plan = service.update("p", "v-rival", &v2).await.unwrap();
        assert_eq!(plan.current_version, "v2");
        assert!(repository.get_info("p", "v2").await.unwrap().is_some());
    }
}
