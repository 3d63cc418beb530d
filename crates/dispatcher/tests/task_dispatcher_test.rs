#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use mockall::mock;

    use scheduler_core::*;
    use scheduler_dispatcher::{DispatchOutcome, TaskDispatcher, WorkerSelectorFactory};
    use scheduler_infrastructure::{InMemoryWorkerRegistry, InMemoryWorkerStatistics};
    use scheduler_testing_utils::*;

    mock! {
        pub Rpc {}

        #[async_trait]
        impl WorkerRpc for Rpc {
            async fn send_task(&self, worker: &Worker, task: &Task) -> SchedulerResult<bool>;
        }
    }

    fn task_for(job: &JobInfo) -> Task {
        let plan_instance = PlanInstance {
            plan_instance_id: "pi-1".to_string(),
            plan_id: "plan".to_string(),
            version: "v1".to_string(),
            plan_type: PlanType::Single,
            schedule_type: ScheduleType::None,
            trigger_type: TriggerType::Api,
            status: PlanStatus::Executing,
            trigger_at: Utc::now(),
            start_at: Some(Utc::now()),
            feedback_at: None,
            context: Attributes::new(),
        };
        let instance = JobInstance::from_job(
            "ji-1".to_string(),
            &plan_instance,
            job,
            Attributes::new(),
            Utc::now(),
        );
        Task::for_job_instance("task-1".to_string(), &instance, TaskType::Normal)
    }

    fn normal_task() -> Task {
        task_for(&JobInfoBuilder::new("job").build())
    }

    fn dispatcher(
        workers: Vec<Worker>,
        statistics: &InMemoryWorkerStatistics,
        rpc: Arc<dyn WorkerRpc>,
    ) -> TaskDispatcher {
        TaskDispatcher::new(
            Arc::new(InMemoryWorkerRegistry::with_workers(workers)),
            Arc::new(statistics.clone()),
            rpc,
            WorkerSelectorFactory::default(),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_records_statistics() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::new();
        let dispatcher = dispatcher(workers(1), &statistics, Arc::new(rpc.clone()));

        let outcome = dispatcher.dispatch(&normal_task()).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                worker_id: "worker-1".to_string()
            }
        );
        assert_eq!(rpc.call_count(), 1);

        let recorded = statistics
            .latest_dispatch_since(&["worker-1".to_string()], Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert!(recorded.contains_key("worker-1"));
    }

    #[tokio::test]
    async fn test_failed_worker_is_skipped() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::new();
        rpc.reply_for("worker-1", RpcReply::Error);
        let dispatcher = dispatcher(workers(2), &statistics, Arc::new(rpc.clone()));

        let outcome = dispatcher.dispatch(&normal_task()).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                worker_id: "worker-2".to_string()
            }
        );
        let recorded = statistics
            .latest_dispatch_since(
                &["worker-1".to_string(), "worker-2".to_string()],
                Utc::now() - Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded.contains_key("worker-2"));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::with_default(RpcReply::Reject);
        let dispatcher = dispatcher(workers(5), &statistics, Arc::new(rpc.clone()));

        let outcome = dispatcher.dispatch(&normal_task()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Exhausted { attempts: 3 });

        let tried: HashSet<String> = rpc.workers_tried("task-1").into_iter().collect();
        assert_eq!(rpc.call_count(), 3);
        assert_eq!(tried.len(), 3);
    }

    #[tokio::test]
    async fn test_fewer_workers_than_attempts() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::with_default(RpcReply::Reject);
        let dispatcher = dispatcher(workers(2), &statistics, Arc::new(rpc.clone()));

        let outcome = dispatcher.dispatch(&normal_task()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Exhausted { attempts: 3 });
        assert_eq!(rpc.call_count(), 2);
    }

    #[tokio::test]
    async fn test_no_candidate_worker() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::new();
        let pool = vec![
            WorkerBuilder::new("busy").exhausted().build(),
            WorkerBuilder::new("fusing")
                .with_status(WorkerStatus::Fusing)
                .build(),
            WorkerBuilder::new("tagged").with_tag("zone", &["b"]).build(),
        ];
        let dispatcher = dispatcher(pool, &statistics, Arc::new(rpc.clone()));

        let python = task_for(&JobInfoBuilder::new("job").with_executor("python").build());
        assert!(matches!(
            dispatcher.dispatch(&python).await,
            Err(SchedulerError::NoWorkerAvailable(_))
        ));

        let zone_a = task_for(&JobInfoBuilder::new("job").with_tag_filter("zone", &["a"]).build());
        assert!(matches!(
            dispatcher.dispatch(&zone_a).await,
            Err(SchedulerError::NoWorkerAvailable(_))
        ));
        assert_eq!(rpc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tag_filter_selects_matching_worker() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::new();
        let pool = vec![
            WorkerBuilder::new("east").with_tag("zone", &["east"]).build(),
            WorkerBuilder::new("west").with_tag("zone", &["west"]).build(),
        ];
        let dispatcher = dispatcher(pool, &statistics, Arc::new(rpc.clone()));

        let task = task_for(
            &JobInfoBuilder::new("job")
                .with_tag_filter("zone", &["west"])
                .build(),
        );
        for _ in 0..3 {
            let outcome = dispatcher.dispatch(&task).await.unwrap();
            assert_eq!(
                outcome,
                DispatchOutcome::Dispatched {
                    worker_id: "west".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_preset_worker_gets_single_attempt() {
        let statistics = InMemoryWorkerStatistics::new();
        let rpc = MockWorkerRpc::with_default(RpcReply::Reject);
        let dispatcher = dispatcher(workers(3), &statistics, Arc::new(rpc.clone()));

        let mut task = normal_task();
        task.worker_id = Some("worker-2".to_string());
        let outcome = dispatcher.dispatch(&task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Exhausted { attempts: 1 });
        assert_eq!(rpc.workers_tried("task-1"), vec!["worker-2".to_string()]);

        rpc.clear();
        task.worker_id = Some("gone".to_string());
        let outcome = dispatcher.dispatch(&task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Exhausted { attempts: 1 });
        assert_eq!(rpc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_least_recently_used_avoids_recent_worker() {
        let statistics = InMemoryWorkerStatistics::new();
        statistics
            .record_dispatch("worker-1", Utc::now())
            .await
            .unwrap();
        let rpc = MockWorkerRpc::new();
        let dispatcher = dispatcher(workers(2), &statistics, Arc::new(rpc.clone()));

        let task = task_for(
            &JobInfoBuilder::new("job")
                .with_load_balance(LoadBalanceType::LeastRecentlyUsed)
                .build(),
        );
        let outcome = dispatcher.dispatch(&task).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                worker_id: "worker-2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_appoint_missing_worker_exhausts_without_calls() {
        let statistics = InMemoryWorkerStatistics::new();
        let mut rpc = MockRpc::new();
        rpc.expect_send_task().times(0);
        let dispatcher = dispatcher(workers(2), &statistics, Arc::new(rpc));

        let task = task_for(
            &JobInfoBuilder::new("job")
                .with_dispatch_option(DispatchOption {
                    load_balance_type: LoadBalanceType::Appoint,
                    appoint_worker_id: Some("worker-9".to_string()),
                    ..Default::default()
                })
                .build(),
        );
        let outcome = dispatcher.dispatch(&task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Exhausted { attempts: 3 });
    }

    #[tokio::test]
    async fn test_appoint_by_id() {
        let statistics = InMemoryWorkerStatistics::new();
        let mut rpc = MockRpc::new();
        rpc.expect_send_task()
            .withf(|worker, _| worker.worker_id == "worker-3")
            .times(1)
            .returning(|_, _| Ok(true));
        let dispatcher = dispatcher(workers(3), &statistics, Arc::new(rpc));

        let task = task_for(
            &JobInfoBuilder::new("job")
                .with_dispatch_option(DispatchOption {
                    load_balance_type: LoadBalanceType::Appoint,
                    appoint_worker_id: Some("worker-3".to_string()),
                    ..Default::default()
                })
                .build(),
        );
        let outcome = dispatcher.dispatch(&task).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                worker_id: "worker-3".to_string()
            }
        );
    }
}
