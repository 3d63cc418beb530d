mod common;

#[cfg(test)]
mod tests {
    use scheduler_core::*;
    use scheduler_testing_utils::*;

    use crate::common::Harness;

    /// a → b(API触发)
    fn api_flow() -> PlanInfo {
        PlanInfoBuilder::new("flow")
            .workflow(vec![
                JobInfoBuilder::new("a").with_children(&["b"]).build(),
                JobInfoBuilder::new("b").api_triggered().build(),
            ])
            .build()
    }

    #[tokio::test]
    async fn test_api_job_waits_for_predecessor() {
        let harness = Harness::online(workers(1)).await;
        harness.save(&api_flow()).await;
        let pid = harness.trigger("flow").await.plan_instance_id;
        let processor = harness.broker.processor();

        let early = processor.schedule_job(&pid, "b").await;
        assert!(matches!(early, Err(SchedulerError::PreconditionNotMet(_))));

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.succeed(&a_tasks[0].task_id).await;

        // API节点不会被自动推进
        assert!(harness.job_instances_for(&pid, "b").await.is_empty());
        assert_eq!(
            harness.plan_instance(&pid).await.status,
            PlanStatus::Executing
        );

        let b = processor.schedule_job(&pid, "b").await.unwrap();
        assert_eq!(b.job_id, "b");

        let again = processor.schedule_job(&pid, "b").await;
        assert!(matches!(again, Err(SchedulerError::PreconditionNotMet(_))));

        let b_tasks = harness.wait_executing(&pid, "b", 1).await;
        harness.succeed(&b_tasks[0].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
    }

    #[tokio::test]
    async fn test_api_schedule_rejects_invalid_targets() {
        let harness = Harness::online(workers(1)).await;
        harness.save(&api_flow()).await;
        harness
            .save(&PlanInfoBuilder::new("single").build())
            .await;
        let pid = harness.trigger("flow").await.plan_instance_id;
        let single = harness.trigger("single").await.plan_instance_id;
        let processor = harness.broker.processor();

        assert!(matches!(
            processor.schedule_job(&pid, "a").await,
            Err(SchedulerError::PreconditionNotMet(_))
        ));
        assert!(matches!(
            processor.schedule_job(&pid, "missing").await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            processor.schedule_job(&single, "job").await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            processor.schedule_job("no-such-instance", "b").await,
            Err(SchedulerError::PlanInstanceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_schedule_on_completed_instance() {
        let harness = Harness::online(workers(1)).await;
        let info = PlanInfoBuilder::new("flow")
            .workflow(vec![
                JobInfoBuilder::new("a")
                    .terminate_with_fail(true)
                    .with_children(&["b"])
                    .build(),
                JobInfoBuilder::new("b").api_triggered().build(),
            ])
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("flow").await.plan_instance_id;

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.fail(&a_tasks[0].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);

        let result = harness.broker.processor().schedule_job(&pid, "b").await;
        assert!(matches!(result, Err(SchedulerError::PreconditionNotMet(_))));
    }

    #[tokio::test]
    async fn test_manual_rerun_of_finished_job() {
        let harness = Harness::online(workers(1)).await;
        harness.save(&api_flow()).await;
        let pid = harness.trigger("flow").await.plan_instance_id;
        let processor = harness.broker.processor();

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.succeed(&a_tasks[0].task_id).await;

        let rerun = processor.manual_schedule_job(&pid, "a").await.unwrap();
        let attempts = harness.job_instances_for(&pid, "a").await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].job_instance_id, rerun.job_instance_id);

        // 手动调度不要求API触发，但仍要求前驱完成
        assert!(matches!(
            processor.manual_schedule_job(&pid, "b").await,
            Err(SchedulerError::PreconditionNotMet(_))
        ));
        let rerun_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.succeed(&rerun_tasks[0].task_id).await;

        let manual_b = processor.manual_schedule_job(&pid, "b").await.unwrap();
        assert_eq!(manual_b.job_id, "b");
    }
}
